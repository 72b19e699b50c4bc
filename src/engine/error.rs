use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, Credits, Minute, TimeRange, YearMonth};

/// Broad failure class. Callers map these onto transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    /// Transient; the caller may retry.
    Concurrency,
    Internal,
}

#[derive(Debug)]
pub enum EngineError {
    MentorNotFound(Ulid),
    RequesterNotFound(Ulid),
    UserNotFound(Ulid),
    SkillNotFound(Ulid),
    RuleNotFound(Ulid),
    BookingNotFound(Ulid),
    AccountNotFound(Ulid),
    ScheduleNotFound {
        mentor_id: Ulid,
        month: YearMonth,
    },
    SelfBooking,
    SkillOwnerMismatch {
        skill_id: Ulid,
        mentor_id: Ulid,
    },
    CrossesMidnight {
        start: Minute,
        duration: Minute,
    },
    OutsideBookingWindow(NaiveDate),
    InvalidTimeRange {
        start: Minute,
        end: Minute,
    },
    InvalidDuration(Minute),
    InvalidMonth(String),
    InvalidAmount(Credits),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    NotPermitted {
        /// `None` when the engine itself drove the change.
        actor_id: Option<Ulid>,
        status: BookingStatus,
    },
    AccountExists(Ulid),
    SlotUnavailable {
        date: NaiveDate,
        range: TimeRange,
    },
    SlotAlreadyBooked {
        booking_id: Ulid,
    },
    InsufficientCredit {
        required: Credits,
        available: Credits,
    },
    LockTimeout(&'static str),
    LimitExceeded(&'static str),
    JournalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::MentorNotFound(_)
            | EngineError::RequesterNotFound(_)
            | EngineError::UserNotFound(_)
            | EngineError::SkillNotFound(_)
            | EngineError::RuleNotFound(_)
            | EngineError::BookingNotFound(_)
            | EngineError::AccountNotFound(_)
            | EngineError::ScheduleNotFound { .. } => ErrorKind::NotFound,
            EngineError::SelfBooking
            | EngineError::SkillOwnerMismatch { .. }
            | EngineError::CrossesMidnight { .. }
            | EngineError::OutsideBookingWindow(_)
            | EngineError::InvalidTimeRange { .. }
            | EngineError::InvalidDuration(_)
            | EngineError::InvalidMonth(_)
            | EngineError::InvalidAmount(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::NotPermitted { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::AccountExists(_)
            | EngineError::SlotUnavailable { .. }
            | EngineError::SlotAlreadyBooked { .. }
            | EngineError::InsufficientCredit { .. } => ErrorKind::Conflict,
            EngineError::LockTimeout(_) => ErrorKind::Concurrency,
            EngineError::JournalError(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::MentorNotFound(_) => "mentor_not_found",
            EngineError::RequesterNotFound(_) => "requester_not_found",
            EngineError::UserNotFound(_) => "user_not_found",
            EngineError::SkillNotFound(_) => "skill_not_found",
            EngineError::RuleNotFound(_) => "rule_not_found",
            EngineError::BookingNotFound(_) => "booking_not_found",
            EngineError::AccountNotFound(_) => "account_not_found",
            EngineError::ScheduleNotFound { .. } => "schedule_not_found",
            EngineError::SelfBooking => "self_booking",
            EngineError::SkillOwnerMismatch { .. } => "skill_owner_mismatch",
            EngineError::CrossesMidnight { .. } => "crosses_midnight",
            EngineError::OutsideBookingWindow(_) => "outside_booking_window",
            EngineError::InvalidTimeRange { .. } => "invalid_time_range",
            EngineError::InvalidDuration(_) => "invalid_duration",
            EngineError::InvalidMonth(_) => "invalid_month",
            EngineError::InvalidAmount(_) => "invalid_amount",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NotPermitted { .. } => "not_permitted",
            EngineError::AccountExists(_) => "account_exists",
            EngineError::SlotUnavailable { .. } => "slot_unavailable",
            EngineError::SlotAlreadyBooked { .. } => "slot_already_booked",
            EngineError::InsufficientCredit { .. } => "insufficient_credit",
            EngineError::LockTimeout(_) => "lock_timeout",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::JournalError(_) => "journal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MentorNotFound(id) => write!(f, "mentor not found: {id}"),
            EngineError::RequesterNotFound(id) => write!(f, "requester not found: {id}"),
            EngineError::UserNotFound(id) => write!(f, "user not found: {id}"),
            EngineError::SkillNotFound(id) => write!(f, "skill not found: {id}"),
            EngineError::RuleNotFound(id) => write!(f, "availability rule not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AccountNotFound(id) => write!(f, "credit account not found: {id}"),
            EngineError::ScheduleNotFound { mentor_id, month } => {
                write!(f, "mentor {mentor_id} has no schedule in {month}")
            }
            EngineError::SelfBooking => write!(f, "cannot book your own skill"),
            EngineError::SkillOwnerMismatch {
                skill_id,
                mentor_id,
            } => write!(f, "mentor {mentor_id} does not own skill {skill_id}"),
            EngineError::CrossesMidnight { start, duration } => write!(
                f,
                "a {duration}-minute session starting at {} crosses midnight",
                crate::model::format_hhmm(*start)
            ),
            EngineError::OutsideBookingWindow(date) => {
                write!(f, "{date} is outside the bookable window")
            }
            EngineError::InvalidTimeRange { start, end } => write!(
                f,
                "invalid time range {}-{}",
                crate::model::format_hhmm(*start),
                crate::model::format_hhmm(*end)
            ),
            EngineError::InvalidDuration(d) => write!(
                f,
                "session duration {d} is not a positive multiple of {} minutes",
                crate::limits::SLOT_GRANULARITY
            ),
            EngineError::InvalidMonth(s) => write!(f, "invalid month: {s:?} (expected YYYY-MM)"),
            EngineError::InvalidAmount(a) => write!(f, "invalid credit amount: {a}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::NotPermitted { actor_id, status } => match actor_id {
                Some(id) => write!(f, "user {id} may not move this booking to {status}"),
                None => write!(f, "the system may not move this booking to {status}"),
            },
            EngineError::AccountExists(id) => write!(f, "credit account already exists: {id}"),
            EngineError::SlotUnavailable { date, range } => {
                write!(f, "mentor is not available on {date} {range}")
            }
            EngineError::SlotAlreadyBooked { booking_id } => {
                write!(f, "slot overlaps existing booking: {booking_id}")
            }
            EngineError::InsufficientCredit {
                required,
                available,
            } => write!(
                f,
                "insufficient credit: {required} required, {available} available"
            ),
            EngineError::LockTimeout(what) => write!(f, "timed out waiting for {what} lock"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::JournalError(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
