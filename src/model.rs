use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MINUTES_PER_DAY, SLOT_GRANULARITY};

/// Minutes since midnight. The only time-of-day type.
pub type Minute = u32;

/// Whole credits. Signed so ledger entries can carry debits.
pub type Credits = i64;

/// Half-open time-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minute,
    pub end: Minute,
}

impl TimeRange {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Start of every `step`-sized slot beginning inside the range.
    /// A trailing partial step is still yielded.
    pub fn steps(&self, step: Minute) -> impl Iterator<Item = Minute> {
        (self.start..self.end).step_by(step.max(1) as usize)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

pub fn format_hhmm(m: Minute) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM`. `24:00` is accepted as the end-of-day marker.
pub fn parse_hhmm(s: &str) -> Option<Minute> {
    let (h, m) = s.trim().split_once(':')?;
    let h: Minute = h.parse().ok()?;
    let m: Minute = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    let total = h * 60 + m;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// A calendar month, as requested by the date browser (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (y, m) = s.trim().split_once('-')?;
        if y.len() != 4 || m.len() != 2 {
            return None;
        }
        Self::new(y.parse().ok()?, m.parse().ok()?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

// ── Schedule ─────────────────────────────────────────────────────

/// Weekly recurring availability published by a mentor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub weekday: Weekday,
    pub range: TimeRange,
}

/// One rule projected onto a concrete date. Derived per query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedSlot {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub range: TimeRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub time: Minute,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    /// Session length in minutes; a positive multiple of the slot granularity.
    pub duration: Minute,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Canceled,
    Expired,
    Processing,
    Completed,
    Settled,
}

/// Who may drive a booking into a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Mentor,
    Either,
    System,
}

impl BookingStatus {
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted | Rejected | Canceled | Expired)
                | (Accepted, Processing | Canceled)
                | (Processing, Completed | Canceled)
                | (Completed, Settled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Settled
                | BookingStatus::Rejected
                | BookingStatus::Expired
                | BookingStatus::Canceled
        )
    }

    /// Whether a booking in this status still occupies its slot.
    pub fn holds_slot(self) -> bool {
        !matches!(
            self,
            BookingStatus::Canceled | BookingStatus::Rejected | BookingStatus::Expired
        )
    }

    pub fn required_actor(self) -> Actor {
        match self {
            BookingStatus::Accepted | BookingStatus::Rejected | BookingStatus::Processing => {
                Actor::Mentor
            }
            BookingStatus::Expired | BookingStatus::Pending => Actor::System,
            BookingStatus::Canceled | BookingStatus::Completed | BookingStatus::Settled => {
                Actor::Either
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Accepted => "ACCEPTED",
            BookingStatus::Rejected => "REJECTED",
            BookingStatus::Canceled => "CANCELED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Processing => "PROCESSING",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Settled => "SETTLED",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credit price of a session: one credit per started granularity step, rounded down.
pub fn price_for(duration: Minute) -> Credits {
    Credits::from(duration / SLOT_GRANULARITY)
}

/// A skill-exchange booking. Only `status` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub mentor_id: Ulid,
    pub skill_id: Ulid,
    pub skill_name: String,
    pub duration: Minute,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub request_deadline: NaiveDateTime,
    pub price: Credits,
    pub status: BookingStatus,
    pub message: Option<String>,
}

/// Parameters of a booking request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub requester_id: Ulid,
    pub mentor_id: Ulid,
    pub skill_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub message: Option<String>,
}

impl Booking {
    pub fn is_party(&self, user_id: Ulid) -> bool {
        self.requester_id == user_id || self.mentor_id == user_id
    }

    pub fn counterpart_of(&self, user_id: Ulid) -> Ulid {
        if user_id == self.mentor_id {
            self.requester_id
        } else {
            self.mentor_id
        }
    }
}

/// All bookings made against one mentor, sorted by `(date, range.start)`.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub mentor_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl Calendar {
    pub fn new(mentor_id: Ulid) -> Self {
        Self {
            mentor_id,
            bookings: Vec::new(),
        }
    }

    /// Insert maintaining sort order.
    pub fn insert(&mut self, booking: Booking) {
        let key = (booking.date, booking.range.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.range.start) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Overwrite a booking's status, returning the previous one.
    pub fn set_status(&mut self, id: Ulid, status: BookingStatus) -> Option<BookingStatus> {
        let booking = self.bookings.iter_mut().find(|b| b.id == id)?;
        Some(std::mem::replace(&mut booking.status, status))
    }

    /// Every booking scheduled on `date`, whatever its status.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Bookings on `date` that still occupy their slot.
    pub fn holding_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.on_date(date).iter().filter(|b| b.status.holds_slot())
    }
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CreditAccount {
    pub owner_id: Ulid,
    /// Never negative. Always equal to the running sum of `history` amounts.
    pub balance: Credits,
    pub history: Vec<LedgerEntry>,
}

impl CreditAccount {
    pub fn new(owner_id: Ulid) -> Self {
        Self {
            owner_id,
            balance: 0,
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerKind {
    SignupReward,
    ProfileReward,
    ExchangeRequest,
    ExchangeReject,
    ExchangeExpire,
    ExchangeCancel,
    ExchangeSettle,
}

impl LedgerKind {
    /// Ledger kind recorded when a booking enters `status`, if that move touches credits.
    pub fn for_status(status: BookingStatus) -> Option<LedgerKind> {
        match status {
            BookingStatus::Rejected => Some(LedgerKind::ExchangeReject),
            BookingStatus::Canceled => Some(LedgerKind::ExchangeCancel),
            BookingStatus::Expired => Some(LedgerKind::ExchangeExpire),
            BookingStatus::Settled => Some(LedgerKind::ExchangeSettle),
            _ => None,
        }
    }
}

/// Immutable record of one balance change and the balance it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub amount: Credits,
    pub balance_after: Credits,
    pub kind: LedgerKind,
    pub counterpart_id: Option<Ulid>,
    pub booking_id: Option<Ulid>,
    pub recorded_at: NaiveDateTime,
}

/// What a posting is for. Turned into a `LedgerEntry` once the balance is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub kind: LedgerKind,
    pub counterpart_id: Option<Ulid>,
    pub booking_id: Option<Ulid>,
}

impl Posting {
    pub fn new(kind: LedgerKind) -> Self {
        Self {
            kind,
            counterpart_id: None,
            booking_id: None,
        }
    }

    pub fn for_booking(kind: LedgerKind, booking_id: Ulid, counterpart_id: Ulid) -> Self {
        Self {
            kind,
            counterpart_id: Some(counterpart_id),
            booking_id: Some(booking_id),
        }
    }
}

/// Journal record format. One record per committed business event, so a booking
/// and the ledger entry paying for it are durable together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RuleAdded {
        rule: AvailabilityRule,
    },
    RuleRemoved {
        id: Ulid,
        owner_id: Ulid,
    },
    SkillRegistered {
        skill: Skill,
    },
    SkillRemoved {
        id: Ulid,
    },
    AccountOpened {
        owner_id: Ulid,
        reward: Option<LedgerEntry>,
    },
    LedgerPosted {
        entry: LedgerEntry,
    },
    BookingRequested {
        booking: Booking,
        debit: LedgerEntry,
    },
    BookingStatusChanged {
        booking_id: Ulid,
        mentor_id: Ulid,
        status: BookingStatus,
        posting: Option<LedgerEntry>,
    },
    /// Written only by compaction: a booking in its current status, with its
    /// ledger effects already present as `LedgerPosted` records.
    BookingRestored {
        booking: Booking,
    },
}
