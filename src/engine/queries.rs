use std::collections::HashSet;
use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::SLOT_GRANULARITY;
use crate::model::*;

use super::availability::{booked_slots, operating_slots, slot_availability};
use super::conflict::acquire;
use super::schedule::{expand_on, expand_rolling};
use super::{Engine, EngineError};

impl Engine {
    // ── Schedule ─────────────────────────────────────────────

    pub fn list_rules(&self, owner_id: Ulid) -> Vec<AvailabilityRule> {
        self.store.rules_of(&owner_id)
    }

    /// Every rule instance across the rolling window, by `(date, start)`.
    pub fn expand_schedule(&self, owner_id: Ulid) -> Vec<ExpandedSlot> {
        expand_rolling(&self.store.rules_of(&owner_id), self.clock.today())
    }

    /// Distinct dates in `month` (`YYYY-MM`) on which the mentor operates,
    /// ascending. Bookings are not consulted.
    pub async fn available_dates(
        &self,
        mentor_id: Ulid,
        month: &str,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        let month = YearMonth::parse(month).ok_or_else(|| EngineError::InvalidMonth(month.into()))?;
        if !self.users.exists(mentor_id).await {
            return Err(EngineError::MentorNotFound(mentor_id));
        }

        let mut dates: Vec<NaiveDate> = self
            .expand_schedule(mentor_id)
            .into_iter()
            .filter(|slot| month.contains(slot.date))
            .map(|slot| slot.date)
            .collect();
        dates.dedup();
        if dates.is_empty() {
            return Err(EngineError::ScheduleNotFound { mentor_id, month });
        }
        Ok(dates)
    }

    /// Bookable start times for `skill_id` on `date`.
    ///
    /// One entry per distinct operating step, ascending. A start is available
    /// when every step of the session is operating and unbooked. Dates outside
    /// the rolling window have no operating steps.
    pub async fn available_slots(
        &self,
        mentor_id: Ulid,
        skill_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<SlotAvailability>, EngineError> {
        let started = Instant::now();
        if !self.users.exists(mentor_id).await {
            return Err(EngineError::MentorNotFound(mentor_id));
        }
        let row = self
            .store
            .skill(&skill_id)
            .ok_or(EngineError::SkillNotFound(skill_id))?;
        if row.skill.owner_id != mentor_id {
            return Err(EngineError::SkillOwnerMismatch {
                skill_id,
                mentor_id,
            });
        }

        let instances = expand_on(&self.store.rules_of(&mentor_id), self.clock.today(), date);
        let operating = operating_slots(&instances, date, SLOT_GRANULARITY);
        let booked = match self.store.existing_calendar(&mentor_id) {
            Some(calendar) => {
                let cal = acquire("calendar", self.lock_timeout, calendar.read()).await?;
                booked_slots(cal.on_date(date), SLOT_GRANULARITY)
            }
            None => HashSet::new(),
        };
        let slots = slot_availability(&operating, &booked, row.skill.duration, SLOT_GRANULARITY);

        metrics::histogram!(crate::observability::SLOT_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(slots)
    }

    // ── Skills & bookings ────────────────────────────────────

    pub fn get_skill(&self, skill_id: Ulid) -> Result<Skill, EngineError> {
        self.store
            .skill(&skill_id)
            .map(|row| row.skill.clone())
            .ok_or(EngineError::SkillNotFound(skill_id))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let mentor_id = self
            .store
            .mentor_of_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let calendar = self
            .store
            .existing_calendar(&mentor_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let cal = acquire("calendar", self.lock_timeout, calendar.read()).await?;
        cal.get(booking_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))
    }

    /// The mentor's bookings on `date`, in every status, by start time.
    pub async fn bookings_for_mentor(
        &self,
        mentor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, EngineError> {
        let Some(calendar) = self.store.existing_calendar(&mentor_id) else {
            return Ok(Vec::new());
        };
        let cal = acquire("calendar", self.lock_timeout, calendar.read()).await?;
        Ok(cal.on_date(date).to_vec())
    }

    /// Every booking `requester_id` has made, by `(date, start)`.
    pub async fn bookings_for_requester(
        &self,
        requester_id: Ulid,
    ) -> Result<Vec<Booking>, EngineError> {
        let mut out = Vec::new();
        for booking_id in self.store.bookings_requested_by(&requester_id) {
            out.push(self.get_booking(booking_id).await?);
        }
        out.sort_by_key(|b| (b.date, b.range.start));
        Ok(out)
    }

    // ── Ledger ───────────────────────────────────────────────

    pub async fn balance(&self, owner_id: Ulid) -> Result<Credits, EngineError> {
        let shared = self
            .store
            .account(&owner_id)
            .ok_or(EngineError::AccountNotFound(owner_id))?;
        let account = acquire("account", self.lock_timeout, shared.lock()).await?;
        Ok(account.balance)
    }

    /// Ledger entries for `owner_id`, oldest first.
    pub async fn ledger_history(&self, owner_id: Ulid) -> Result<Vec<LedgerEntry>, EngineError> {
        let shared = self
            .store
            .account(&owner_id)
            .ok_or(EngineError::AccountNotFound(owner_id))?;
        let account = acquire("account", self.lock_timeout, shared.lock()).await?;
        Ok(account.history.clone())
    }

    pub fn account_owners(&self) -> Vec<Ulid> {
        self.store.account_owners()
    }
}
