use std::time::Instant;

use chrono::{NaiveDateTime, NaiveTime, Weekday};
use tokio::sync::{oneshot, OwnedMutexGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{BookingNotice, NoticeKind};
use crate::observability;

use super::conflict::{acquire, check_slot, session_range};
use super::ledger::{post_entry, prepare_credit, prepare_debit};
use super::schedule::{expand_on, in_window};
use super::store::apply_to_calendar;
use super::{Engine, EngineError, JournalCommand};

impl Engine {
    // ── Availability rules ───────────────────────────────────

    pub async fn add_rule(
        &self,
        owner_id: Ulid,
        weekday: Weekday,
        start: Minute,
        end: Minute,
    ) -> Result<AvailabilityRule, EngineError> {
        if start >= end || end > MINUTES_PER_DAY {
            return Err(EngineError::InvalidTimeRange { start, end });
        }
        if !self.users.exists(owner_id).await {
            return Err(EngineError::UserNotFound(owner_id));
        }
        // Exclusive: the count check and the insert must not race.
        let _gate = self.commit_gate.write().await;
        if self.store.rule_count(&owner_id) >= MAX_RULES_PER_OWNER {
            return Err(EngineError::LimitExceeded("too many availability rules"));
        }

        let rule = AvailabilityRule {
            id: Ulid::new(),
            owner_id,
            weekday,
            range: TimeRange::new(start, end),
        };
        self.persist_shared(&Event::RuleAdded { rule: rule.clone() })
            .await?;
        debug!("rule {} added for {owner_id}: {weekday} {}", rule.id, rule.range);
        Ok(rule)
    }

    /// Remove a rule. Existing bookings are unaffected; the freed hours simply
    /// stop appearing in new schedule queries.
    pub async fn remove_rule(&self, rule_id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.commit_gate.read().await;
        let owner_id = self
            .store
            .owner_of_rule(&rule_id)
            .ok_or(EngineError::RuleNotFound(rule_id))?;
        self.persist_shared(&Event::RuleRemoved {
            id: rule_id,
            owner_id,
        })
        .await?;
        Ok(owner_id)
    }

    // ── Skills ───────────────────────────────────────────────

    pub async fn register_skill(
        &self,
        owner_id: Ulid,
        name: impl Into<String>,
        duration: Minute,
    ) -> Result<Skill, EngineError> {
        let name = name.into();
        if name.trim().is_empty() || name.chars().count() > MAX_SKILL_NAME_LEN {
            return Err(EngineError::LimitExceeded("skill name must be 1-100 characters"));
        }
        if duration == 0 || duration % SLOT_GRANULARITY != 0 || duration > MINUTES_PER_DAY {
            return Err(EngineError::InvalidDuration(duration));
        }
        if !self.users.exists(owner_id).await {
            return Err(EngineError::UserNotFound(owner_id));
        }

        let skill = Skill {
            id: Ulid::new(),
            owner_id,
            name,
            duration,
        };
        let _gate = self.commit_gate.read().await;
        self.persist_shared(&Event::SkillRegistered {
            skill: skill.clone(),
        })
        .await?;
        info!("skill {} registered by {owner_id} ({} min)", skill.id, duration);
        Ok(skill)
    }

    /// Withdraw a skill. Waits for any in-flight booking against it; bookings
    /// already made keep their copy of the skill's name and duration.
    pub async fn remove_skill(&self, skill_id: Ulid) -> Result<(), EngineError> {
        let row = self
            .store
            .skill(&skill_id)
            .ok_or(EngineError::SkillNotFound(skill_id))?;
        let _gate = self.commit_gate.read().await;
        let _lease = acquire("skill", self.lock_timeout, row.lease.lock()).await?;
        if !self.store.has_skill(&skill_id) {
            return Err(EngineError::SkillNotFound(skill_id));
        }
        self.persist_shared(&Event::SkillRemoved { id: skill_id })
            .await
    }

    // ── Credit accounts ──────────────────────────────────────

    /// Open an account, crediting `signup_reward` in the same record.
    pub async fn open_account(
        &self,
        owner_id: Ulid,
        signup_reward: Credits,
    ) -> Result<Credits, EngineError> {
        if signup_reward < 0 {
            return Err(EngineError::InvalidAmount(signup_reward));
        }
        if !self.users.exists(owner_id).await {
            return Err(EngineError::UserNotFound(owner_id));
        }
        // Exclusive: the existence check and the insert must not race.
        let _gate = self.commit_gate.write().await;
        if self.store.has_account(&owner_id) {
            return Err(EngineError::AccountExists(owner_id));
        }

        let mut account = CreditAccount::new(owner_id);
        let reward = if signup_reward > 0 {
            Some(prepare_credit(
                &account,
                signup_reward,
                Posting::new(LedgerKind::SignupReward),
                self.clock.now(),
            )?)
        } else {
            None
        };
        let event = Event::AccountOpened {
            owner_id,
            reward: reward.clone(),
        };
        self.journal_append(&event).await?;
        if let Some(entry) = &reward {
            post_entry(&mut account, entry);
        }
        let balance = account.balance;
        self.store.insert_account(account);
        Ok(balance)
    }

    /// Credit an account outside the booking flow (rewards, adjustments).
    pub async fn credit(
        &self,
        owner_id: Ulid,
        amount: Credits,
        kind: LedgerKind,
    ) -> Result<LedgerEntry, EngineError> {
        self.post(owner_id, kind, |account, at| {
            prepare_credit(account, amount, Posting::new(kind), at)
        })
        .await
    }

    pub async fn debit(
        &self,
        owner_id: Ulid,
        amount: Credits,
        kind: LedgerKind,
    ) -> Result<LedgerEntry, EngineError> {
        self.post(owner_id, kind, |account, at| {
            prepare_debit(account, amount, Posting::new(kind), at)
        })
        .await
    }

    async fn post(
        &self,
        owner_id: Ulid,
        kind: LedgerKind,
        prepare: impl FnOnce(&CreditAccount, NaiveDateTime) -> Result<LedgerEntry, EngineError>,
    ) -> Result<LedgerEntry, EngineError> {
        let shared = self
            .store
            .account(&owner_id)
            .ok_or(EngineError::AccountNotFound(owner_id))?;
        let _gate = self.commit_gate.read().await;
        let mut account = acquire("account", self.lock_timeout, shared.lock()).await?;
        let entry = prepare(&*account, self.clock.now())?;
        self.journal_append(&Event::LedgerPosted {
            entry: entry.clone(),
        })
        .await?;
        post_entry(&mut account, &entry);
        debug!(
            "ledger {} {owner_id}: {:+} -> {}",
            observability::ledger_kind_label(kind),
            entry.amount,
            entry.balance_after
        );
        Ok(entry)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Create a PENDING booking and debit its price from the requester.
    ///
    /// The skill lease serializes requests for the same skill; the calendar
    /// write lock covers requests for other skills of the same mentor. Both are
    /// held from the feasibility check until the record is durable and applied.
    pub async fn request_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self.try_request_booking(req).await;
        metrics::counter!(
            observability::BOOKING_REQUESTS_TOTAL,
            "outcome" => observability::outcome_label(&result)
        )
        .increment(1);
        metrics::histogram!(observability::BOOKING_REQUEST_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn try_request_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        if req.requester_id == req.mentor_id {
            return Err(EngineError::SelfBooking);
        }
        if let Some(message) = &req.message
            && message.chars().count() > MAX_MESSAGE_LEN
        {
            return Err(EngineError::LimitExceeded("request message too long"));
        }
        if !self.users.exists(req.mentor_id).await {
            return Err(EngineError::MentorNotFound(req.mentor_id));
        }
        if !self.users.exists(req.requester_id).await {
            return Err(EngineError::RequesterNotFound(req.requester_id));
        }
        let row = self
            .store
            .skill(&req.skill_id)
            .ok_or(EngineError::SkillNotFound(req.skill_id))?;

        let _gate = self.commit_gate.read().await;
        let _lease = acquire("skill", self.lock_timeout, row.lease.lock()).await?;
        if !self.store.has_skill(&req.skill_id) {
            return Err(EngineError::SkillNotFound(req.skill_id));
        }
        let skill = &row.skill;
        if skill.owner_id != req.mentor_id {
            return Err(EngineError::SkillOwnerMismatch {
                skill_id: skill.id,
                mentor_id: req.mentor_id,
            });
        }

        let range = session_range(req.start, skill.duration)?;
        let now = self.clock.now();
        let today = now.date();
        if !in_window(today, req.date) {
            return Err(EngineError::OutsideBookingWindow(req.date));
        }
        let instances = expand_on(&self.store.rules_of(&req.mentor_id), today, req.date);

        let calendar = self.store.calendar(req.mentor_id);
        let mut cal = acquire("calendar", self.lock_timeout, calendar.write()).await?;
        check_slot(&cal, &instances, req.date, range)?;

        let shared = self
            .store
            .account(&req.requester_id)
            .ok_or(EngineError::AccountNotFound(req.requester_id))?;
        let mut account = acquire("account", self.lock_timeout, shared.lock()).await?;

        let booking_id = Ulid::new();
        let price = price_for(skill.duration);
        let debit = prepare_debit(
            &account,
            price,
            Posting::for_booking(LedgerKind::ExchangeRequest, booking_id, req.mentor_id),
            now,
        )?;
        let booking = Booking {
            id: booking_id,
            requester_id: req.requester_id,
            mentor_id: req.mentor_id,
            skill_id: skill.id,
            skill_name: skill.name.clone(),
            duration: skill.duration,
            date: req.date,
            range,
            request_deadline: req.date.and_time(NaiveTime::MIN),
            price,
            status: BookingStatus::Pending,
            message: req.message,
        };

        let event = Event::BookingRequested {
            booking: booking.clone(),
            debit: debit.clone(),
        };
        self.journal_append(&event).await?;
        apply_to_calendar(&mut cal, &event);
        post_entry(&mut account, &debit);
        self.store.apply_shared(&event);
        drop(account);
        drop(cal);

        info!(
            "booking {} requested: {} -> {} on {} {} ({} credits)",
            booking.id, booking.requester_id, booking.mentor_id, booking.date, booking.range, price
        );
        self.notify.send(BookingNotice {
            kind: NoticeKind::BookingCreated,
            booking_id: booking.id,
            actor_id: Some(booking.requester_id),
            target_id: booking.mentor_id,
        });
        Ok(booking)
    }

    /// Move a booking through its lifecycle on behalf of `actor_id`.
    ///
    /// Rejection, cancellation and expiry refund the requester; settlement pays
    /// the mentor. The refund or payout is written in the same record as the
    /// status change.
    pub async fn update_status(
        &self,
        booking_id: Ulid,
        actor_id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        self.transition(booking_id, Some(actor_id), to).await
    }

    async fn transition(
        &self,
        booking_id: Ulid,
        actor: Option<Ulid>,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let mentor_id = self
            .store
            .mentor_of_booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let _gate = self.commit_gate.read().await;
        let calendar = self.store.calendar(mentor_id);
        let mut cal = acquire("calendar", self.lock_timeout, calendar.write()).await?;
        let mut booking = cal
            .get(booking_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        if !booking.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: booking.status,
                to,
            });
        }
        let permitted = match (to.required_actor(), actor) {
            (Actor::System, None) => true,
            (Actor::Mentor, Some(a)) => a == booking.mentor_id,
            (Actor::Either, Some(a)) => booking.is_party(a),
            _ => false,
        };
        if !permitted {
            return Err(EngineError::NotPermitted {
                actor_id: actor,
                status: to,
            });
        }

        let mut payee: Option<OwnedMutexGuard<CreditAccount>> = None;
        let mut posting = None;
        if let Some(kind) = LedgerKind::for_status(to)
            && booking.price > 0
        {
            let (beneficiary, counterpart) = if to == BookingStatus::Settled {
                (booking.mentor_id, booking.requester_id)
            } else {
                (booking.requester_id, booking.mentor_id)
            };
            let shared = self
                .store
                .account(&beneficiary)
                .ok_or(EngineError::AccountNotFound(beneficiary))?;
            let account = acquire("account", self.lock_timeout, shared.lock_owned()).await?;
            posting = Some(prepare_credit(
                &account,
                booking.price,
                Posting::for_booking(kind, booking.id, counterpart),
                self.clock.now(),
            )?);
            payee = Some(account);
        }

        let event = Event::BookingStatusChanged {
            booking_id,
            mentor_id,
            status: to,
            posting: posting.clone(),
        };
        self.journal_append(&event).await?;
        apply_to_calendar(&mut cal, &event);
        if let (Some(account), Some(entry)) = (payee.as_mut(), posting.as_ref()) {
            post_entry(account, entry);
        }
        drop(payee);
        drop(cal);

        let from = booking.status;
        booking.status = to;
        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "status" => to.as_str())
            .increment(1);
        info!("booking {booking_id}: {from} -> {to}");

        let target_id = match actor {
            Some(a) => booking.counterpart_of(a),
            None => booking.requester_id,
        };
        self.notify.send(BookingNotice {
            kind: NoticeKind::StatusChanged(to),
            booking_id,
            actor_id: actor,
            target_id,
        });
        Ok(booking)
    }

    /// PENDING bookings whose response deadline has passed. Calendars busy with
    /// a writer are skipped and picked up on the next sweep.
    pub fn collect_overdue(&self, now: NaiveDateTime) -> Vec<Ulid> {
        let mut overdue = Vec::new();
        for calendar in self.store.calendars() {
            if let Ok(cal) = calendar.try_read() {
                overdue.extend(
                    cal.bookings
                        .iter()
                        .filter(|b| b.status == BookingStatus::Pending && b.request_deadline <= now)
                        .map(|b| b.id),
                );
            }
        }
        overdue
    }

    /// Expire every overdue request, refunding its requester. Returns the ids expired.
    pub async fn expire_overdue(&self) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for booking_id in self.collect_overdue(self.clock.now()) {
            match self.transition(booking_id, None, BookingStatus::Expired).await {
                Ok(_) => expired.push(booking_id),
                // Accepted or canceled since collection.
                Err(e) => debug!("expiry skip {booking_id}: {e}"),
            }
        }
        if !expired.is_empty() {
            metrics::counter!(observability::BOOKINGS_EXPIRED_TOTAL).increment(expired.len() as u64);
        }
        expired
    }

    // ── Journal maintenance ──────────────────────────────────

    /// Rewrite the journal with only the records needed to rebuild current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events: Vec<Event> = self
            .store
            .all_rules()
            .into_iter()
            .map(|rule| Event::RuleAdded { rule })
            .collect();
        events.extend(self.store.skills().into_iter().map(|row| Event::SkillRegistered {
            skill: row.skill.clone(),
        }));
        for shared in self.store.accounts() {
            let account = shared.lock().await;
            events.push(Event::AccountOpened {
                owner_id: account.owner_id,
                reward: None,
            });
            events.extend(
                account
                    .history
                    .iter()
                    .map(|entry| Event::LedgerPosted { entry: entry.clone() }),
            );
        }
        for calendar in self.store.calendars() {
            let cal = calendar.read().await;
            events.extend(
                cal.bookings
                    .iter()
                    .map(|booking| Event::BookingRestored {
                        booking: booking.clone(),
                    }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))?;
        info!("journal compacted to {count} records");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
