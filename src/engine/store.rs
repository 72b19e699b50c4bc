use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::ledger::apply_entry;

pub type SharedCalendar = Arc<RwLock<Calendar>>;
pub type SharedAccount = Arc<Mutex<CreditAccount>>;

/// A registered skill plus the lease serializing bookings against it.
///
/// Skills are immutable once registered, so readers never touch the lease.
pub struct SkillRow {
    pub skill: Skill,
    pub(super) lease: Mutex<()>,
}

pub type SharedSkill = Arc<SkillRow>;

/// In-memory projection of the journal.
///
/// Calendars and accounts sit behind their own locks; everything else is
/// indexed directly in the maps and updated by `apply_shared`.
#[derive(Default)]
pub struct Store {
    rules: DashMap<Ulid, Vec<AvailabilityRule>>,
    rule_owner: DashMap<Ulid, Ulid>,
    skills: DashMap<Ulid, SharedSkill>,
    calendars: DashMap<Ulid, SharedCalendar>,
    booking_mentor: DashMap<Ulid, Ulid>,
    requester_bookings: DashMap<Ulid, Vec<Ulid>>,
    accounts: DashMap<Ulid, SharedAccount>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a replayed journal. Guarded state is assembled in plain
    /// maps first and wrapped once complete.
    pub fn replay(events: &[Event]) -> Self {
        let store = Self::new();
        let mut calendars: HashMap<Ulid, Calendar> = HashMap::new();
        let mut accounts: HashMap<Ulid, CreditAccount> = HashMap::new();

        for event in events {
            store.apply_shared(event);
            match event {
                Event::AccountOpened { owner_id, reward } => {
                    let account = accounts
                        .entry(*owner_id)
                        .or_insert_with(|| CreditAccount::new(*owner_id));
                    if let Some(entry) = reward {
                        apply_entry(account, entry);
                    }
                }
                Event::LedgerPosted { entry } => {
                    if let Some(account) = accounts.get_mut(&entry.owner_id) {
                        apply_entry(account, entry);
                    }
                }
                Event::BookingRequested { booking, debit } => {
                    let mentor_id = booking.mentor_id;
                    let cal = calendars
                        .entry(mentor_id)
                        .or_insert_with(|| Calendar::new(mentor_id));
                    apply_to_calendar(cal, event);
                    if let Some(account) = accounts.get_mut(&debit.owner_id) {
                        apply_entry(account, debit);
                    }
                }
                Event::BookingRestored { booking } => {
                    let mentor_id = booking.mentor_id;
                    let cal = calendars
                        .entry(mentor_id)
                        .or_insert_with(|| Calendar::new(mentor_id));
                    apply_to_calendar(cal, event);
                }
                Event::BookingStatusChanged {
                    mentor_id, posting, ..
                } => {
                    if let Some(cal) = calendars.get_mut(mentor_id) {
                        apply_to_calendar(cal, event);
                    }
                    if let Some(entry) = posting
                        && let Some(account) = accounts.get_mut(&entry.owner_id)
                    {
                        apply_entry(account, entry);
                    }
                }
                Event::RuleAdded { .. }
                | Event::RuleRemoved { .. }
                | Event::SkillRegistered { .. }
                | Event::SkillRemoved { .. } => {}
            }
        }

        for (mentor_id, cal) in calendars {
            store.calendars.insert(mentor_id, Arc::new(RwLock::new(cal)));
        }
        for (owner_id, account) in accounts {
            store.accounts.insert(owner_id, Arc::new(Mutex::new(account)));
        }
        store
    }

    /// Apply the parts of an event that live directly in the maps: rules,
    /// skills and booking indexes.
    pub fn apply_shared(&self, event: &Event) {
        match event {
            Event::RuleAdded { rule } => {
                self.rule_owner.insert(rule.id, rule.owner_id);
                self.rules.entry(rule.owner_id).or_default().push(rule.clone());
            }
            Event::RuleRemoved { id, owner_id } => {
                self.rule_owner.remove(id);
                if let Some(mut rules) = self.rules.get_mut(owner_id) {
                    rules.retain(|r| r.id != *id);
                }
            }
            Event::SkillRegistered { skill } => {
                self.skills.insert(
                    skill.id,
                    Arc::new(SkillRow {
                        skill: skill.clone(),
                        lease: Mutex::new(()),
                    }),
                );
            }
            Event::SkillRemoved { id } => {
                self.skills.remove(id);
            }
            Event::BookingRequested { booking, .. } | Event::BookingRestored { booking } => {
                self.booking_mentor.insert(booking.id, booking.mentor_id);
                self.requester_bookings
                    .entry(booking.requester_id)
                    .or_default()
                    .push(booking.id);
            }
            Event::AccountOpened { .. }
            | Event::LedgerPosted { .. }
            | Event::BookingStatusChanged { .. } => {}
        }
    }

    // ── Rules ────────────────────────────────────────────────

    pub fn rules_of(&self, owner_id: &Ulid) -> Vec<AvailabilityRule> {
        self.rules
            .get(owner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn rule_count(&self, owner_id: &Ulid) -> usize {
        self.rules.get(owner_id).map_or(0, |e| e.len())
    }

    pub fn owner_of_rule(&self, rule_id: &Ulid) -> Option<Ulid> {
        self.rule_owner.get(rule_id).map(|e| *e.value())
    }

    pub fn all_rules(&self) -> Vec<AvailabilityRule> {
        self.rules.iter().flat_map(|e| e.value().clone()).collect()
    }

    // ── Skills ───────────────────────────────────────────────

    pub fn skill(&self, id: &Ulid) -> Option<SharedSkill> {
        self.skills.get(id).map(|e| e.value().clone())
    }

    pub fn has_skill(&self, id: &Ulid) -> bool {
        self.skills.contains_key(id)
    }

    pub fn skills(&self) -> Vec<SharedSkill> {
        self.skills.iter().map(|e| e.value().clone()).collect()
    }

    // ── Calendars ────────────────────────────────────────────

    /// The mentor's calendar, created empty on first use.
    pub fn calendar(&self, mentor_id: Ulid) -> SharedCalendar {
        self.calendars
            .entry(mentor_id)
            .or_insert_with(|| Arc::new(RwLock::new(Calendar::new(mentor_id))))
            .value()
            .clone()
    }

    pub fn existing_calendar(&self, mentor_id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(mentor_id).map(|e| e.value().clone())
    }

    pub fn calendars(&self) -> Vec<SharedCalendar> {
        self.calendars.iter().map(|e| e.value().clone()).collect()
    }

    pub fn mentor_of_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_mentor.get(booking_id).map(|e| *e.value())
    }

    pub fn bookings_requested_by(&self, requester_id: &Ulid) -> Vec<Ulid> {
        self.requester_bookings
            .get(requester_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Accounts ─────────────────────────────────────────────

    pub fn account(&self, owner_id: &Ulid) -> Option<SharedAccount> {
        self.accounts.get(owner_id).map(|e| e.value().clone())
    }

    pub fn has_account(&self, owner_id: &Ulid) -> bool {
        self.accounts.contains_key(owner_id)
    }

    pub fn insert_account(&self, account: CreditAccount) {
        self.accounts
            .insert(account.owner_id, Arc::new(Mutex::new(account)));
    }

    pub fn accounts(&self) -> Vec<SharedAccount> {
        self.accounts.iter().map(|e| e.value().clone()).collect()
    }

    pub fn account_owners(&self) -> Vec<Ulid> {
        self.accounts.iter().map(|e| *e.key()).collect()
    }
}

/// Apply a booking event to a calendar (caller holds the lock).
pub(crate) fn apply_to_calendar(cal: &mut Calendar, event: &Event) {
    match event {
        Event::BookingRequested { booking, .. } | Event::BookingRestored { booking } => {
            cal.insert(booking.clone());
        }
        Event::BookingStatusChanged {
            booking_id, status, ..
        } => {
            cal.set_status(*booking_id, *status);
        }
        _ => {}
    }
}
