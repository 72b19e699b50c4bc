use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};
use futures::future::join_all;
use ulid::Ulid;

use skillswap::clock::FixedClock;
use skillswap::directory::InMemoryUserDirectory;
use skillswap::engine::{Engine, EngineError, EngineOptions, ErrorKind};
use skillswap::model::{BookingRequest, BookingStatus, Credits, LedgerKind, Skill};
use skillswap::notify::{NoticeKind, NotifyHub};

// ── Test infrastructure ──────────────────────────────────────

struct Harness {
    engine: Arc<Engine>,
    users: Arc<InMemoryUserDirectory>,
    clock: Arc<FixedClock>,
    notify: Arc<NotifyHub>,
    path: PathBuf,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn journal_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("skillswap_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join("skillswap.journal")
}

impl Harness {
    fn start() -> Self {
        let path = journal_path();
        let users = Arc::new(InMemoryUserDirectory::new());
        let clock = Arc::new(FixedClock::at_midnight(date(2026, 1, 20)));
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Self::open(&path, &notify, &users, &clock));
        Self {
            engine,
            users,
            clock,
            notify,
            path,
        }
    }

    fn open(
        path: &Path,
        notify: &Arc<NotifyHub>,
        users: &Arc<InMemoryUserDirectory>,
        clock: &Arc<FixedClock>,
    ) -> Engine {
        Engine::with_options(
            path.to_path_buf(),
            notify.clone(),
            users.clone(),
            EngineOptions {
                lock_timeout: Duration::from_secs(2),
                clock: clock.clone(),
            },
        )
        .unwrap()
    }

    fn restart(&self) -> Engine {
        Self::open(&self.path, &self.notify, &self.users, &self.clock)
    }

    async fn user(&self, credits: Credits) -> Ulid {
        let id = Ulid::new();
        self.users.register(id);
        self.engine.open_account(id, credits).await.unwrap();
        id
    }

    /// A mentor open Sundays and Wednesdays 10:00-12:00 offering one skill.
    async fn mentor(&self, duration: u32) -> (Ulid, Skill) {
        let mentor = self.user(0).await;
        for weekday in [Weekday::Sun, Weekday::Wed] {
            self.engine.add_rule(mentor, weekday, 600, 720).await.unwrap();
        }
        let skill = self
            .engine
            .register_skill(mentor, "Sourdough", duration)
            .await
            .unwrap();
        (mentor, skill)
    }
}

fn request(requester: Ulid, mentor: Ulid, skill: &Skill, on: NaiveDate, start: u32) -> BookingRequest {
    BookingRequest {
        requester_id: requester,
        mentor_id: mentor,
        skill_id: skill.id,
        date: on,
        start,
        message: None,
    }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn five_concurrent_requests_one_booking() {
    let h = Harness::start();
    let (mentor, skill) = h.mentor(60).await;
    let sunday = date(2026, 2, 1);

    let mut requesters = Vec::new();
    for _ in 0..5 {
        requesters.push(h.user(10).await);
    }
    let results = join_all(requesters.iter().map(|&r| {
        let engine = h.engine.clone();
        let req = request(r, mentor, &skill, sunday, 600);
        async move { engine.request_booking(req).await }
    }))
    .await;

    let (ok, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
    assert_eq!(ok.len(), 1);
    assert_eq!(failed.len(), 4);
    for err in failed.into_iter().filter_map(Result::err) {
        assert_eq!(err.kind(), ErrorKind::Conflict, "{err}");
    }

    let bookings = h.engine.bookings_for_mentor(mentor, sunday).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].status, BookingStatus::Pending);

    // Only the winner paid.
    let mut total = 0;
    for r in &requesters {
        total += h.engine.balance(*r).await.unwrap();
    }
    assert_eq!(total, 5 * 10 - 2);
}

#[tokio::test]
async fn concurrent_requests_across_skills_of_one_mentor() {
    let h = Harness::start();
    let (mentor, hour) = h.mentor(60).await;
    let half = h.engine.register_skill(mentor, "Starter care", 30).await.unwrap();
    let sunday = date(2026, 2, 1);
    let a = h.user(10).await;
    let b = h.user(10).await;

    // Different skills, overlapping ranges: the calendar lock still serializes them.
    let results = join_all([
        {
            let engine = h.engine.clone();
            let req = request(a, mentor, &hour, sunday, 600);
            tokio::spawn(async move { engine.request_booking(req).await })
        },
        {
            let engine = h.engine.clone();
            let req = request(b, mentor, &half, sunday, 630);
            tokio::spawn(async move { engine.request_booking(req).await })
        },
    ])
    .await;
    let ok = results
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn request_accept_settle_flow() {
    let h = Harness::start();
    let (mentor, skill) = h.mentor(90).await;
    let learner = h.user(10).await;
    let mut mentor_inbox = h.notify.subscribe(mentor);
    let mut learner_inbox = h.notify.subscribe(learner);

    let slots = h
        .engine
        .available_slots(mentor, skill.id, date(2026, 2, 4))
        .await
        .unwrap();
    let first_free = slots.iter().find(|s| s.is_available).unwrap().time;
    assert_eq!(first_free, 600);

    let booking = h
        .engine
        .request_booking(request(learner, mentor, &skill, date(2026, 2, 4), first_free))
        .await
        .unwrap();
    assert_eq!(booking.price, 3);
    assert_eq!(mentor_inbox.recv().await.unwrap().kind, NoticeKind::BookingCreated);

    h.engine
        .update_status(booking.id, mentor, BookingStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(
        learner_inbox.recv().await.unwrap().kind,
        NoticeKind::StatusChanged(BookingStatus::Accepted)
    );
    h.engine
        .update_status(booking.id, mentor, BookingStatus::Processing)
        .await
        .unwrap();
    h.engine
        .update_status(booking.id, learner, BookingStatus::Completed)
        .await
        .unwrap();
    h.engine
        .update_status(booking.id, learner, BookingStatus::Settled)
        .await
        .unwrap();

    assert_eq!(h.engine.balance(learner).await.unwrap(), 7);
    assert_eq!(h.engine.balance(mentor).await.unwrap(), 3);
    let kinds: Vec<LedgerKind> = h
        .engine
        .ledger_history(learner)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![LedgerKind::SignupReward, LedgerKind::ExchangeRequest]);

    let result = h
        .engine
        .update_status(booking.id, learner, BookingStatus::Canceled)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn restart_restores_bookings_and_balances() {
    let h = Harness::start();
    let (mentor, skill) = h.mentor(30).await;
    let learner = h.user(4).await;
    let sunday = date(2026, 2, 1);

    let kept = h
        .engine
        .request_booking(request(learner, mentor, &skill, sunday, 600))
        .await
        .unwrap();
    let dropped = h
        .engine
        .request_booking(request(learner, mentor, &skill, sunday, 630))
        .await
        .unwrap();
    h.engine
        .update_status(dropped.id, learner, BookingStatus::Canceled)
        .await
        .unwrap();
    h.engine.compact_journal().await.unwrap();
    h.engine
        .update_status(kept.id, mentor, BookingStatus::Accepted)
        .await
        .unwrap();

    let restarted = h.restart();
    assert_eq!(restarted.balance(learner).await.unwrap(), 3);
    assert_eq!(
        restarted.get_booking(kept.id).await.unwrap().status,
        BookingStatus::Accepted
    );
    assert_eq!(
        restarted.get_booking(dropped.id).await.unwrap().status,
        BookingStatus::Canceled
    );
    let slots = restarted.available_slots(mentor, skill.id, sunday).await.unwrap();
    let open: Vec<u32> = slots.iter().filter(|s| s.is_available).map(|s| s.time).collect();
    assert_eq!(open, vec![630, 660, 690]);
    assert_eq!(restarted.bookings_for_requester(learner).await.unwrap().len(), 2);
}

#[tokio::test]
async fn expiry_after_deadline_refunds() {
    let h = Harness::start();
    let (mentor, skill) = h.mentor(60).await;
    let learner = h.user(2).await;
    let wednesday = date(2026, 1, 28);

    let booking = h
        .engine
        .request_booking(request(learner, mentor, &skill, wednesday, 600))
        .await
        .unwrap();
    assert_eq!(h.engine.balance(learner).await.unwrap(), 0);

    h.clock.set(wednesday.and_time(NaiveTime::from_hms_opt(0, 0, 1).unwrap()));
    assert_eq!(h.engine.expire_overdue().await, vec![booking.id]);
    assert_eq!(h.engine.balance(learner).await.unwrap(), 2);

    // Mentor can no longer accept it.
    let result = h
        .engine
        .update_status(booking.id, mentor, BookingStatus::Accepted)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidTransition { .. })));
}
