use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::engine::Engine;

const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that periodically expires booking requests past their deadline.
pub async fn run_expirer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let expired = engine.expire_overdue().await;
        if !expired.is_empty() {
            info!("expired {} overdue booking requests", expired.len());
        }
    }
}

/// Background task that compacts the journal once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("journal compaction complete");
        }
    }
}

/// Compact when at least `threshold` records were appended since the last run.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => true,
        Err(e) => {
            error!("journal compaction failed after {appends} appends: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, FixedClock};
    use crate::directory::InMemoryUserDirectory;
    use crate::engine::EngineOptions;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::{NaiveDate, NaiveTime, Weekday};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("skillswap_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn expirer_sweeps_overdue_requests() {
        let path = test_journal_path("expirer.journal");
        let users = Arc::new(InMemoryUserDirectory::new());
        let today = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        let clock = Arc::new(FixedClock::at_midnight(today));
        let engine = Arc::new(
            Engine::with_options(
                path,
                Arc::new(NotifyHub::new()),
                users.clone(),
                EngineOptions {
                    lock_timeout: Duration::from_secs(1),
                    clock: clock.clone(),
                },
            )
            .unwrap(),
        );

        let mentor = Ulid::new();
        let requester = Ulid::new();
        users.register(mentor);
        users.register(requester);
        engine.open_account(mentor, 0).await.unwrap();
        engine.open_account(requester, 5).await.unwrap();
        engine.add_rule(mentor, Weekday::Sun, 600, 720).await.unwrap();
        let skill = engine.register_skill(mentor, "Pottery", 30).await.unwrap();

        let date = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let booking = engine
            .request_booking(BookingRequest {
                requester_id: requester,
                mentor_id: mentor,
                skill_id: skill.id,
                date,
                start: 600,
                message: None,
            })
            .await
            .unwrap();
        assert!(engine.collect_overdue(clock.now()).is_empty());

        clock.set(date.and_time(NaiveTime::MIN));
        assert_eq!(engine.collect_overdue(clock.now()), vec![booking.id]);

        let handle = tokio::spawn(run_expirer(engine.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(
            engine.get_booking(booking.id).await.unwrap().status,
            BookingStatus::Expired
        );
        assert_eq!(engine.balance(requester).await.unwrap(), 5);
        assert!(engine.collect_overdue(clock.now()).is_empty());
    }

    #[tokio::test]
    async fn compactor_respects_threshold() {
        let path = test_journal_path("compactor.journal");
        let users = Arc::new(InMemoryUserDirectory::new());
        let engine = Engine::new(path, Arc::new(NotifyHub::new()), users.clone()).unwrap();
        let owner = Ulid::new();
        users.register(owner);
        for _ in 0..3 {
            engine.add_rule(owner, Weekday::Mon, 0, 60).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 10).await);
        assert_eq!(engine.journal_appends_since_compact().await, 3);
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        assert_eq!(engine.list_rules(owner).len(), 3);
    }
}
