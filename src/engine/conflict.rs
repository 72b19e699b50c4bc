use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::NaiveDate;

use crate::limits::{MINUTES_PER_DAY, SLOT_GRANULARITY};
use crate::model::*;

use super::availability::operating_slots;
use super::EngineError;

/// Await a lock for at most `timeout`, surfacing a stuck acquisition as an error.
pub(crate) async fn acquire<G>(
    what: &'static str,
    timeout: Duration,
    lock: impl Future<Output = G>,
) -> Result<G, EngineError> {
    match tokio::time::timeout(timeout, lock).await {
        Ok(guard) => Ok(guard),
        Err(_) => {
            tracing::warn!("lock timeout after {timeout:?} on {what}");
            metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL, "resource" => what)
                .increment(1);
            Err(EngineError::LockTimeout(what))
        }
    }
}

/// Session range for a skill starting at `start`, rejecting sessions that run past midnight.
pub(crate) fn session_range(start: Minute, duration: Minute) -> Result<TimeRange, EngineError> {
    match start.checked_add(duration) {
        Some(end) if duration > 0 && end <= MINUTES_PER_DAY => Ok(TimeRange::new(start, end)),
        _ => Err(EngineError::CrossesMidnight { start, duration }),
    }
}

/// Re-check a requested session against the mentor's schedule and calendar.
///
/// Every granularity step of `range` must be an operating step on `date`, and
/// none may be held by a slot-holding booking.
pub(crate) fn check_slot(
    calendar: &Calendar,
    instances: &[ExpandedSlot],
    date: NaiveDate,
    range: TimeRange,
) -> Result<(), EngineError> {
    let operating: HashSet<Minute> = operating_slots(instances, date, SLOT_GRANULARITY)
        .into_iter()
        .collect();
    let wanted: Vec<Minute> = (0..range.duration() / SLOT_GRANULARITY)
        .map(|k| range.start + k * SLOT_GRANULARITY)
        .collect();
    if !wanted.iter().all(|t| operating.contains(t)) {
        return Err(EngineError::SlotUnavailable { date, range });
    }

    for existing in calendar.holding_on(date) {
        if existing
            .range
            .steps(SLOT_GRANULARITY)
            .any(|t| wanted.contains(&t))
        {
            return Err(EngineError::SlotAlreadyBooked {
                booking_id: existing.id,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    fn sunday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    fn window(start: Minute, end: Minute) -> ExpandedSlot {
        ExpandedSlot {
            date: sunday(),
            weekday: Weekday::Sun,
            range: TimeRange::new(start, end),
        }
    }

    fn calendar_with(ranges: &[(Minute, Minute, BookingStatus)]) -> Calendar {
        let mentor_id = Ulid::new();
        let mut cal = Calendar::new(mentor_id);
        for &(start, end, status) in ranges {
            cal.insert(Booking {
                id: Ulid::new(),
                requester_id: Ulid::new(),
                mentor_id,
                skill_id: Ulid::new(),
                skill_name: "Go".into(),
                duration: end - start,
                date: sunday(),
                range: TimeRange::new(start, end),
                request_deadline: sunday().and_time(chrono::NaiveTime::MIN),
                price: price_for(end - start),
                status,
                message: None,
            });
        }
        cal
    }

    #[test]
    fn session_range_rejects_midnight_crossing() {
        assert_eq!(session_range(1380, 60).unwrap(), TimeRange::new(1380, 1440));
        assert!(matches!(
            session_range(1410, 60),
            Err(EngineError::CrossesMidnight { start: 1410, duration: 60 })
        ));
    }

    #[test]
    fn session_range_rejects_start_past_end_of_day() {
        assert!(matches!(
            session_range(u32::MAX - 10, 30),
            Err(EngineError::CrossesMidnight { .. })
        ));
        assert!(session_range(MINUTES_PER_DAY, 30).is_err());
    }

    #[test]
    fn fits_inside_window() {
        let cal = calendar_with(&[]);
        assert!(check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(600, 660)).is_ok());
    }

    #[test]
    fn tail_outside_window_is_unavailable() {
        let cal = calendar_with(&[]);
        let result = check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(690, 750));
        assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
    }

    #[test]
    fn unaligned_start_is_unavailable() {
        let cal = calendar_with(&[]);
        let result = check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(615, 645));
        assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
    }

    #[test]
    fn overlap_with_active_booking_conflicts() {
        let cal = calendar_with(&[(630, 690, BookingStatus::Accepted)]);
        let result = check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(600, 660));
        assert!(matches!(result, Err(EngineError::SlotAlreadyBooked { .. })));
    }

    #[test]
    fn adjacent_booking_does_not_conflict() {
        let cal = calendar_with(&[(660, 720, BookingStatus::Pending)]);
        assert!(check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(600, 660)).is_ok());
    }

    #[test]
    fn released_booking_frees_slot() {
        let cal = calendar_with(&[(600, 660, BookingStatus::Rejected)]);
        assert!(check_slot(&cal, &[window(600, 720)], sunday(), TimeRange::new(600, 660)).is_ok());
    }

    #[tokio::test]
    async fn acquire_times_out() {
        let lock = tokio::sync::Mutex::new(());
        let _held = lock.lock().await;
        let result = acquire("skill", Duration::from_millis(20), lock.lock()).await;
        assert!(matches!(result, Err(EngineError::LockTimeout("skill"))));
    }
}
