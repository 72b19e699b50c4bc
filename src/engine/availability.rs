use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;

use crate::model::*;

// ── Slot quantization ─────────────────────────────────────────────

/// Start times of every granularity step the mentor operates on `date`.
///
/// Overlapping rules contribute duplicate steps; they are left in place and
/// collapse under the set lookups below.
pub fn operating_slots(instances: &[ExpandedSlot], date: NaiveDate, granularity: Minute) -> Vec<Minute> {
    instances
        .iter()
        .filter(|i| i.date == date)
        .flat_map(|i| i.range.steps(granularity))
        .collect()
}

/// Steps already consumed by slot-holding bookings. Callers pass the bookings of
/// a single date.
pub fn booked_slots<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    granularity: Minute,
) -> HashSet<Minute> {
    bookings
        .into_iter()
        .filter(|b| b.status.holds_slot())
        .flat_map(|b| b.range.steps(granularity))
        .collect()
}

/// Whether a `duration`-long session starting at `start` runs entirely through
/// operating, unbooked steps.
pub fn run_is_free(
    operating: &HashSet<Minute>,
    booked: &HashSet<Minute>,
    start: Minute,
    duration: Minute,
    granularity: Minute,
) -> bool {
    let needed = duration / granularity;
    (0..needed)
        .map(|k| start + k * granularity)
        .all(|t| operating.contains(&t) && !booked.contains(&t))
}

/// One entry per distinct operating start time, ascending, flagged with whether
/// a session of `duration` minutes fits there.
pub fn slot_availability(
    operating: &[Minute],
    booked: &HashSet<Minute>,
    duration: Minute,
    granularity: Minute,
) -> Vec<SlotAvailability> {
    let lookup: HashSet<Minute> = operating.iter().copied().collect();
    let starts: BTreeSet<Minute> = operating.iter().copied().collect();
    starts
        .into_iter()
        .map(|time| SlotAvailability {
            time,
            is_available: run_is_free(&lookup, booked, time, duration, granularity),
        })
        .collect()
}
