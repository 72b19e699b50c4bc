use chrono::{Datelike, Days, NaiveDate};

use crate::limits::{BOOKING_HORIZON_DAYS, BOOKING_LEAD_DAYS};
use crate::model::*;

// ── Rule expansion ───────────────────────────────────────────────

/// Inclusive `[today + lead, today + horizon]` range of bookable dates.
pub fn rolling_window(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_add_days(Days::new(BOOKING_LEAD_DAYS))
        .unwrap_or(NaiveDate::MAX);
    let end = today
        .checked_add_days(Days::new(BOOKING_HORIZON_DAYS))
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

pub fn in_window(today: NaiveDate, date: NaiveDate) -> bool {
    let (start, end) = rolling_window(today);
    start <= date && date <= end
}

/// Project weekly rules onto every date of `[start, end]`.
///
/// Output is sorted by `(date, start time)`. Overlapping rules are not merged;
/// each one produces its own instance. No rules yields an empty vec.
pub fn expand(rules: &[AvailabilityRule], start: NaiveDate, end: NaiveDate) -> Vec<ExpandedSlot> {
    let mut by_weekday: [Vec<TimeRange>; 7] = Default::default();
    for rule in rules {
        by_weekday[rule.weekday.num_days_from_monday() as usize].push(rule.range);
    }
    if by_weekday.iter().all(Vec::is_empty) || start > end {
        return Vec::new();
    }
    for ranges in &mut by_weekday {
        ranges.sort();
    }

    let mut out = Vec::new();
    for date in start.iter_days().take_while(|d| *d <= end) {
        let weekday = date.weekday();
        for &range in &by_weekday[weekday.num_days_from_monday() as usize] {
            out.push(ExpandedSlot {
                date,
                weekday,
                range,
            });
        }
    }
    out
}

/// Expand over the rolling window anchored at `today`.
pub fn expand_rolling(rules: &[AvailabilityRule], today: NaiveDate) -> Vec<ExpandedSlot> {
    let (start, end) = rolling_window(today);
    expand(rules, start, end)
}

/// Instances on a single date, or nothing if the date is outside the window.
pub fn expand_on(rules: &[AvailabilityRule], today: NaiveDate, date: NaiveDate) -> Vec<ExpandedSlot> {
    if !in_window(today, date) {
        return Vec::new();
    }
    expand(rules, date, date)
}
