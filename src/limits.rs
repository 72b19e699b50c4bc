use crate::model::Minute;

/// Booking quantum. Every operating window and booking is walked in steps of this size.
pub const SLOT_GRANULARITY: Minute = 30;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Bookings open this many days after today (short-notice bookings are refused).
pub const BOOKING_LEAD_DAYS: u64 = 2;

/// Last bookable day, counted from today. Bounds the cost of rule expansion.
pub const BOOKING_HORIZON_DAYS: u64 = 90;

pub const MAX_RULES_PER_OWNER: usize = 128;
pub const MAX_SKILL_NAME_LEN: usize = 100;
pub const MAX_MESSAGE_LEN: usize = 500;
