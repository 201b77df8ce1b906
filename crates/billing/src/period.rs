//! Billing period arithmetic.

use time::{Date, Month, OffsetDateTime};

/// Advance a timestamp by exactly one calendar month.
///
/// The renewal path advances `current_period_end` from its *prior* value,
/// not from "now", so a late sweep never drifts the billing anchor. Days
/// past the end of the target month clamp to its last day
/// (Jan 31 -> Feb 28/29).
pub fn add_one_month(ts: OffsetDateTime) -> OffsetDateTime {
    let date = ts.date();
    let mut year = date.year();
    let month = date.month().next();
    if month == Month::January {
        year += 1;
    }

    let day = date.day().min(month.length(year));
    // Day is clamped to the month length above, so construction cannot fail.
    let next = Date::from_calendar_date(year, month, day).unwrap_or(date);
    ts.replace_date(next)
}
