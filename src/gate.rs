use time::Date;

use crate::config::TripWindow;

/// True iff the day falls inside the trip window, inclusive on both ends.
pub(crate) fn is_in_range(day: Date, window: &TripWindow) -> bool {
    window.start <= day && day <= window.end
}

/// The reference day and everything before it are unlocked; strictly future
/// days never are.
pub(crate) fn is_unlocked(day: Date, reference_day: Date) -> bool {
    day <= reference_day
}

/// Only clickable days may navigate to day detail.
pub(crate) fn is_clickable(day: Date, window: &TripWindow, reference_day: Date) -> bool {
    is_in_range(day, window) && is_unlocked(day, reference_day)
}
