use time::{Date, OffsetDateTime, Time};
use time_tz::{OffsetDateTimeExt, Tz};

use crate::ports::TimeProvider;

/// Current instant expressed in the reference zone's wall clock.
pub(crate) fn zoned_now<T: TimeProvider>(time: &T, zone: &'static Tz) -> OffsetDateTime {
    time.now().to_timezone(zone)
}

/// Canonical "today" for unlock purposes. Content drops once per day at the
/// cutoff hour in the reference zone; before that hour the previous day's gate
/// still applies, so both users see the same unlock state no matter where they
/// are. Exactly at the cutoff counts as after it. Across a daylight-saving
/// transition the zone's wall-clock cutoff is used as-is.
pub(crate) fn reference_day<T: TimeProvider>(
    time: &T,
    zone: &'static Tz,
    cutoff_hour: u8,
) -> Date {
    let now = zoned_now(time, zone);
    // Cutoff hour is validated at the configuration edge; midnight disables
    // the shift entirely, which fails closed.
    let cutoff = Time::from_hms(cutoff_hour, 0, 0).unwrap_or(Time::MIDNIGHT);
    if now.time() < cutoff {
        // previous_day is None only at Date::MIN.
        now.date().previous_day().unwrap_or_else(|| now.date())
    } else {
        now.date()
    }
}
