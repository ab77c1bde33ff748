use std::collections::HashSet;

use serde::Serialize;
use time::{Date, Duration, Month};

use crate::config::TripWindow;
use crate::gate;
use crate::store::day_format;

/// One cell of the month grid. Cells from adjacent months pad the grid out to
/// whole weeks; they carry `in_month: false` and are never clickable.
#[derive(Debug, Serialize)]
pub(crate) struct DayCell {
    #[serde(with = "day_format")]
    pub(crate) date: Date,
    pub(crate) in_month: bool,
    pub(crate) in_range: bool,
    pub(crate) unlocked: bool,
    pub(crate) clickable: bool,
    pub(crate) has_message: bool,
    pub(crate) has_challenge: bool,
}

/// Lays out a month as Sunday-first weeks, padded on both ends with adjacent
/// month days. Unlock state is derived from the reference day at call time.
pub(crate) fn month_grid(
    year: i32,
    month: Month,
    trip: &TripWindow,
    reference: Date,
    message_days: &HashSet<Date>,
    challenge_days: &HashSet<Date>,
) -> Result<Vec<DayCell>, time::error::ComponentRange> {
    let first = Date::from_calendar_date(year, month, 1)?;
    let last = Date::from_calendar_date(year, month, month.length(year))?;
    let grid_start = first - Duration::days(first.weekday().number_days_from_sunday() as i64);
    let grid_end = last + Duration::days((6 - last.weekday().number_days_from_sunday()) as i64);

    let mut cells = Vec::new();
    let mut day = grid_start;
    while day <= grid_end {
        let in_month = day.month() == month && day.year() == year;
        let in_range = gate::is_in_range(day, trip);
        let unlocked = gate::is_unlocked(day, reference);
        cells.push(DayCell {
            date: day,
            in_month,
            in_range,
            unlocked,
            clickable: in_month && gate::is_clickable(day, trip, reference),
            has_message: message_days.contains(&day),
            has_challenge: challenge_days.contains(&day),
        });
        day += Duration::days(1);
    }
    Ok(cells)
}

/// Parses a "YYYY-MM" month designator.
pub(crate) fn parse_month(raw: &str) -> Option<(i32, Month)> {
    let (year, month) = raw.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let number: u8 = month.parse().ok()?;
    let month = Month::try_from(number).ok()?;
    Some((year, month))
}
