//! Wall-clock helpers shared by the engine and the trip actions.
//!
//! A trip stores its departure as a calendar date plus a local `HH:MM` string.
//! Everything that needs the effective departure moment goes through
//! [`departure_instant`] so reminders, auto-start and repairs agree.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;

use crate::error::AppError;

/// Parses a strict `HH:MM` (24h) string.
pub fn parse_hhmm(time: &str) -> Result<NaiveTime, AppError> {
    let invalid = || AppError::BadRequest(format!("invalid departure time {time:?}, expected HH:MM"));
    let (hours, minutes) = time.trim().split_once(':').ok_or_else(invalid)?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return Err(invalid());
    }
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(hours, minutes, 0).ok_or_else(invalid)
}

/// Canonical zero-padded form of a departure time, e.g. `7:05` becomes `07:05`.
pub fn normalize_hhmm(time: &str) -> Result<String, AppError> {
    Ok(parse_hhmm(time)?.format("%H:%M").to_string())
}

/// Keeps the year/month/day of `date` and replaces the time of day with `time`,
/// seconds and sub-seconds zeroed. Any time-of-day already carried by `date` is discarded.
pub fn combine_date_and_time<D: Datelike>(date: &D, time: &str) -> Result<NaiveDateTime, AppError> {
    let day = NaiveDate::from_ymd_opt(date.year(), date.month(), date.day())
        .ok_or_else(|| AppError::BadRequest("invalid departure date".into()))?;
    Ok(day.and_time(parse_hhmm(time)?))
}

/// Resolves the local departure wall-clock time in `tz` to an absolute instant.
pub fn departure_instant<D: Datelike>(
    date: &D,
    time: &str,
    tz: Tz,
) -> Result<DateTime<Utc>, AppError> {
    let local = combine_date_and_time(date, time)?;
    resolve_local(local, tz)
}

pub fn resolve_local(local: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, AppError> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(at) => Ok(at.with_timezone(&Utc)),
        // DST fall-back: the first occurrence is the earliest the trip can start.
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(AppError::BadRequest(format!(
            "{local} does not exist in {tz} (daylight saving gap)"
        ))),
    }
}

/// Local calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Local calendar dates touched by the half-open window `[now, now + span]`.
pub fn local_date_window(now: DateTime<Utc>, span: Duration, tz: Tz) -> (NaiveDate, NaiveDate) {
    (local_date(now, tz), local_date(now + span, tz))
}

/// Monday and Friday of the working week containing `date`. Sundays belong to
/// the week that just ended.
pub fn work_week(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(4))
}

/// `HH:MM` of `now` on the local wall clock.
pub fn wall_clock_hhmm(now: DateTime<Utc>, tz: Tz) -> String {
    let local = now.with_timezone(&tz);
    format!("{:02}:{:02}", local.hour(), local.minute())
}

pub fn format_local_date(date: &NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}
