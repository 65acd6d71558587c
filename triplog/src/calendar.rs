//! Calendar bucket boundaries in an explicit time zone.

use chrono::{Datelike, Days, NaiveDate, NaiveTime, TimeDelta, TimeZone};
use serde::Serialize;

use crate::time::EpochMs;
use crate::{Result, TripError};

/// Start instants of the periods containing some reference instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketStarts {
    pub today: EpochMs,
    /// Monday 00:00 (ISO week).
    pub week: EpochMs,
    pub month: EpochMs,
    pub year: EpochMs,
}

pub fn bucket_starts<Tz: TimeZone>(now: EpochMs, tz: &Tz) -> Result<BucketStarts> {
    let date = local_date(now, tz)?;
    let week_date = date
        .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
        .ok_or_else(|| out_of_range(now))?;
    let month_date = date.with_day(1).ok_or_else(|| out_of_range(now))?;
    let year_date = NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(|| out_of_range(now))?;
    Ok(BucketStarts {
        today: local_midnight(date, tz)?,
        week: local_midnight(week_date, tz)?,
        month: local_midnight(month_date, tz)?,
        year: local_midnight(year_date, tz)?,
    })
}

/// Calendar date of `at` in `tz`.
pub fn local_date<Tz: TimeZone>(at: EpochMs, tz: &Tz) -> Result<NaiveDate> {
    let utc = at.to_utc().ok_or_else(|| out_of_range(at))?;
    Ok(utc.with_timezone(tz).date_naive())
}

pub fn local_midnight<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<EpochMs> {
    local_instant(date, NaiveTime::MIN, tz)
}

/// Resolve a wall-clock time in `tz`. Ambiguous times take the earlier
/// instant; times inside a DST gap move forward to the first valid minute.
pub fn local_instant<Tz: TimeZone>(date: NaiveDate, time: NaiveTime, tz: &Tz) -> Result<EpochMs> {
    let wall = date.and_time(time);
    for minutes in (0..=180).step_by(15) {
        let candidate = wall + TimeDelta::minutes(minutes);
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return EpochMs::from_datetime(&dt);
        }
    }
    Err(TripError::InvalidTimestamp(format!(
        "{wall} does not exist in the requested time zone"
    )))
}

fn out_of_range(at: EpochMs) -> TripError {
    TripError::InvalidTimestamp(format!("{} ms is outside the supported calendar range", at.as_millis()))
}
