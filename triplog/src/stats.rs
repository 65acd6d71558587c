//! Today / week / month / year mileage totals over completed trips.

use chrono::TimeZone;
use serde::Serialize;

use crate::calendar::{bucket_starts, BucketStarts};
use crate::model::CompletedTrip;
use crate::time::EpochMs;
use crate::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StatsBucket {
    pub miles: f64,
    pub count: usize,
}

impl StatsBucket {
    fn add(&mut self, miles: f64) {
        self.miles += miles;
        self.count += 1;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TripStats {
    pub today: StatsBucket,
    pub week: StatsBucket,
    pub month: StatsBucket,
    pub year: StatsBucket,
}

/// Aggregate `trips` into calendar buckets around `now` in `tz`.
pub fn aggregate<Tz: TimeZone>(trips: &[CompletedTrip], now: EpochMs, tz: &Tz) -> Result<TripStats> {
    let starts = bucket_starts(now, tz)?;
    Ok(aggregate_from(trips, &starts))
}

/// Each bucket counts a trip independently when its start is at or after
/// the bucket start, so a week that began last month can hold trips the
/// month bucket does not.
pub fn aggregate_from(trips: &[CompletedTrip], starts: &BucketStarts) -> TripStats {
    let mut stats = TripStats::default();
    for trip in trips {
        let at = trip.started_at;
        if at >= starts.today {
            stats.today.add(trip.miles);
        }
        if at >= starts.week {
            stats.week.add(trip.miles);
        }
        if at >= starts.month {
            stats.month.add(trip.miles);
        }
        if at >= starts.year {
            stats.year.add(trip.miles);
        }
    }
    stats
}
