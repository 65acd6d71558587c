//! Trips entered by hand, bypassing the tracking engine.

use chrono::{NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::calendar::local_instant;
use crate::model::CompletedTrip;
use crate::time::EpochMs;
use crate::{Result, TripError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualTripRequest {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub miles: f64,
}

impl ManualTripRequest {
    /// Check the request and resolve its wall-clock times in `tz`.
    pub fn validate<Tz: TimeZone>(&self, tz: &Tz, now: EpochMs) -> Result<(EpochMs, EpochMs)> {
        if !self.miles.is_finite() || self.miles <= 0.0 {
            return Err(TripError::InvalidManualTrip(format!(
                "miles must be greater than zero, got {}",
                self.miles
            )));
        }
        if self.end <= self.start {
            return Err(TripError::InvalidManualTrip(format!(
                "end time {} must be after start time {}",
                self.end, self.start
            )));
        }
        let started_at = local_instant(self.date, self.start, tz)?;
        let ended_at = local_instant(self.date, self.end, tz)?;
        // Both times can land on the same instant inside a DST gap.
        if ended_at <= started_at {
            return Err(TripError::InvalidManualTrip(format!(
                "{} to {} on {} is empty in this time zone",
                self.start, self.end, self.date
            )));
        }
        if ended_at > now {
            return Err(TripError::InvalidManualTrip(format!(
                "trip on {} ending at {} is in the future",
                self.date, self.end
            )));
        }
        Ok((started_at, ended_at))
    }
}

/// Validate `request` and build the record for it. Manual trips carry no
/// route and use (0, 0) as their start and end coordinates.
pub fn build_manual_trip<Tz: TimeZone>(
    request: &ManualTripRequest,
    tz: &Tz,
    now: EpochMs,
) -> Result<CompletedTrip> {
    let (started_at, ended_at) = request.validate(tz, now)?;
    let trip = CompletedTrip {
        id: Uuid::new_v4().to_string(),
        started_at,
        ended_at,
        miles: request.miles,
        start_lat: 0.0,
        start_lng: 0.0,
        end_lat: 0.0,
        end_lng: 0.0,
        point_count: 0,
        is_manual: true,
        encoded_route: None,
    };
    info!(
        "manual trip {} on {}: {:.2} mi",
        trip.id, request.date, trip.miles
    );
    Ok(trip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(miles: f64, start: (u32, u32), end: (u32, u32)) -> ManualTripRequest {
        ManualTripRequest {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            miles,
        }
    }

    fn now() -> EpochMs {
        EpochMs::parse_rfc3339("2025-01-16T08:00:00Z").unwrap()
    }

    #[test]
    fn builds_sentinel_trip() {
        let trip = build_manual_trip(&request(25.5, (10, 0), (11, 30)), &Utc, now()).unwrap();
        assert!(trip.is_manual);
        assert_eq!(trip.point_count, 0);
        assert_eq!(
            (trip.start_lat, trip.start_lng, trip.end_lat, trip.end_lng),
            (0.0, 0.0, 0.0, 0.0)
        );
        assert_eq!(trip.started_at, EpochMs::parse_rfc3339("2025-01-15T10:00:00Z").unwrap());
        assert_eq!(trip.ended_at, EpochMs::parse_rfc3339("2025-01-15T11:30:00Z").unwrap());
        assert_eq!(trip.duration_ms(), 90 * 60 * 1000);
        assert_eq!(trip.miles, 25.5);
        assert!(trip.encoded_route.is_none());
    }

    #[test]
    fn times_resolve_in_the_given_zone() {
        let chicago = chrono_tz::America::Chicago;
        let trip = build_manual_trip(&request(3.0, (10, 0), (11, 30)), &chicago, now()).unwrap();
        assert_eq!(trip.started_at, EpochMs::parse_rfc3339("2025-01-15T16:00:00Z").unwrap());
    }

    #[test]
    fn rejects_invalid_requests() {
        let invalid = [
            request(0.0, (10, 0), (11, 0)),
            request(-2.0, (10, 0), (11, 0)),
            request(f64::NAN, (10, 0), (11, 0)),
            request(5.0, (11, 0), (11, 0)),
            request(5.0, (12, 0), (11, 0)),
        ];
        for req in invalid {
            assert!(
                matches!(build_manual_trip(&req, &Utc, now()), Err(TripError::InvalidManualTrip(_))),
                "{req:?} should be rejected"
            );
        }
        let early = EpochMs::parse_rfc3339("2025-01-15T09:00:00Z").unwrap();
        assert!(matches!(
            build_manual_trip(&request(5.0, (10, 0), (11, 0)), &Utc, early),
            Err(TripError::InvalidManualTrip(_))
        ));
    }

    #[test]
    fn rejects_trip_still_in_progress() {
        let noon = EpochMs::parse_rfc3339("2025-01-15T12:00:00Z").unwrap();
        assert!(matches!(
            build_manual_trip(&request(5.0, (10, 0), (23, 0)), &Utc, noon),
            Err(TripError::InvalidManualTrip(_))
        ));
        assert!(build_manual_trip(&request(5.0, (10, 0), (12, 0)), &Utc, noon).is_ok());
    }

    #[test]
    fn rejects_times_collapsed_by_dst_gap() {
        // 02:00-03:00 does not exist in New York on 2025-03-09.
        let ny = chrono_tz::America::New_York;
        let req = ManualTripRequest {
            date: NaiveDate::from_ymd_opt(2025, 3, 9).unwrap(),
            start: NaiveTime::from_hms_opt(2, 10, 0).unwrap(),
            end: NaiveTime::from_hms_opt(2, 40, 0).unwrap(),
            miles: 3.0,
        };
        let later = EpochMs::parse_rfc3339("2025-03-10T00:00:00Z").unwrap();
        assert!(matches!(
            build_manual_trip(&req, &ny, later),
            Err(TripError::InvalidManualTrip(_))
        ));
    }
}
