//! Records shared between the tracking engine, the stores, and the
//! read-side aggregations. Everything persisted serializes as camelCase JSON.

use serde::{Deserialize, Serialize};

use crate::polyline;
use crate::time::EpochMs;
use crate::{Result, TripError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One raw fix from the platform location service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: EpochMs,
    /// Sensor-reported ground speed; `None` means unknown.
    #[serde(default, alias = "speedMetersPerSecond")]
    pub speed: Option<f64>,
    #[serde(alias = "horizontalAccuracyMeters")]
    pub accuracy_meters: f64,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: u64, speed: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp_ms: EpochMs(timestamp_ms),
            speed,
            accuracy_meters: 5.0,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// An accepted sample as stored in a trip's point buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub lat: f64,
    pub lng: f64,
    pub timestamp_ms: EpochMs,
    pub speed_mps: f64,
}

impl TrackPoint {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripState {
    #[default]
    Idle,
    Moving,
    Paused,
}

impl TripState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripState::Idle => "IDLE",
            TripState::Moving => "MOVING",
            TripState::Paused => "PAUSED",
        }
    }
}

/// The trip currently being recorded. `points` is persisted separately,
/// one `append_point` at a time, and is therefore skipped by serde.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrip {
    pub id: String,
    pub started_at: EpochMs,
    #[serde(skip)]
    pub points: Vec<TrackPoint>,
    pub cumulative_miles: f64,
    pub state: TripState,
    pub state_changed_at: EpochMs,
    #[serde(default)]
    pub last_moving_at: Option<EpochMs>,
    #[serde(default)]
    pub paused_at: Option<EpochMs>,
}

impl ActiveTrip {
    pub fn last_point(&self) -> Option<&TrackPoint> {
        self.points.last()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTrip {
    pub id: String,
    pub started_at: EpochMs,
    pub ended_at: EpochMs,
    pub miles: f64,
    pub start_lat: f64,
    pub start_lng: f64,
    pub end_lat: f64,
    pub end_lng: f64,
    pub point_count: usize,
    pub is_manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_route: Option<String>,
}

impl CompletedTrip {
    pub fn duration_ms(&self) -> u64 {
        self.ended_at.since(self.started_at)
    }

    /// Decoded route geometry; empty for manual trips.
    pub fn decode_route(&self) -> Result<Vec<LatLng>> {
        match self.encoded_route.as_deref() {
            Some(encoded) => polyline::decode(encoded),
            None => Ok(Vec::new()),
        }
    }

    /// Copy of this trip with user-corrected mileage.
    pub fn with_edited_miles(&self, miles: f64) -> Result<CompletedTrip> {
        if !miles.is_finite() || miles <= 0.0 {
            return Err(TripError::InvalidParameter(format!(
                "edited miles must be positive, got {miles}"
            )));
        }
        Ok(CompletedTrip {
            miles,
            ..self.clone()
        })
    }

    /// Copy of this trip with user-corrected start/end instants.
    pub fn with_edited_times(&self, started_at: EpochMs, ended_at: EpochMs) -> Result<CompletedTrip> {
        if ended_at <= started_at {
            return Err(TripError::InvalidParameter(format!(
                "trip end {ended_at} must be after start {started_at}"
            )));
        }
        Ok(CompletedTrip {
            started_at,
            ended_at,
            ..self.clone()
        })
    }
}

/// Externally recorded delivery; only `id` and `delivered_at` drive matching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    /// ISO-8601 instant.
    pub delivered_at: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub earnings: f64,
}

/// What `save_state` persists and `load_state` hands back on restart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub state: TripState,
    #[serde(default)]
    pub active_trip: Option<ActiveTrip>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_accepts_null_speed_and_alias_names() {
        let json = r#"{"latitude":37.1,"longitude":-122.2,"timestampMs":1000,"speed":null,"accuracyMeters":8.0}"#;
        let sample: LocationSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.speed, None);
        assert_eq!(sample.timestamp_ms, EpochMs(1000));

        let json = r#"{"latitude":1.0,"longitude":2.0,"timestampMs":5,"speedMetersPerSecond":3.5,"horizontalAccuracyMeters":4.0}"#;
        let sample: LocationSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.speed, Some(3.5));
        assert_eq!(sample.accuracy_meters, 4.0);
    }

    #[test]
    fn snapshot_omits_point_buffer() {
        let trip = ActiveTrip {
            id: "t1".into(),
            started_at: EpochMs(10),
            points: vec![TrackPoint {
                lat: 1.0,
                lng: 2.0,
                timestamp_ms: EpochMs(10),
                speed_mps: 9.0,
            }],
            cumulative_miles: 0.5,
            state: TripState::Moving,
            state_changed_at: EpochMs(10),
            last_moving_at: Some(EpochMs(10)),
            paused_at: None,
        };
        let snapshot = TrackingSnapshot {
            state: TripState::Moving,
            active_trip: Some(trip),
        };
        let text = serde_json::to_string(&snapshot).unwrap();
        assert!(text.contains("\"state\":\"MOVING\""));
        assert!(!text.contains("points"));
        let back: TrackingSnapshot = serde_json::from_str(&text).unwrap();
        assert!(back.active_trip.unwrap().points.is_empty());
    }

    #[test]
    fn edits_validate_input() {
        let trip = CompletedTrip {
            id: "m".into(),
            started_at: EpochMs(1_000),
            ended_at: EpochMs(2_000),
            miles: 3.0,
            start_lat: 0.0,
            start_lng: 0.0,
            end_lat: 0.0,
            end_lng: 0.0,
            point_count: 0,
            is_manual: true,
            encoded_route: None,
        };
        assert_eq!(trip.with_edited_miles(4.5).unwrap().miles, 4.5);
        assert!(trip.with_edited_miles(0.0).is_err());
        assert!(trip.with_edited_times(EpochMs(5), EpochMs(5)).is_err());
        let moved = trip.with_edited_times(EpochMs(0), EpochMs(60_000)).unwrap();
        assert_eq!(moved.duration_ms(), 60_000);
        assert!(trip.decode_route().unwrap().is_empty());
    }
}
