use serde::{Deserialize, Serialize};

use crate::{Result, TripError};

/// Tunable thresholds for sample filtering and trip detection.
///
/// Speeds are in m/s, durations in milliseconds. Defaults are the
/// empirically tuned values used for passenger cars.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    pub moving_speed_mps: f64,
    pub stationary_speed_mps: f64,
    pub moving_confirm_ms: u64,
    pub pause_confirm_ms: u64,
    pub trip_end_ms: u64,
    /// Resolved speeds above this are treated as location jumps.
    pub max_plausible_speed_mps: f64,
    /// Sensor speed is replaced by the smoothed speed beyond this divergence.
    pub speed_override_delta_mps: f64,
    pub smoothing_window: usize,
    pub max_route_points: usize,
    pub max_accuracy_m: Option<f64>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            moving_speed_mps: 6.7,
            stationary_speed_mps: 2.0,
            moving_confirm_ms: 30_000,
            pause_confirm_ms: 120_000,
            trip_end_ms: 300_000,
            max_plausible_speed_mps: 44.7,
            speed_override_delta_mps: 5.0,
            smoothing_window: 3,
            max_route_points: 20_000,
            max_accuracy_m: None,
        }
    }
}

impl TrackingConfig {
    /// Time a paused trip must stay still before it ends.
    pub fn paused_end_ms(&self) -> u64 {
        self.trip_end_ms.saturating_sub(self.pause_confirm_ms)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: TrackingConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let speeds = [
            ("movingSpeedMps", self.moving_speed_mps),
            ("stationarySpeedMps", self.stationary_speed_mps),
            ("maxPlausibleSpeedMps", self.max_plausible_speed_mps),
            ("speedOverrideDeltaMps", self.speed_override_delta_mps),
        ];
        for (name, value) in speeds {
            if !value.is_finite() || value < 0.0 {
                return Err(TripError::InvalidParameter(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if self.stationary_speed_mps > self.moving_speed_mps {
            return Err(TripError::InvalidParameter(format!(
                "stationarySpeedMps ({}) exceeds movingSpeedMps ({})",
                self.stationary_speed_mps, self.moving_speed_mps
            )));
        }
        if self.moving_speed_mps >= self.max_plausible_speed_mps {
            return Err(TripError::InvalidParameter(format!(
                "movingSpeedMps ({}) must be below maxPlausibleSpeedMps ({})",
                self.moving_speed_mps, self.max_plausible_speed_mps
            )));
        }
        if self.trip_end_ms < self.pause_confirm_ms {
            return Err(TripError::InvalidParameter(format!(
                "tripEndMs ({}) is shorter than pauseConfirmMs ({})",
                self.trip_end_ms, self.pause_confirm_ms
            )));
        }
        if self.smoothing_window < 2 {
            return Err(TripError::InvalidParameter(
                "smoothingWindow must hold at least 2 points".into(),
            ));
        }
        if self.max_route_points < 2 {
            return Err(TripError::InvalidParameter(
                "maxRoutePoints must be at least 2".into(),
            ));
        }
        if let Some(acc) = self.max_accuracy_m {
            if !acc.is_finite() || acc <= 0.0 {
                return Err(TripError::InvalidParameter(format!(
                    "maxAccuracyM must be positive, got {acc}"
                )));
            }
        }
        Ok(())
    }
}
