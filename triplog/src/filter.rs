//! Per-sample validation and speed resolution.
//!
//! The filter keeps the last few accepted points and derives a smoothed
//! speed from them. The sensor's own speed is trusted unless it disagrees
//! with the smoothed value by more than the configured delta. Samples whose
//! leg from the last accepted point, or whose resolved speed, is implausible
//! (a location jump) are rejected before they can touch trip state.

use std::collections::VecDeque;
use std::fmt;

use crate::config::TrackingConfig;
use crate::geo::distance_between;
use crate::model::{LocationSample, TrackPoint};
use crate::time::EpochMs;

#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    InvalidCoordinates,
    InvalidSpeed,
    InvalidAccuracy,
    LowAccuracy { accuracy_m: f64 },
    OutOfOrder { last: EpochMs, got: EpochMs },
    ImplausibleSpeed { speed_mps: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidCoordinates => write!(f, "coordinates missing or out of range"),
            RejectReason::InvalidSpeed => write!(f, "sensor speed is not a number"),
            RejectReason::InvalidAccuracy => write!(f, "accuracy is not a non-negative number"),
            RejectReason::LowAccuracy { accuracy_m } => {
                write!(f, "horizontal accuracy {accuracy_m:.1} m too coarse")
            }
            RejectReason::OutOfOrder { last, got } => {
                write!(f, "timestamp {got} not after last accepted {last}")
            }
            RejectReason::ImplausibleSpeed { speed_mps } => {
                write!(f, "implied speed {speed_mps:.1} m/s outside plausible range")
            }
        }
    }
}

/// Result of running one sample through the filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilteredSample {
    pub point: TrackPoint,
    pub smoothed_speed: Option<f64>,
    /// True when the sensor speed was replaced by the smoothed speed.
    pub overridden: bool,
}

#[derive(Clone, Debug)]
pub struct SampleFilter {
    window: VecDeque<TrackPoint>,
    capacity: usize,
    max_plausible_speed_mps: f64,
    speed_override_delta_mps: f64,
    max_accuracy_m: Option<f64>,
}

impl SampleFilter {
    pub fn new(config: &TrackingConfig) -> Self {
        let capacity = config.smoothing_window.max(2);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            max_plausible_speed_mps: config.max_plausible_speed_mps,
            speed_override_delta_mps: config.speed_override_delta_mps,
            max_accuracy_m: config.max_accuracy_m,
        }
    }

    /// Classify `sample` without changing the window.
    pub fn evaluate(&self, sample: &LocationSample) -> Result<FilteredSample, RejectReason> {
        if !valid_coordinates(sample.latitude, sample.longitude) {
            return Err(RejectReason::InvalidCoordinates);
        }
        if sample.speed.is_some_and(|s| !s.is_finite()) {
            return Err(RejectReason::InvalidSpeed);
        }
        if !sample.accuracy_meters.is_finite() || sample.accuracy_meters < 0.0 {
            return Err(RejectReason::InvalidAccuracy);
        }
        if let Some(limit) = self.max_accuracy_m {
            if sample.accuracy_meters > limit {
                return Err(RejectReason::LowAccuracy {
                    accuracy_m: sample.accuracy_meters,
                });
            }
        }
        if let Some(last) = self.window.back() {
            if sample.timestamp_ms <= last.timestamp_ms {
                return Err(RejectReason::OutOfOrder {
                    last: last.timestamp_ms,
                    got: sample.timestamp_ms,
                });
            }
        }

        let mut candidate = TrackPoint {
            lat: sample.latitude,
            lng: sample.longitude,
            timestamp_ms: sample.timestamp_ms,
            speed_mps: 0.0,
        };
        // A single jump leg must not hide inside the window average.
        if let Some(last) = self.window.back() {
            let leg_mps = distance_between(last.position(), candidate.position())
                / candidate.timestamp_ms.seconds_since(last.timestamp_ms);
            if leg_mps > self.max_plausible_speed_mps {
                return Err(RejectReason::ImplausibleSpeed { speed_mps: leg_mps });
            }
        }
        let skip = self.window.len().saturating_sub(self.capacity - 1);
        let smoothed = smoothed_speed(
            self.window
                .iter()
                .skip(skip)
                .chain(std::iter::once(&candidate)),
        );

        let (speed, overridden) = match (sample.speed, smoothed) {
            (Some(sensor), Some(avg)) if (sensor - avg).abs() > self.speed_override_delta_mps => {
                (avg, true)
            }
            (Some(sensor), _) => (sensor, false),
            (None, avg) => (avg.unwrap_or(0.0), false),
        };
        if !(0.0..=self.max_plausible_speed_mps).contains(&speed) {
            return Err(RejectReason::ImplausibleSpeed { speed_mps: speed });
        }

        candidate.speed_mps = speed;
        Ok(FilteredSample {
            point: candidate,
            smoothed_speed: smoothed,
            overridden,
        })
    }

    /// Record an accepted point in the rolling window.
    pub fn accept(&mut self, point: TrackPoint) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(point);
    }

    /// Re-seed the window, e.g. from a restored trip's point buffer.
    pub fn seed(&mut self, points: &[TrackPoint]) {
        self.window.clear();
        let start = points.len().saturating_sub(self.capacity);
        self.window.extend(points[start..].iter().copied());
    }

    /// Smoothed speed over the accepted window alone.
    pub fn smoothed_speed(&self) -> Option<f64> {
        smoothed_speed(self.window.iter())
    }

    pub fn last_accepted(&self) -> Option<&TrackPoint> {
        self.window.back()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

fn valid_coordinates(lat: f64, lng: f64) -> bool {
    lat.is_finite() && lng.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

/// Total distance over total elapsed time; `None` with fewer than two
/// points or no elapsed time.
fn smoothed_speed<'a>(points: impl Iterator<Item = &'a TrackPoint>) -> Option<f64> {
    let mut first: Option<&TrackPoint> = None;
    let mut prev: Option<&TrackPoint> = None;
    let mut meters = 0.0;
    for p in points {
        if let Some(q) = prev {
            meters += distance_between(q.position(), p.position());
        } else {
            first = Some(p);
        }
        prev = Some(p);
    }
    let (first, last) = (first?, prev?);
    let secs = last.timestamp_ms.seconds_since(first.timestamp_ms);
    if secs <= 0.0 {
        return None;
    }
    Some(meters / secs)
}
