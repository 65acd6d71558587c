//! Core trip tracking library: detects vehicle trips from raw location
//! samples, encodes their routes, and reconciles them with delivery records.

use thiserror::Error;

pub mod calendar;
pub mod config;
pub mod correlate;
pub mod engine;
pub mod filter;
pub mod geo;
pub mod manual;
pub mod model;
pub mod polyline;
pub mod stats;
pub mod store;
pub mod time;

pub use config::TrackingConfig;
pub use correlate::{correlate, CorrelationResult, DEFAULT_TOLERANCE_MS};
pub use engine::{SampleOutcome, TrackingEngine, TrackingEvent};
pub use filter::{RejectReason, SampleFilter};
pub use geo::{distance_meters, meters_to_miles, miles_to_meters};
pub use manual::{build_manual_trip, ManualTripRequest};
pub use model::{
    ActiveTrip, CompletedTrip, DeliveryRecord, LatLng, LocationSample, TrackPoint,
    TrackingSnapshot, TripState,
};
pub use stats::{aggregate, StatsBucket, TripStats};
pub use store::{JsonDirStore, MemoryStore, PersistenceGateway};
pub use time::EpochMs;

#[derive(Error, Debug)]
pub enum TripError {
    #[error("invalid polyline at byte {offset}: {reason}")]
    InvalidPolyline { offset: usize, reason: String },
    #[error("invalid manual trip: {0}")]
    InvalidManualTrip(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = TripError> = std::result::Result<T, E>;
