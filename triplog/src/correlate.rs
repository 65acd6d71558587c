//! Matches completed trips to delivery records by time.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::model::{CompletedTrip, DeliveryRecord};
use crate::time::EpochMs;

/// Five minutes either side of a trip.
pub const DEFAULT_TOLERANCE_MS: u64 = 300_000;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationResult {
    pub trip_id: String,
    pub delivery_ids: Vec<String>,
    pub delivery_count: usize,
    pub total_earnings: f64,
}

/// For every trip, collect the deliveries whose timestamp falls inside
/// `[started_at - tolerance, ended_at + tolerance]`, bounds included.
///
/// Trips without matches are left out. A delivery may be claimed by
/// several trips when their windows overlap. Deliveries with unreadable
/// timestamps are skipped.
pub fn correlate(
    trips: &[CompletedTrip],
    deliveries: &[DeliveryRecord],
    tolerance_ms: u64,
) -> BTreeMap<String, CorrelationResult> {
    let timed: Vec<(EpochMs, &DeliveryRecord)> = deliveries
        .iter()
        .filter_map(|d| match EpochMs::parse_iso8601(&d.delivered_at) {
            Ok(at) => Some((at, d)),
            Err(e) => {
                warn!("skipping delivery {}: {}", d.id, e);
                None
            }
        })
        .collect();

    let mut out = BTreeMap::new();
    for trip in trips {
        let from = trip.started_at.minus_millis(tolerance_ms);
        let to = trip.ended_at.plus_millis(tolerance_ms);
        let matched: Vec<&DeliveryRecord> = timed
            .iter()
            .filter(|(at, _)| *at >= from && *at <= to)
            .map(|(_, d)| *d)
            .collect();
        if matched.is_empty() {
            continue;
        }
        out.insert(
            trip.id.clone(),
            CorrelationResult {
                trip_id: trip.id.clone(),
                delivery_ids: matched.iter().map(|d| d.id.clone()).collect(),
                delivery_count: matched.len(),
                total_earnings: matched.iter().map(|d| d.earnings).sum(),
            },
        );
    }
    out
}
