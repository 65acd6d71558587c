//! Trip detection state machine.
//!
//! [`TrackingEngine`] owns the single IDLE / MOVING / PAUSED tracking state
//! and the active trip. Samples are fed in arrival order through
//! [`TrackingEngine::process_sample`]; each one is either rejected with no
//! side effects or applied to memory and then written through the
//! [`PersistenceGateway`] before the call returns.
//!
//! Transitions use hysteresis: motion must be sustained for
//! `moving_confirm_ms` before a trip starts, stillness for
//! `pause_confirm_ms` since the last state change before it pauses, and a
//! paused trip ends once it has stayed still for
//! `trip_end_ms - pause_confirm_ms` after pausing. Crawling between the two
//! speed thresholds keeps a paused trip open without resuming it.

use std::mem;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::filter::{RejectReason, SampleFilter};
use crate::geo::{distance_between, meters_to_miles, path_distance_meters};
use crate::model::{
    ActiveTrip, CompletedTrip, LatLng, LocationSample, TrackPoint, TripState,
};
use crate::polyline;
use crate::store::PersistenceGateway;
use crate::time::EpochMs;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TrackingEvent {
    #[serde(rename_all = "camelCase")]
    Started { trip_id: String, started_at: EpochMs },
    #[serde(rename_all = "camelCase")]
    Paused { trip_id: String, at: EpochMs },
    #[serde(rename_all = "camelCase")]
    Resumed { trip_id: String, at: EpochMs },
    Ended(CompletedTrip),
    /// Trip ended with fewer than two points; nothing was recorded.
    #[serde(rename_all = "camelCase")]
    Discarded { trip_id: String, at: EpochMs, point_count: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SampleOutcome {
    Rejected(RejectReason),
    Accepted {
        speed_mps: f64,
        event: Option<TrackingEvent>,
    },
}

impl SampleOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, SampleOutcome::Rejected(_))
    }

    pub fn event(&self) -> Option<&TrackingEvent> {
        match self {
            SampleOutcome::Accepted { event, .. } => event.as_ref(),
            SampleOutcome::Rejected(_) => None,
        }
    }

    pub fn into_event(self) -> Option<TrackingEvent> {
        match self {
            SampleOutcome::Accepted { event, .. } => event,
            SampleOutcome::Rejected(_) => None,
        }
    }
}

/// Durable writes owed for one applied step.
enum Write {
    AppendPoints(Vec<TrackPoint>),
    ClearActive,
    SaveState,
}

pub struct TrackingEngine<G: PersistenceGateway> {
    config: TrackingConfig,
    gateway: G,
    filter: SampleFilter,
    state: TripState,
    active: Option<ActiveTrip>,
    /// Fast samples seen in IDLE while motion is being confirmed.
    motion_candidate: Vec<TrackPoint>,
    /// Finished trips the gateway has not stored yet.
    unsaved_trips: Vec<CompletedTrip>,
    /// A previous write failed; the next persist rewrites the full state.
    needs_resync: bool,
}

impl<G: PersistenceGateway> TrackingEngine<G> {
    /// Fresh engine in IDLE. Does not touch storage.
    pub fn new(config: TrackingConfig, gateway: G) -> Result<Self> {
        config.validate()?;
        let filter = SampleFilter::new(&config);
        Ok(Self {
            config,
            gateway,
            filter,
            state: TripState::Idle,
            active: None,
            motion_candidate: Vec::new(),
            unsaved_trips: Vec::new(),
            needs_resync: false,
        })
    }

    /// Engine resumed from the gateway's last saved snapshot, with the
    /// active trip's points reloaded from `active_trip_points`.
    pub fn restore(config: TrackingConfig, gateway: G) -> Result<Self> {
        let mut engine = Self::new(config, gateway)?;
        let Some(snapshot) = engine.gateway.load_state()? else {
            debug!("no saved tracking state; starting idle");
            return Ok(engine);
        };
        match (snapshot.state, snapshot.active_trip) {
            (TripState::Idle, _) => {}
            (state, Some(mut trip)) => {
                let mut points = engine.gateway.active_trip_points()?;
                points.sort_by_key(|p| p.timestamp_ms);
                points.dedup_by_key(|p| p.timestamp_ms);
                thin_points(&mut points, engine.config.max_route_points);
                engine.filter.seed(&points);
                trip.points = points;
                trip.state = state;
                info!(
                    "restored {} trip {} with {} points, {:.2} mi",
                    state.as_str(),
                    trip.id,
                    trip.points.len(),
                    trip.cumulative_miles
                );
                engine.state = state;
                engine.active = Some(trip);
            }
            (state, None) => {
                warn!(
                    "saved state {} has no active trip; starting idle",
                    state.as_str()
                );
            }
        }
        Ok(engine)
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn state(&self) -> TripState {
        self.state
    }

    pub fn active_trip(&self) -> Option<&ActiveTrip> {
        self.active.as_ref()
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    pub fn into_gateway(self) -> G {
        self.gateway
    }

    pub fn unsaved_trip_count(&self) -> usize {
        self.unsaved_trips.len()
    }

    /// Filter one sample and advance the state machine.
    ///
    /// Persistence errors are returned after the in-memory state has been
    /// updated; the engine stays authoritative and re-persists on the next
    /// successful write.
    pub fn process_sample(&mut self, sample: &LocationSample) -> Result<SampleOutcome> {
        let filtered = match self.filter.evaluate(sample) {
            Ok(filtered) => filtered,
            Err(reason) => {
                debug!("rejected sample at {}: {}", sample.timestamp_ms, reason);
                return Ok(SampleOutcome::Rejected(reason));
            }
        };
        if filtered.overridden {
            debug!(
                "sensor speed {:?} replaced by smoothed {:.2} m/s",
                sample.speed, filtered.point.speed_mps
            );
        }
        let point = filtered.point;
        self.filter.accept(point);

        let mut writes = Vec::new();
        let event = match self.state {
            TripState::Idle => self.on_idle(point, &mut writes),
            TripState::Moving => self.on_moving(point, &mut writes),
            TripState::Paused => self.on_paused(point, &mut writes),
        };
        self.persist(writes)?;
        Ok(SampleOutcome::Accepted {
            speed_mps: point.speed_mps,
            event,
        })
    }

    /// End a paused trip whose stillness window has elapsed by `now`,
    /// for when the platform stops delivering fixes to a parked device.
    pub fn check_timeout(&mut self, now: EpochMs) -> Result<Option<TrackingEvent>> {
        if self.state != TripState::Paused {
            return Ok(None);
        }
        let Some(paused_at) = self.active.as_ref().map(paused_since) else {
            return Ok(None);
        };
        if now.since(paused_at) < self.config.paused_end_ms() {
            return Ok(None);
        }
        debug!("paused trip timed out at {}", now);
        let mut writes = Vec::new();
        let event = self.finish_trip(now, &mut writes);
        self.persist(writes)?;
        Ok(event)
    }

    /// Stop tracking: finalize any active trip at `now` and return to IDLE.
    pub fn stop(&mut self, now: EpochMs) -> Result<Option<TrackingEvent>> {
        let mut writes = Vec::new();
        let event = if self.active.is_some() {
            let end = self
                .active
                .as_ref()
                .and_then(|t| t.last_point())
                .map(|p| p.timestamp_ms.max(now))
                .unwrap_or(now);
            self.finish_trip(end, &mut writes)
        } else {
            None
        };
        self.motion_candidate.clear();
        self.filter.reset();
        self.persist(writes)?;
        Ok(event)
    }

    /// Drop the active trip without recording it.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(trip) = self.active.take() {
            warn!("discarding active trip {} on reset", trip.id);
        }
        self.state = TripState::Idle;
        self.motion_candidate.clear();
        self.filter.reset();
        self.persist(vec![Write::ClearActive, Write::SaveState])
    }

    fn on_idle(&mut self, point: TrackPoint, writes: &mut Vec<Write>) -> Option<TrackingEvent> {
        if point.speed_mps <= self.config.moving_speed_mps {
            if !self.motion_candidate.is_empty() {
                debug!(
                    "motion candidate reset after {} samples",
                    self.motion_candidate.len()
                );
                self.motion_candidate.clear();
            }
            return None;
        }
        self.motion_candidate.push(point);
        let first_moving = self.motion_candidate[0].timestamp_ms;
        if point.timestamp_ms.since(first_moving) < self.config.moving_confirm_ms {
            return None;
        }
        Some(self.start_trip(first_moving, point.timestamp_ms, writes))
    }

    fn start_trip(
        &mut self,
        started_at: EpochMs,
        confirmed_at: EpochMs,
        writes: &mut Vec<Write>,
    ) -> TrackingEvent {
        let mut points = mem::take(&mut self.motion_candidate);
        let positions: Vec<LatLng> = points.iter().map(TrackPoint::position).collect();
        let cumulative_miles = meters_to_miles(path_distance_meters(&positions));
        writes.push(Write::AppendPoints(points.clone()));
        thin_points(&mut points, self.config.max_route_points);
        let trip = ActiveTrip {
            id: Uuid::new_v4().to_string(),
            started_at,
            points,
            cumulative_miles,
            state: TripState::Moving,
            state_changed_at: confirmed_at,
            last_moving_at: Some(confirmed_at),
            paused_at: None,
        };
        info!(
            "trip {} started at {} ({} seed points, {:.2} mi)",
            trip.id,
            started_at,
            trip.points.len(),
            cumulative_miles
        );
        let event = TrackingEvent::Started {
            trip_id: trip.id.clone(),
            started_at,
        };
        self.state = TripState::Moving;
        self.active = Some(trip);
        writes.push(Write::SaveState);
        event
    }

    fn on_moving(&mut self, point: TrackPoint, writes: &mut Vec<Write>) -> Option<TrackingEvent> {
        let Some(trip) = self.active.as_mut() else {
            warn!("MOVING without an active trip; falling back to idle");
            self.state = TripState::Idle;
            return self.on_idle(point, writes);
        };
        append_point(trip, point, self.config.max_route_points);
        writes.push(Write::AppendPoints(vec![point]));

        let now = point.timestamp_ms;
        let mut event = None;
        if point.speed_mps > self.config.moving_speed_mps {
            trip.state_changed_at = now;
            trip.last_moving_at = Some(now);
        } else if point.speed_mps < self.config.stationary_speed_mps
            && now.since(trip.state_changed_at) >= self.config.pause_confirm_ms
        {
            trip.state = TripState::Paused;
            trip.paused_at = Some(now);
            trip.state_changed_at = now;
            info!("trip {} paused at {}", trip.id, now);
            event = Some(TrackingEvent::Paused {
                trip_id: trip.id.clone(),
                at: now,
            });
            self.state = TripState::Paused;
        }
        writes.push(Write::SaveState);
        event
    }

    fn on_paused(&mut self, point: TrackPoint, writes: &mut Vec<Write>) -> Option<TrackingEvent> {
        let Some(trip) = self.active.as_mut() else {
            warn!("PAUSED without an active trip; falling back to idle");
            self.state = TripState::Idle;
            return self.on_idle(point, writes);
        };
        let now = point.timestamp_ms;
        if point.speed_mps > self.config.moving_speed_mps {
            append_point(trip, point, self.config.max_route_points);
            trip.state = TripState::Moving;
            trip.paused_at = None;
            trip.state_changed_at = now;
            trip.last_moving_at = Some(now);
            info!("trip {} resumed at {}", trip.id, now);
            let event = TrackingEvent::Resumed {
                trip_id: trip.id.clone(),
                at: now,
            };
            self.state = TripState::Moving;
            writes.push(Write::AppendPoints(vec![point]));
            writes.push(Write::SaveState);
            return Some(event);
        }
        if point.speed_mps >= self.config.stationary_speed_mps {
            // Crawling: keep the distance and restart the stillness clock.
            append_point(trip, point, self.config.max_route_points);
            trip.state_changed_at = now;
            writes.push(Write::AppendPoints(vec![point]));
            writes.push(Write::SaveState);
            return None;
        }
        if now.since(paused_since(trip)) >= self.config.paused_end_ms() {
            return self.finish_trip(now, writes);
        }
        None
    }

    /// Close the active trip at `ended_at` and return to IDLE.
    fn finish_trip(&mut self, ended_at: EpochMs, writes: &mut Vec<Write>) -> Option<TrackingEvent> {
        let trip = self.active.take()?;
        self.state = TripState::Idle;
        self.motion_candidate.clear();
        writes.push(Write::ClearActive);
        writes.push(Write::SaveState);

        if trip.points.len() < 2 {
            warn!(
                "discarding trip {} with {} point(s)",
                trip.id,
                trip.points.len()
            );
            return Some(TrackingEvent::Discarded {
                trip_id: trip.id,
                at: ended_at,
                point_count: trip.points.len(),
            });
        }

        let completed = complete_trip(trip, ended_at);
        info!(
            "trip {} ended at {}: {:.2} mi over {} points",
            completed.id, ended_at, completed.miles, completed.point_count
        );
        self.unsaved_trips.push(completed.clone());
        Some(TrackingEvent::Ended(completed))
    }

    fn persist(&mut self, writes: Vec<Write>) -> Result<()> {
        let result = self.apply_writes(writes);
        if let Err(err) = &result {
            warn!("persistence failed, will resync on next write: {}", err);
            self.needs_resync = true;
        }
        result
    }

    fn apply_writes(&mut self, writes: Vec<Write>) -> Result<()> {
        while let Some(trip) = self.unsaved_trips.first() {
            self.gateway.save_completed_trip(trip)?;
            self.unsaved_trips.remove(0);
        }
        if self.needs_resync {
            self.resync()?;
            return Ok(());
        }
        for write in writes {
            match write {
                Write::AppendPoints(points) => {
                    for p in &points {
                        self.gateway.append_point(p)?;
                    }
                }
                Write::ClearActive => self.gateway.clear_active_trip()?,
                Write::SaveState => self.gateway.save_state(self.state, self.active.as_ref())?,
            }
        }
        Ok(())
    }

    /// Rewrite the stored point buffer and snapshot from memory.
    fn resync(&mut self) -> Result<()> {
        self.gateway.clear_active_trip()?;
        if let Some(trip) = &self.active {
            for p in &trip.points {
                self.gateway.append_point(p)?;
            }
        }
        self.gateway.save_state(self.state, self.active.as_ref())?;
        self.needs_resync = false;
        info!("storage resynced in state {}", self.state.as_str());
        Ok(())
    }
}

/// Start of the current stillness stretch of a paused trip.
fn paused_since(trip: &ActiveTrip) -> EpochMs {
    trip.state_changed_at
}

fn append_point(trip: &mut ActiveTrip, point: TrackPoint, max_points: usize) {
    if let Some(last) = trip.last_point() {
        let meters = distance_between(last.position(), point.position());
        trip.cumulative_miles += meters_to_miles(meters);
    }
    trip.points.push(point);
    thin_points(&mut trip.points, max_points);
}

/// Halve an over-full buffer by dropping every second interior point.
fn thin_points(points: &mut Vec<TrackPoint>, max_points: usize) {
    if points.len() <= max_points {
        return;
    }
    let Some(last) = points.last().copied() else {
        return;
    };
    let before = points.len();
    let mut idx = 0usize;
    points.retain(|_| {
        let keep = idx % 2 == 0;
        idx += 1;
        keep
    });
    if points.last() != Some(&last) {
        points.push(last);
    }
    debug!("thinned route buffer from {} to {} points", before, points.len());
}

fn complete_trip(trip: ActiveTrip, ended_at: EpochMs) -> CompletedTrip {
    let positions: Vec<LatLng> = trip.points.iter().map(TrackPoint::position).collect();
    let first = positions.first().copied().unwrap_or_default();
    let last = positions.last().copied().unwrap_or_default();
    CompletedTrip {
        id: trip.id,
        started_at: trip.started_at,
        ended_at,
        miles: trip.cumulative_miles,
        start_lat: first.lat,
        start_lng: first.lng,
        end_lat: last.lat,
        end_lng: last.lng,
        point_count: positions.len(),
        is_manual: false,
        encoded_route: Some(polyline::encode(&positions)),
    }
}
