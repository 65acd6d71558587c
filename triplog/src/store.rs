//! Durable storage contract for the tracking engine and two backends:
//! an in-memory fake and a directory of JSON files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{ActiveTrip, CompletedTrip, TrackPoint, TrackingSnapshot, TripState};
use crate::{Result, TripError};

const STATE_FILE: &str = "state.json";
const POINTS_FILE: &str = "active_points.jsonl";
const TRIPS_FILE: &str = "trips.json";

/// Narrow read/write contract the engine needs from storage.
pub trait PersistenceGateway {
    fn append_point(&mut self, point: &TrackPoint) -> Result<()>;
    fn active_trip_points(&self) -> Result<Vec<TrackPoint>>;
    fn clear_active_trip(&mut self) -> Result<()>;
    /// Store a finished trip. Saving a trip whose id already exists replaces it.
    fn save_completed_trip(&mut self, trip: &CompletedTrip) -> Result<()>;
    fn completed_trips(&self) -> Result<Vec<CompletedTrip>>;
    fn load_state(&self) -> Result<Option<TrackingSnapshot>>;
    fn save_state(&mut self, state: TripState, active: Option<&ActiveTrip>) -> Result<()>;
}

fn snapshot_of(state: TripState, active: Option<&ActiveTrip>) -> TrackingSnapshot {
    TrackingSnapshot {
        state,
        active_trip: active.cloned().map(|mut trip| {
            trip.points.clear();
            trip
        }),
    }
}

fn upsert(trips: &mut Vec<CompletedTrip>, trip: &CompletedTrip) {
    match trips.iter_mut().find(|t| t.id == trip.id) {
        Some(existing) => *existing = trip.clone(),
        None => trips.push(trip.clone()),
    }
}

/// In-memory store used by tests and dry runs. Writes can be made to fail
/// to exercise the engine's error path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    points: Vec<TrackPoint>,
    trips: Vec<CompletedTrip>,
    snapshot: Option<TrackingSnapshot>,
    fail_writes: bool,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trips(trips: Vec<CompletedTrip>) -> Self {
        Self {
            trips,
            ..Self::default()
        }
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Number of successful write calls.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn write_guard(&mut self, op: &str) -> Result<()> {
        if self.fail_writes {
            return Err(TripError::Persistence(format!("{op}: injected failure")));
        }
        self.writes += 1;
        Ok(())
    }
}

impl PersistenceGateway for MemoryStore {
    fn append_point(&mut self, point: &TrackPoint) -> Result<()> {
        self.write_guard("append_point")?;
        self.points.push(*point);
        Ok(())
    }

    fn active_trip_points(&self) -> Result<Vec<TrackPoint>> {
        Ok(self.points.clone())
    }

    fn clear_active_trip(&mut self) -> Result<()> {
        self.write_guard("clear_active_trip")?;
        self.points.clear();
        Ok(())
    }

    fn save_completed_trip(&mut self, trip: &CompletedTrip) -> Result<()> {
        self.write_guard("save_completed_trip")?;
        upsert(&mut self.trips, trip);
        Ok(())
    }

    fn completed_trips(&self) -> Result<Vec<CompletedTrip>> {
        Ok(self.trips.clone())
    }

    fn load_state(&self) -> Result<Option<TrackingSnapshot>> {
        Ok(self.snapshot.clone())
    }

    fn save_state(&mut self, state: TripState, active: Option<&ActiveTrip>) -> Result<()> {
        self.write_guard("save_state")?;
        self.snapshot = Some(snapshot_of(state, active));
        Ok(())
    }
}

/// Directory-backed store:
///
/// - `state.json`: latest [`TrackingSnapshot`]
/// - `active_points.jsonl`: one [`TrackPoint`] per line, append-only
/// - `trips.json`: array of [`CompletedTrip`]
///
/// Whole-file writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let file = match File::open(self.path(name)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl PersistenceGateway for JsonDirStore {
    fn append_point(&mut self, point: &TrackPoint) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(POINTS_FILE))?;
        let mut line = serde_json::to_vec(point)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    fn active_trip_points(&self) -> Result<Vec<TrackPoint>> {
        let file = match File::open(self.path(POINTS_FILE)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut points = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TrackPoint>(&line) {
                Ok(point) => points.push(point),
                // A crash mid-append leaves a torn last line.
                Err(e) => warn!("skipping unreadable point on line {}: {}", idx + 1, e),
            }
        }
        debug!("loaded {} active trip points from {}", points.len(), self.dir.display());
        Ok(points)
    }

    fn clear_active_trip(&mut self) -> Result<()> {
        match fs::remove_file(self.path(POINTS_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_completed_trip(&mut self, trip: &CompletedTrip) -> Result<()> {
        let mut trips = self.completed_trips()?;
        upsert(&mut trips, trip);
        self.write_json(TRIPS_FILE, &trips)
    }

    fn completed_trips(&self) -> Result<Vec<CompletedTrip>> {
        Ok(self.read_json(TRIPS_FILE)?.unwrap_or_default())
    }

    fn load_state(&self) -> Result<Option<TrackingSnapshot>> {
        self.read_json(STATE_FILE)
    }

    fn save_state(&mut self, state: TripState, active: Option<&ActiveTrip>) -> Result<()> {
        self.write_json(STATE_FILE, &snapshot_of(state, active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::EpochMs;
    use tempfile::TempDir;

    fn point(t: u64) -> TrackPoint {
        TrackPoint {
            lat: 37.0 + t as f64 * 1e-4,
            lng: -122.0,
            timestamp_ms: EpochMs(t),
            speed_mps: 9.0,
        }
    }

    fn trip(id: &str, miles: f64) -> CompletedTrip {
        CompletedTrip {
            id: id.into(),
            started_at: EpochMs(0),
            ended_at: EpochMs(60_000),
            miles,
            start_lat: 1.0,
            start_lng: 2.0,
            end_lat: 3.0,
            end_lng: 4.0,
            point_count: 2,
            is_manual: false,
            encoded_route: Some("_p~iF~ps|U".into()),
        }
    }

    fn active() -> ActiveTrip {
        ActiveTrip {
            id: "a1".into(),
            started_at: EpochMs(1_000),
            points: vec![point(1_000)],
            cumulative_miles: 0.25,
            state: TripState::Paused,
            state_changed_at: EpochMs(9_000),
            last_moving_at: Some(EpochMs(2_000)),
            paused_at: Some(EpochMs(9_000)),
        }
    }

    #[test]
    fn dir_store_round_trips_everything() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonDirStore::open(temp_dir.path().join("db")).unwrap();

        assert!(store.load_state().unwrap().is_none());
        assert!(store.active_trip_points().unwrap().is_empty());
        assert!(store.completed_trips().unwrap().is_empty());

        store.append_point(&point(1)).unwrap();
        store.append_point(&point(2)).unwrap();
        assert_eq!(store.active_trip_points().unwrap(), vec![point(1), point(2)]);

        store.save_state(TripState::Paused, Some(&active())).unwrap();
        let snapshot = store.load_state().unwrap().unwrap();
        assert_eq!(snapshot.state, TripState::Paused);
        let restored = snapshot.active_trip.unwrap();
        assert!(restored.points.is_empty());
        assert_eq!(restored.paused_at, Some(EpochMs(9_000)));

        store.save_completed_trip(&trip("t1", 3.0)).unwrap();
        store.save_completed_trip(&trip("t2", 4.0)).unwrap();
        store.save_completed_trip(&trip("t1", 5.0)).unwrap();
        let trips = store.completed_trips().unwrap();
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].miles, 5.0);

        store.clear_active_trip().unwrap();
        store.clear_active_trip().unwrap();
        assert!(store.active_trip_points().unwrap().is_empty());
        assert!(!temp_dir.path().join("db").join("state.tmp").exists());
    }

    #[test]
    fn dir_store_skips_torn_point_line() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = JsonDirStore::open(temp_dir.path()).unwrap();
        store.append_point(&point(1)).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(temp_dir.path().join(POINTS_FILE))
            .unwrap();
        file.write_all(b"{\"lat\":37.0,\"ln").unwrap();
        assert_eq!(store.active_trip_points().unwrap(), vec![point(1)]);
    }

    #[test]
    fn memory_store_injects_failures() {
        let mut store = MemoryStore::new();
        store.append_point(&point(1)).unwrap();
        store.set_fail_writes(true);
        assert!(matches!(
            store.save_completed_trip(&trip("x", 1.0)),
            Err(TripError::Persistence(_))
        ));
        assert!(store.completed_trips().unwrap().is_empty());
        store.set_fail_writes(false);
        store.save_state(TripState::Idle, None).unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.load_state().unwrap().unwrap().state, TripState::Idle);
    }
}
