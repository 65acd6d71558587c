use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use triplog::{
    aggregate, build_manual_trip, correlate, DeliveryRecord, EpochMs, JsonDirStore,
    LocationSample, ManualTripRequest, PersistenceGateway, SampleOutcome, TrackingConfig,
    TrackingEngine, DEFAULT_TOLERANCE_MS,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Mileage trip tracking CLI", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Feed a location sample log through the tracking engine
    Replay(ReplayArgs),
    /// Print today/week/month/year mileage totals
    Stats(StatsArgs),
    /// Match stored trips to delivery records by time
    Correlate(CorrelateArgs),
    /// Record a trip entered by hand
    Manual(ManualArgs),
    /// Correct the mileage or times of a stored trip
    Edit(EditArgs),
    /// Decode a stored trip's route to JSON coordinates
    Route(RouteArgs),
}

#[derive(Parser, Debug)]
struct StoreArgs {
    /// Directory holding tracking state and completed trips
    #[arg(long, default_value = "triplog-data", value_hint = ValueHint::DirPath)]
    store: PathBuf,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// Samples as a JSON array or one JSON object per line
    #[arg(value_hint = ValueHint::FilePath)]
    samples: PathBuf,

    #[command(flatten)]
    store: StoreArgs,

    /// TrackingConfig JSON; flags below override its fields
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Speed (m/s) above which the vehicle counts as moving
    #[arg(long)]
    moving_speed: Option<f64>,

    /// Speed (m/s) below which the vehicle counts as stationary
    #[arg(long)]
    stationary_speed: Option<f64>,

    /// Reject fixes with a horizontal accuracy worse than this (meters)
    #[arg(long)]
    max_accuracy: Option<f64>,

    /// Finalize any active trip after the last sample
    #[arg(long, action = ArgAction::SetTrue)]
    stop: bool,
}

#[derive(Parser, Debug)]
struct StatsArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// IANA time zone for calendar buckets
    #[arg(long, default_value = "UTC")]
    tz: String,

    /// Reference instant (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<String>,
}

#[derive(Parser, Debug)]
struct CorrelateArgs {
    /// Delivery records as a JSON array
    #[arg(value_hint = ValueHint::FilePath)]
    deliveries: PathBuf,

    #[command(flatten)]
    store: StoreArgs,

    /// Slack either side of each trip (seconds)
    #[arg(long, default_value_t = DEFAULT_TOLERANCE_MS / 1000)]
    tolerance_secs: u64,
}

#[derive(Parser, Debug)]
struct ManualArgs {
    #[command(flatten)]
    store: StoreArgs,

    /// Local calendar date (YYYY-MM-DD)
    #[arg(long)]
    date: NaiveDate,

    /// Local start time (HH:MM or HH:MM:SS)
    #[arg(long, value_parser = parse_clock)]
    start: NaiveTime,

    /// Local end time (HH:MM or HH:MM:SS)
    #[arg(long, value_parser = parse_clock)]
    end: NaiveTime,

    /// Distance driven in miles
    #[arg(long)]
    miles: f64,

    /// IANA time zone the date and times are given in
    #[arg(long, default_value = "UTC")]
    tz: String,

    /// Reference instant (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<String>,
}

#[derive(Parser, Debug)]
struct EditArgs {
    /// Id of the stored trip
    trip_id: String,

    #[command(flatten)]
    store: StoreArgs,

    /// Replacement distance in miles
    #[arg(long)]
    miles: Option<f64>,

    /// Replacement start instant (RFC 3339)
    #[arg(long, requires = "ended_at")]
    started_at: Option<String>,

    /// Replacement end instant (RFC 3339)
    #[arg(long, requires = "started_at")]
    ended_at: Option<String>,
}

#[derive(Parser, Debug)]
struct RouteArgs {
    /// Id of the stored trip
    trip_id: String,

    #[command(flatten)]
    store: StoreArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Replay(args) => handle_replay(args),
        Command::Stats(args) => handle_stats(args),
        Command::Correlate(args) => handle_correlate(args),
        Command::Manual(args) => handle_manual(args),
        Command::Edit(args) => handle_edit(args),
        Command::Route(args) => handle_route(args),
    }
}

fn handle_replay(args: ReplayArgs) -> Result<()> {
    let config = load_config(&args)?;
    let samples = read_samples(&args.samples)?;
    let store = open_store(&args.store.store)?;
    let mut engine = TrackingEngine::restore(config, store)
        .with_context(|| format!("failed to restore state from {}", args.store.store.display()))?;
    info!(
        "Replaying {} samples from {} (state {})",
        samples.len(),
        args.samples.display(),
        engine.state().as_str()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let (mut accepted, mut rejected) = (0usize, 0usize);
    for sample in &samples {
        let outcome = match engine.process_sample(sample) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Sample at {} not persisted: {}", sample.timestamp_ms, err);
                continue;
            }
        };
        match outcome {
            SampleOutcome::Rejected(_) => rejected += 1,
            SampleOutcome::Accepted { event, .. } => {
                accepted += 1;
                if let Some(event) = event {
                    write_json_line(&mut out, &event)?;
                }
            }
        }
    }

    if let Some(last) = samples.last() {
        if let Some(event) = engine.check_timeout(last.timestamp_ms)? {
            write_json_line(&mut out, &event)?;
        }
    }
    if args.stop {
        let now = match samples.last() {
            Some(last) => last.timestamp_ms,
            None => EpochMs::from_datetime(&Utc::now())?,
        };
        if let Some(event) = engine.stop(now)? {
            write_json_line(&mut out, &event)?;
        }
    }

    info!(
        "Accepted {} samples, rejected {}; final state {}",
        accepted,
        rejected,
        engine.state().as_str()
    );
    if engine.unsaved_trip_count() > 0 {
        warn!(
            "{} completed trip(s) could not be saved",
            engine.unsaved_trip_count()
        );
    }
    Ok(())
}

fn handle_stats(args: StatsArgs) -> Result<()> {
    let tz = parse_tz(&args.tz)?;
    let now = resolve_now(args.now.as_deref())?;
    let trips = open_store(&args.store.store)?.completed_trips()?;
    let stats = aggregate(&trips, now, &tz)?;
    info!("Aggregated {} trips as of {} ({})", trips.len(), now, tz);
    write_json_pretty(&stats)
}

fn handle_correlate(args: CorrelateArgs) -> Result<()> {
    let text = fs::read_to_string(&args.deliveries)
        .with_context(|| format!("failed to read {}", args.deliveries.display()))?;
    let deliveries: Vec<DeliveryRecord> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of deliveries", args.deliveries.display()))?;
    let trips = open_store(&args.store.store)?.completed_trips()?;
    let matches = correlate(&trips, &deliveries, args.tolerance_secs.saturating_mul(1000));
    info!(
        "Matched {} of {} trips against {} deliveries",
        matches.len(),
        trips.len(),
        deliveries.len()
    );
    write_json_pretty(&matches)
}

fn handle_manual(args: ManualArgs) -> Result<()> {
    let tz = parse_tz(&args.tz)?;
    let now = resolve_now(args.now.as_deref())?;
    let request = ManualTripRequest {
        date: args.date,
        start: args.start,
        end: args.end,
        miles: args.miles,
    };
    let trip = build_manual_trip(&request, &tz, now)?;
    let mut store = open_store(&args.store.store)?;
    store
        .save_completed_trip(&trip)
        .with_context(|| format!("failed to save trip {}", trip.id))?;
    write_json_pretty(&trip)
}

fn handle_edit(args: EditArgs) -> Result<()> {
    if args.miles.is_none() && args.started_at.is_none() {
        return Err(anyhow!("nothing to edit: pass --miles or --started-at/--ended-at"));
    }
    let mut store = open_store(&args.store.store)?;
    let mut trip = store
        .completed_trips()?
        .into_iter()
        .find(|t| t.id == args.trip_id)
        .ok_or_else(|| anyhow!("no stored trip with id {}", args.trip_id))?;
    if let Some(miles) = args.miles {
        trip = trip.with_edited_miles(miles)?;
    }
    if let (Some(start), Some(end)) = (&args.started_at, &args.ended_at) {
        trip = trip.with_edited_times(EpochMs::parse_rfc3339(start)?, EpochMs::parse_rfc3339(end)?)?;
    }
    store
        .save_completed_trip(&trip)
        .with_context(|| format!("failed to save trip {}", trip.id))?;
    info!("Updated trip {}", trip.id);
    write_json_pretty(&trip)
}

fn handle_route(args: RouteArgs) -> Result<()> {
    let trips = open_store(&args.store.store)?.completed_trips()?;
    let trip = trips
        .iter()
        .find(|t| t.id == args.trip_id)
        .ok_or_else(|| anyhow!("no stored trip with id {}", args.trip_id))?;
    if trip.is_manual {
        warn!("Trip {} was entered by hand and has no route", trip.id);
    }
    let route = trip
        .decode_route()
        .with_context(|| format!("stored route for trip {} is corrupt", trip.id))?;
    write_json_pretty(&route)
}

fn load_config(args: &ReplayArgs) -> Result<TrackingConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            TrackingConfig::from_json(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => TrackingConfig::default(),
    };
    if let Some(speed) = args.moving_speed {
        config.moving_speed_mps = speed;
    }
    if let Some(speed) = args.stationary_speed {
        config.stationary_speed_mps = speed;
    }
    if args.max_accuracy.is_some() {
        config.max_accuracy_m = args.max_accuracy;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(dir: &Path) -> Result<JsonDirStore> {
    JsonDirStore::open(dir).with_context(|| format!("failed to open store {}", dir.display()))
}

/// A file starting with `[` is read as one JSON array, anything else as
/// JSON lines. Blank lines are ignored; entries that are not valid samples
/// are skipped with a warning.
fn read_samples(path: &Path) -> Result<Vec<LocationSample>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_samples(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_samples(text: &str) -> Result<Vec<LocationSample>> {
    if text.trim_start().starts_with('[') {
        let entries: Vec<JsonValue> = serde_json::from_str(text)?;
        return Ok(entries
            .into_iter()
            .enumerate()
            .filter_map(|(idx, entry)| match serde_json::from_value(entry) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    warn!("Skipping sample #{}: {}", idx + 1, err);
                    None
                }
            })
            .collect());
    }
    Ok(text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(sample) => Some(sample),
            Err(err) => {
                warn!("Skipping sample on line {}: {}", idx + 1, err);
                None
            }
        })
        .collect())
}

fn parse_clock(text: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .with_context(|| format!("invalid time '{}': expected HH:MM or HH:MM:SS", text))
}

fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|err| anyhow!("unknown time zone '{}': {}", name, err))
}

fn resolve_now(now: Option<&str>) -> Result<EpochMs> {
    match now {
        Some(text) => Ok(EpochMs::parse_rfc3339(text)?),
        None => Ok(EpochMs::from_datetime(&Utc::now())?),
    }
}

fn write_json_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_json_pretty<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
