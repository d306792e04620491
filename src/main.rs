//! Flow Status Service - one assessment cycle
//!
//! Reads the bulk station feed and assesses every station with a current
//! reading:
//! 1. Percentile of current flow against the day's historical baseline
//! 2. Flow condition and drought tier from that percentile
//! 3. NWS flood category from gage height
//! 4. Flow and water temperature trends over the recent window
//!
//! and writes the results as a status snapshot.
//!
//! Usage:
//!   flostat_service --feed feed.json --regions VT,NH
//!   flostat_service --feed feed.json --regions IL --day-key 05-01 --dry-run -v
//!
//! Environment:
//!   MAX_WORKERS, REFERENCE_BASE_URL, REFERENCE_DIR, FLOSTAT_DEADLINE_SECS
//!   RUST_LOG overrides the log filter.

use std::collections::BTreeSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};

use flostat_service::config::ServiceConfig;
use flostat_service::engine::{AssessmentContext, AssessmentEngine, EngineConfig, partition_by_reference};
use flostat_service::history::{FeedHistory, HistorySource, HistoryWindow, SnapshotHistory, detect_trends};
use flostat_service::ingest::feed::{latest_readings, load_feed};
use flostat_service::logging::init_logging;
use flostat_service::model::{DayKey, Quantity};
use flostat_service::reference::{HttpStore, LayeredStore, LocalDirStore, ReferenceCache, ReferenceStore};
use flostat_service::snapshot::{StatusSnapshot, write_snapshot};
use flostat_service::stations::{StationRegistry, load_nws_thresholds, load_stations};

/// Assess live river gauge readings against historical baselines and
/// flood stages.
#[derive(Debug, Parser)]
#[command(name = "flostat_service", version)]
struct Cli {
    /// Bulk station readings feed (JSON)
    #[arg(long, value_name = "FILE")]
    feed: PathBuf,

    /// Regions (state codes) whose baselines to consult, comma-separated
    #[arg(long, value_delimiter = ',', required = true)]
    regions: Vec<String>,

    /// Service configuration file
    #[arg(long, value_name = "FILE", default_value = "flostat.toml")]
    config: PathBuf,

    /// Local reference table directory
    #[arg(long, value_name = "DIR")]
    reference_dir: Option<PathBuf>,

    /// Remote reference store base URL
    #[arg(long, value_name = "URL")]
    reference_url: Option<String>,

    /// Station registry (TOML)
    #[arg(long, value_name = "FILE")]
    stations: Option<PathBuf>,

    /// NWS flood threshold export (JSON), merged over the registry
    #[arg(long, value_name = "FILE")]
    flood_thresholds: Option<PathBuf>,

    /// Read trend history from prior snapshots instead of the feed
    #[arg(long, value_name = "DIR")]
    history_dir: Option<PathBuf>,

    /// Day of year to assess against (MM-DD); defaults to today, local time
    #[arg(long, value_name = "MM-DD")]
    day_key: Option<DayKey>,

    /// Snapshot output directory
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Worker threads for region batches
    #[arg(long)]
    max_workers: Option<usize>,

    /// Assess and log, but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Also append logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("Assessment failed: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let started = Instant::now();

    // --- Configuration ---
    let mut config = ServiceConfig::load(&cli.config)?;
    if let Some(dir) = cli.reference_dir {
        config.reference.local_dir = Some(dir);
    }
    if let Some(url) = cli.reference_url {
        config.reference.base_url = Some(url);
    }
    if let Some(path) = cli.stations {
        config.stations.registry = path;
    }
    if let Some(path) = cli.flood_thresholds {
        config.stations.nws_thresholds = Some(path);
    }
    if let Some(dir) = cli.history_dir {
        config.trend.history_dir = Some(dir);
    }
    if let Some(dir) = cli.output_dir {
        config.output.dir = dir;
    }
    if let Some(n) = cli.max_workers {
        config.engine.max_workers = n;
    }
    config.validate()?;

    let regions = normalize_regions(&cli.regions);
    if regions.is_empty() {
        return Err("no regions given".into());
    }

    // --- Reference tables ---
    let store = build_store(&config)?;
    info!(store = %store.describe(), "Reference store configured");
    let cache = Arc::new(ReferenceCache::new(Arc::new(store)));

    // --- Flood thresholds ---
    let mut registry = if config.stations.registry.exists() {
        load_stations(&config.stations.registry)?
    } else {
        warn!(
            path = %config.stations.registry.display(),
            "Station registry not found; flood classification limited to NWS export"
        );
        StationRegistry::default()
    };
    if let Some(path) = &config.stations.nws_thresholds {
        registry.merge(load_nws_thresholds(path)?);
    }

    // --- Current readings ---
    let feed = load_feed(&cli.feed)?;
    let readings = latest_readings(&feed);
    info!(stations = feed.stations.len(), readings = readings.len(), "Feed loaded");

    // --- Trends ---
    let assessed_at = Utc::now();
    let window = HistoryWindow::new(assessed_at, config.trend.window_hours);
    let history: Box<dyn HistorySource> = match &config.trend.history_dir {
        Some(dir) => Box::new(SnapshotHistory::new(dir).with_current(&readings)),
        None => Box::new(FeedHistory::from_feed(&feed)),
    };
    let flow_trends = detect_trends(history.as_ref(), Quantity::Flow, &window, &config.trend.flow_params());
    let temp_trends = detect_trends(
        history.as_ref(),
        Quantity::WaterTemp,
        &window,
        &config.trend.temperature_params(),
    );

    // --- Assessment ---
    let engine_config = EngineConfig::from(&config);
    let batches = partition_by_reference(readings, &regions, &cache, engine_config.max_workers);

    let day_key = cli
        .day_key
        .unwrap_or_else(|| DayKey::at(assessed_at, config.engine.day_key_offset()));
    let ctx = AssessmentContext::new(day_key)
        .with_flood_thresholds(Arc::new(registry))
        .with_trends(flow_trends, temp_trends)
        .with_assessed_at(assessed_at);

    let engine = AssessmentEngine::new(Arc::clone(&cache), engine_config);
    let report = engine.run(batches, ctx);

    for (region, message) in &report.regions_failed {
        warn!(region = %region, "Region failed: {}", message);
    }
    if !report.regions_not_found.is_empty() {
        warn!(regions = ?report.regions_not_found, "No reference data for regions");
    }

    // --- Output ---
    let snapshot = StatusSnapshot::new(assessed_at, report.records);
    if cli.dry_run {
        info!(sites = snapshot.site_count, "Dry run; snapshot not written");
    } else {
        write_snapshot(&snapshot, &config.output.dir, config.output.write_history)?;
    }

    let stats = cache.stats();
    info!(
        loads = stats.loads(),
        hit_rate = %format!("{:.1}%", stats.hit_rate()),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Cycle complete: {} sites assessed",
        snapshot.site_count
    );
    Ok(())
}

/// Trimmed, upper-cased, de-duplicated region codes in first-seen order.
fn normalize_regions(raw: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .map(|r| r.trim().to_ascii_uppercase())
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Local directory first, then the remote store, whichever are configured.
fn build_store(config: &ServiceConfig) -> Result<LayeredStore, Box<dyn Error>> {
    let mut layers: Vec<Box<dyn ReferenceStore>> = Vec::new();
    if let Some(dir) = &config.reference.local_dir {
        layers.push(Box::new(LocalDirStore::new(dir)));
    }
    if let Some(url) = &config.reference.base_url {
        layers.push(Box::new(HttpStore::new(
            url,
            &config.reference.prefix,
            config.reference.timeout(),
        )?));
    }
    if layers.is_empty() {
        warn!("No reference source configured; only flood stages will be assessed");
    }
    Ok(LayeredStore::new(layers))
}
