/// Assessment engine: turns current readings into station status records.
///
/// Readings arrive grouped into `RegionBatch`es. Each batch runs on a
/// worker thread (bounded by `max_workers`): it fetches the region's
/// reference table through the shared `ReferenceCache`, then assesses every
/// reading against that table, the flood threshold set and the precomputed
/// trends. Per-station assessment is a pure function (`assess_station`).
///
/// A batch never fails as a whole. A region whose table is missing or fails
/// to load is still assessed (flood classification needs no baseline) and
/// is reported in the `BatchReport`. With a deadline set, whatever finished
/// in time is returned and the report is flagged `timed_out`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use threadpool::ThreadPool;
use tracing::{debug, info, warn};

use crate::alert::thresholds::flood_status;
use crate::analysis::percentile::{interpolate, round_percentile};
use crate::analysis::status::{DroughtCutoffs, drought_status, flow_status};
use crate::config::ServiceConfig;
use crate::model::{AssessError, CurrentReading, DayKey, StatusRecord, ThresholdRow, TrendResult};
use crate::reference::{ReferenceCache, ReferenceError, ReferenceTable};
use crate::stations::{FloodThresholdSet, StationRegistry};

// ---------------------------------------------------------------------------
// Configuration and inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_workers: usize,
    pub deadline: Option<Duration>,
    pub drought: DroughtCutoffs,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            deadline: None,
            drought: DroughtCutoffs::default(),
        }
    }
}

impl From<&ServiceConfig> for EngineConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_workers: config.engine.max_workers.max(1),
            deadline: config.engine.deadline_secs.map(Duration::from_secs),
            drought: config.drought,
        }
    }
}

/// Readings to assess against one region's reference table.
/// `region: None` holds readings no requested region claims.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionBatch {
    pub region: Option<String>,
    pub readings: Vec<CurrentReading>,
}

/// Everything shared by all stations in one run.
#[derive(Debug, Clone)]
pub struct AssessmentContext {
    pub day_key: DayKey,
    pub flood_thresholds: Option<Arc<FloodThresholdSet>>,
    pub flow_trends: Arc<HashMap<String, TrendResult>>,
    pub temp_trends: Arc<HashMap<String, TrendResult>>,
    pub drought: DroughtCutoffs,
    /// Stamped on every record as `timestamp`.
    pub assessed_at: DateTime<Utc>,
}

impl AssessmentContext {
    pub fn new(day_key: DayKey) -> Self {
        Self {
            day_key,
            flood_thresholds: None,
            flow_trends: Arc::new(HashMap::new()),
            temp_trends: Arc::new(HashMap::new()),
            drought: DroughtCutoffs::default(),
            assessed_at: Utc::now(),
        }
    }

    pub fn with_flood_thresholds(mut self, set: Arc<FloodThresholdSet>) -> Self {
        self.flood_thresholds = Some(set);
        self
    }

    pub fn with_trends(
        mut self,
        flow: HashMap<String, TrendResult>,
        temperature: HashMap<String, TrendResult>,
    ) -> Self {
        self.flow_trends = Arc::new(flow);
        self.temp_trends = Arc::new(temperature);
        self
    }

    pub fn with_drought(mut self, drought: DroughtCutoffs) -> Self {
        self.drought = drought;
        self
    }

    pub fn with_assessed_at(mut self, at: DateTime<Utc>) -> Self {
        self.assessed_at = at;
        self
    }
}

// ---------------------------------------------------------------------------
// Per-station assessment
// ---------------------------------------------------------------------------

fn reference_row<'a>(
    table: Option<&'a ReferenceTable>,
    site_id: &str,
    day_key: DayKey,
) -> Result<&'a ThresholdRow, AssessError> {
    table
        .and_then(|t| t.lookup(site_id, day_key))
        .ok_or_else(|| AssessError::MissingReference {
            site_id: site_id.to_string(),
            day_key,
        })
}

/// Assesses one reading. Always returns a record; callers filter with
/// [`StatusRecord::is_publishable`].
pub fn assess_station(
    reading: &CurrentReading,
    region: Option<&str>,
    table: Option<&ReferenceTable>,
    ctx: &AssessmentContext,
) -> StatusRecord {
    let site_id = reading.site_id.as_str();

    let percentile = reading.flow.and_then(|flow| {
        let row = reference_row(table, site_id, ctx.day_key)
            .map_err(|e| debug!(site_id, "{}", e))
            .ok()?;
        interpolate(flow, &row.thresholds)
            .map_err(|e| debug!(site_id, "Percentile unavailable: {}", e))
            .ok()
    });

    let flood = flood_status(
        reading.gage_height,
        ctx.flood_thresholds.as_ref().and_then(|set| set.lookup(site_id)),
    );

    let flow_trend = ctx.flow_trends.get(site_id);
    let temp_trend = ctx.temp_trends.get(site_id);

    StatusRecord {
        site_id: reading.site_id.clone(),
        region: region.map(str::to_string),
        flow: reading.flow,
        gage_height: reading.gage_height,
        water_temp: reading.water_temp,
        // Classify on the exact value; publish the rounded one.
        percentile: percentile.map(round_percentile),
        flow_status: percentile.map(flow_status),
        drought_status: percentile.and_then(|p| drought_status(p, &ctx.drought)),
        flood_status: flood,
        trend: flow_trend.map(|t| t.trend),
        trend_rate: flow_trend.map(|t| t.rate),
        hours_since_peak: flow_trend.and_then(|t| t.hours_since_peak),
        water_temp_trend: temp_trend.map(|t| t.trend),
        observed_at: reading.timestamp,
        timestamp: ctx.assessed_at,
    }
}

/// Assesses `readings` and keeps only publishable records.
pub fn assess_readings(
    readings: &[CurrentReading],
    region: Option<&str>,
    table: Option<&ReferenceTable>,
    ctx: &AssessmentContext,
) -> Vec<StatusRecord> {
    readings
        .iter()
        .map(|r| assess_station(r, region, table, ctx))
        .filter(StatusRecord::is_publishable)
        .collect()
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Publishable records, sorted by site id.
    pub records: Vec<StatusRecord>,
    pub regions_assessed: Vec<String>,
    pub regions_not_found: Vec<String>,
    /// Region and the load error message.
    pub regions_failed: Vec<(String, String)>,
    /// Readings assessed that produced no publishable record.
    pub stations_dropped: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!(
            "{} records, {} regions assessed, {} not found, {} failed, {} stations dropped{}",
            self.records.len(),
            self.regions_assessed.len(),
            self.regions_not_found.len(),
            self.regions_failed.len(),
            self.stations_dropped,
            if self.timed_out { " (timed out)" } else { "" }
        )
    }
}

enum TableOutcome {
    Found,
    NotFound,
    Failed(String),
    Unmatched,
}

struct BatchResult {
    region: Option<String>,
    outcome: TableOutcome,
    records: Vec<StatusRecord>,
    readings: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct AssessmentEngine {
    cache: Arc<ReferenceCache>,
    config: EngineConfig,
}

impl AssessmentEngine {
    pub fn new(cache: Arc<ReferenceCache>, config: EngineConfig) -> Self {
        Self { cache, config }
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// Assesses every batch and collects the results.
    ///
    /// The context's drought cutoffs are replaced by the engine's.
    pub fn run(&self, batches: Vec<RegionBatch>, ctx: AssessmentContext) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::default();
        if batches.is_empty() {
            return report;
        }

        let ctx = Arc::new(ctx.with_drought(self.config.drought));
        let workers = self.config.max_workers.clamp(1, batches.len());
        let pool = ThreadPool::new(workers);
        let (tx, rx) = mpsc::channel::<BatchResult>();
        let expected = batches.len();

        info!(batches = expected, workers, day_key = %ctx.day_key, "Starting assessment");

        for batch in batches {
            let tx = tx.clone();
            let cache = Arc::clone(&self.cache);
            let ctx = Arc::clone(&ctx);
            pool.execute(move || {
                let result = assess_batch(&cache, batch, &ctx);
                // The receiver is gone if the deadline already passed.
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let deadline = self.config.deadline.map(|d| started + d);
        for _ in 0..expected {
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(remaining) {
                        Ok(result) => Some(result),
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            report.timed_out = true;
                            None
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => rx.recv().ok(),
            };

            match received {
                Some(result) => merge_result(&mut report, result),
                None => break,
            }
        }

        if report.timed_out {
            warn!(
                deadline_secs = self.config.deadline.map(|d| d.as_secs()),
                "Assessment deadline reached; returning partial results"
            );
        }

        report.records.sort_by(|a, b| a.site_id.cmp(&b.site_id));
        report.regions_assessed.sort();
        report.regions_not_found.sort();
        report.regions_failed.sort();
        report.elapsed = started.elapsed();

        info!("Assessment complete: {}", report.summary());
        report
    }
}

fn assess_batch(cache: &ReferenceCache, batch: RegionBatch, ctx: &AssessmentContext) -> BatchResult {
    let (table, outcome) = match batch.region.as_deref() {
        None => (None, TableOutcome::Unmatched),
        Some(region) => match cache.get(region) {
            Ok(Some(table)) => (Some(table), TableOutcome::Found),
            Ok(None) => {
                warn!(region, "No reference table; assessing flood stage only");
                (None, TableOutcome::NotFound)
            }
            Err(e) => {
                warn!(region, "Reference load failed; assessing flood stage only: {}", e);
                (None, TableOutcome::Failed(e.to_string()))
            }
        },
    };

    let records = assess_readings(&batch.readings, batch.region.as_deref(), table.as_deref(), ctx);
    debug!(
        region = batch.region.as_deref().unwrap_or("-"),
        readings = batch.readings.len(),
        records = records.len(),
        "Batch assessed"
    );

    BatchResult {
        region: batch.region,
        outcome,
        records,
        readings: batch.readings.len(),
    }
}

fn merge_result(report: &mut BatchReport, result: BatchResult) {
    report.stations_dropped += result.readings.saturating_sub(result.records.len());
    report.records.extend(result.records);

    let Some(region) = result.region else {
        return;
    };
    match result.outcome {
        TableOutcome::Found => report.regions_assessed.push(region),
        TableOutcome::NotFound => report.regions_not_found.push(region),
        TableOutcome::Failed(message) => report.regions_failed.push((region, message)),
        TableOutcome::Unmatched => {}
    }
}

// ---------------------------------------------------------------------------
// Partitioning
// ---------------------------------------------------------------------------

/// Loads each region's table through the cache, in parallel.
fn load_tables(
    cache: &Arc<ReferenceCache>,
    regions: &[String],
    max_workers: usize,
) -> HashMap<String, Result<Option<Arc<ReferenceTable>>, ReferenceError>> {
    if regions.is_empty() {
        return HashMap::new();
    }
    let pool = ThreadPool::new(max_workers.clamp(1, regions.len()));
    let (tx, rx) = mpsc::channel();

    for region in regions {
        let tx = tx.clone();
        let cache = Arc::clone(cache);
        let region = region.clone();
        pool.execute(move || {
            let result = cache.get(&region);
            let _ = tx.send((region, result));
        });
    }
    drop(tx);

    rx.iter().collect()
}

/// Assigns each reading to the first region (in `regions` order) whose
/// reference table knows the site.
///
/// Every requested region gets a batch, even an empty one, so regions that
/// are missing or failed to load still show up in the engine's report.
/// Readings no table claims go into a trailing `region: None` batch.
pub fn partition_by_reference(
    readings: Vec<CurrentReading>,
    regions: &[String],
    cache: &Arc<ReferenceCache>,
    max_workers: usize,
) -> Vec<RegionBatch> {
    let mut tables = load_tables(cache, regions, max_workers);
    let loaded: Vec<(String, Option<Arc<ReferenceTable>>)> = regions
        .iter()
        .map(|region| {
            let table = match tables.remove(region) {
                Some(Ok(table)) => table,
                Some(Err(e)) => {
                    warn!(region = %region, "Reference load failed during partitioning: {}", e);
                    None
                }
                None => None,
            };
            (region.clone(), table)
        })
        .collect();

    let mut batches: Vec<RegionBatch> = loaded
        .iter()
        .map(|(region, _)| RegionBatch {
            region: Some(region.clone()),
            readings: Vec::new(),
        })
        .collect();
    let mut unmatched = Vec::new();

    for reading in readings {
        let slot = loaded.iter().position(|(_, table)| {
            table
                .as_ref()
                .is_some_and(|t| t.contains_site(&reading.site_id))
        });
        match slot {
            Some(i) => batches[i].readings.push(reading),
            None => unmatched.push(reading),
        }
    }

    for batch in &batches {
        info!(
            region = batch.region.as_deref().unwrap_or("-"),
            readings = batch.readings.len(),
            "Partitioned readings"
        );
    }
    if !unmatched.is_empty() {
        info!(readings = unmatched.len(), "Readings with no reference region");
        batches.push(RegionBatch {
            region: None,
            readings: unmatched,
        });
    }
    batches
}

/// Assigns readings by the `region` field of the station registry, sorted
/// by region. Unregistered or region-less sites go into a trailing
/// `region: None` batch.
pub fn partition_by_registry(readings: Vec<CurrentReading>, registry: &StationRegistry) -> Vec<RegionBatch> {
    let mut by_region: HashMap<String, Vec<CurrentReading>> = HashMap::new();
    let mut unmatched = Vec::new();

    for reading in readings {
        match registry.region_of(&reading.site_id) {
            Some(region) => by_region.entry(region.to_string()).or_default().push(reading),
            None => unmatched.push(reading),
        }
    }

    let mut batches: Vec<RegionBatch> = by_region
        .into_iter()
        .map(|(region, readings)| RegionBatch {
            region: Some(region),
            readings,
        })
        .collect();
    batches.sort_by(|a, b| a.region.cmp(&b.region));

    if !unmatched.is_empty() {
        batches.push(RegionBatch {
            region: None,
            readings: unmatched,
        });
    }
    batches
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
