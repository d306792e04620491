/// Historical series for trend detection.
///
/// Trends need a short window of recent values per site. Two sources are
/// supported:
///
/// - `FeedHistory`     - the readings embedded in the current feed
///                       (the feed carries ~48 hours per station).
/// - `SnapshotHistory` - the timestamped snapshots written by prior runs
///                       under `{output_dir}/history/`, plus the readings
///                       being assessed now.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::analysis::groupings::group_by_site;
use crate::analysis::trend::{self, TrendParams};
use crate::ingest::feed::{self, FeedDocument};
use crate::model::{CurrentReading, HistoricalPoint, Quantity, TrendResult};
use crate::snapshot::parse_history_file_name;

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Closed time window `[end - hours, end]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryWindow {
    pub end: DateTime<Utc>,
    pub hours: i64,
}

impl HistoryWindow {
    pub fn new(end: DateTime<Utc>, hours: i64) -> Self {
        Self { end, hours }
    }

    /// Window of `hours` ending now.
    pub fn ending_now(hours: i64) -> Self {
        Self::new(Utc::now(), hours)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.end - Duration::hours(self.hours)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start() && ts <= self.end
    }

    fn clip(&self, series: Vec<HistoricalPoint>) -> Vec<HistoricalPoint> {
        series.into_iter().filter(|p| self.contains(p.timestamp)).collect()
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

pub trait HistorySource: Send + Sync {
    /// Ascending series of `quantity` for every site with data in `window`.
    fn series(&self, quantity: Quantity, window: &HistoryWindow) -> HashMap<String, Vec<HistoricalPoint>>;

    /// Ascending series of `quantity` for one site.
    fn readings(&self, site_id: &str, quantity: Quantity, window: &HistoryWindow) -> Vec<HistoricalPoint> {
        self.series(quantity, window)
            .remove(site_id)
            .unwrap_or_default()
    }
}

/// Runs trend detection over every site `source` has data for.
pub fn detect_trends(
    source: &dyn HistorySource,
    quantity: Quantity,
    window: &HistoryWindow,
    params: &TrendParams,
) -> HashMap<String, TrendResult> {
    let series = source.series(quantity, window);
    debug!(?quantity, sites = series.len(), "Running trend detection");
    trend::detect_all(&series, params)
}

// ---------------------------------------------------------------------------
// Feed-embedded history
// ---------------------------------------------------------------------------

/// Series taken from the readings embedded in the feed document.
#[derive(Debug, Clone, Default)]
pub struct FeedHistory {
    series: HashMap<Quantity, HashMap<String, Vec<HistoricalPoint>>>,
}

impl FeedHistory {
    pub fn from_feed(doc: &FeedDocument) -> Self {
        let series = [Quantity::Flow, Quantity::GageHeight, Quantity::WaterTemp]
            .into_iter()
            .map(|q| (q, feed::history(doc, q)))
            .collect();
        Self { series }
    }
}

impl HistorySource for FeedHistory {
    fn series(&self, quantity: Quantity, window: &HistoryWindow) -> HashMap<String, Vec<HistoricalPoint>> {
        self.series
            .get(&quantity)
            .map(|by_site| {
                by_site
                    .iter()
                    .map(|(site, s)| (site.clone(), window.clip(s.clone())))
                    .filter(|(_, s)| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn readings(&self, site_id: &str, quantity: Quantity, window: &HistoryWindow) -> Vec<HistoricalPoint> {
        self.series
            .get(&quantity)
            .and_then(|by_site| by_site.get(site_id))
            .map(|s| window.clip(s.clone()))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Snapshot-directory history
// ---------------------------------------------------------------------------

/// Only the fields a history reader needs; everything else is ignored so
/// older snapshots with fewer fields still load.
#[derive(Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    sites: HashMap<String, SnapshotSite>,
}

#[derive(Deserialize)]
struct SnapshotSite {
    #[serde(default)]
    flow: Option<f64>,
    #[serde(default)]
    gage_height: Option<f64>,
    #[serde(default)]
    water_temp: Option<f64>,
    #[serde(default)]
    observed_at: Option<DateTime<Utc>>,
}

impl SnapshotSite {
    fn value(&self, quantity: Quantity) -> Option<f64> {
        match quantity {
            Quantity::Flow => self.flow,
            Quantity::GageHeight => self.gage_height,
            Quantity::WaterTemp => self.water_temp,
        }
        .filter(|v| v.is_finite())
    }
}

/// Series rebuilt from `YYYY-MM-DDTHHMM.json` snapshots in a directory.
///
/// Files are selected by the timestamp in their name. Each site's point is
/// stamped with its `observed_at`, falling back to the snapshot time.
/// Unreadable or malformed files are skipped with a warning.
///
/// Prior runs never contain the reading assessed in this run, so the
/// current readings given to `with_current` are appended as each site's
/// newest point. Where a snapshot point shares the timestamp, the current
/// reading wins.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    dir: PathBuf,
    current: Vec<CurrentReading>,
}

impl SnapshotHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Vec::new(),
        }
    }

    pub fn with_current(mut self, readings: &[CurrentReading]) -> Self {
        self.current = readings.to_vec();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot files whose name falls inside `window`, oldest first.
    fn files_in(&self, window: &HistoryWindow) -> Vec<(DateTime<Utc>, PathBuf)> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), "Cannot read history directory: {}", e);
                return Vec::new();
            }
        };

        let mut files: Vec<(DateTime<Utc>, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter_map(|path| parse_history_file_name(&path).map(|ts| (ts, path)))
            .filter(|(ts, _)| window.contains(*ts))
            .collect();
        files.sort();
        files
    }
}

impl HistorySource for SnapshotHistory {
    fn series(&self, quantity: Quantity, window: &HistoryWindow) -> HashMap<String, Vec<HistoricalPoint>> {
        let files = self.files_in(window);
        let mut samples: Vec<(String, HistoricalPoint)> = Vec::new();
        let mut loaded = 0usize;

        for (file_ts, path) in &files {
            let parsed = fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<SnapshotFile>(&s).map_err(|e| e.to_string()));
            let snapshot = match parsed {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping history snapshot: {}", e);
                    continue;
                }
            };
            loaded += 1;

            let fallback = snapshot.generated_at.unwrap_or(*file_ts);
            for (site_id, site) in snapshot.sites {
                if let Some(value) = site.value(quantity) {
                    let ts = site.observed_at.unwrap_or(fallback);
                    samples.push((site_id, HistoricalPoint::new(ts, value)));
                }
            }
        }

        let mut current = 0usize;
        for reading in &self.current {
            if let Some(value) = reading.value(quantity).filter(|_| window.contains(reading.timestamp)) {
                samples.push((reading.site_id.clone(), HistoricalPoint::new(reading.timestamp, value)));
                current += 1;
            }
        }

        let series = group_by_site(samples);
        info!(
            dir = %self.dir.display(),
            files = loaded,
            current,
            sites = series.len(),
            ?quantity,
            "Loaded history from snapshots"
        );
        series
            .into_iter()
            .map(|(site, s)| (site, window.clip(s)))
            .filter(|(_, s)| !s.is_empty())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
