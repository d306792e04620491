/// Historical baseline tables and their read-through cache.
///
/// A `ReferenceTable` holds the day-of-year percentile thresholds for every
/// site in one region (a US state in practice). Tables are produced offline
/// by the baseline generator and loaded here through a `ReferenceStore`:
/// a local directory, an object-storage bucket over HTTPS, or both layered.
///
/// ```text
/// reference
/// ├── ReferenceTable   - (site_id, day_key) → ThresholdRow
/// ├── cache            - ReferenceCache: single-flight, no TTL
/// └── store            - LocalDirStore, HttpStore, LayeredStore
/// ```

pub mod cache;
pub mod store;

pub use cache::{CacheStats, ReferenceCache};
pub use store::{HttpStore, LayeredStore, LocalDirStore, ReferenceStore};

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::model::{DayKey, ThresholdRow};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures loading a region's baseline table from its backing store.
///
/// "Not found" is not an error: stores return `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("failed to read reference data for region {region} from {path}: {source}")]
    Io {
        region: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed reference data for region {region}: {message}")]
    Parse { region: String, message: String },

    #[error("reference store returned HTTP {status} for region {region}")]
    Http { region: String, status: u16 },

    #[error("request for region {region} reference data failed: {source}")]
    Transport {
        region: String,
        #[source]
        source: reqwest::Error,
    },
}

// ---------------------------------------------------------------------------
// Reference table
// ---------------------------------------------------------------------------

/// Baseline threshold rows for one region, keyed by site and day.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    region: String,
    rows: HashMap<String, HashMap<DayKey, ThresholdRow>>,
}

/// One row of the JSON reference document.
///
/// Percentile keys may be written as `"5"` or in column style as `"p05"`;
/// values may be null where the generator had too little data.
#[derive(Deserialize)]
struct RawThresholdRow {
    site_id: String,
    month_day: String,
    #[serde(default)]
    percentiles: BTreeMap<String, Option<f64>>,
}

impl ReferenceTable {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            rows: HashMap::new(),
        }
    }

    pub fn from_rows(region: impl Into<String>, rows: impl IntoIterator<Item = ThresholdRow>) -> Self {
        let mut table = Self::new(region);
        for row in rows {
            table.insert(row);
        }
        table
    }

    /// Adds a row, replacing any existing row for the same site and day.
    pub fn insert(&mut self, row: ThresholdRow) {
        self.rows
            .entry(row.site_id.clone())
            .or_default()
            .insert(row.day_key, row);
    }

    pub fn lookup(&self, site_id: &str, day_key: DayKey) -> Option<&ThresholdRow> {
        self.rows.get(site_id)?.get(&day_key)
    }

    /// True if the table has a row for `site_id` on any day.
    pub fn contains_site(&self, site_id: &str) -> bool {
        self.rows.contains_key(site_id)
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn site_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }

    /// Parses a JSON reference document: an array of
    /// `{site_id, month_day, percentiles: {...}}` rows.
    ///
    /// Null and non-finite thresholds and percentile keys outside 0–100 are
    /// dropped. Rows with a malformed `month_day` are skipped with a warning
    /// rather than failing the whole region.
    pub fn from_json(region: &str, json: &str) -> Result<Self, ReferenceError> {
        let raw: Vec<RawThresholdRow> =
            serde_json::from_str(json).map_err(|e| ReferenceError::Parse {
                region: region.to_string(),
                message: format!("JSON deserialization failed: {}", e),
            })?;

        let mut table = Self::new(region);
        let mut skipped = 0usize;

        for row in raw {
            let day_key: DayKey = match row.month_day.parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!(region, site_id = %row.site_id, "Skipping reference row: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            let thresholds: BTreeMap<u8, f64> = row
                .percentiles
                .iter()
                .filter_map(|(key, value)| {
                    let pct = parse_percentile_key(key)?;
                    let v = (*value)?;
                    v.is_finite().then_some((pct, v))
                })
                .collect();

            table.insert(ThresholdRow {
                site_id: row.site_id,
                day_key,
                thresholds,
            });
        }

        debug!(
            region,
            sites = table.site_count(),
            rows = table.row_count(),
            skipped,
            "Parsed reference table"
        );
        Ok(table)
    }
}

/// Accepts `"25"` or `"p25"`; rejects anything outside 0–100.
fn parse_percentile_key(key: &str) -> Option<u8> {
    let digits = key.trim().trim_start_matches(['p', 'P']);
    let pct: u8 = digits.parse().ok()?;
    (pct <= 100).then_some(pct)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
