/// Bulk station readings feed: decoding and extraction.
///
/// The feed is a JSON document listing active stations, each with its
/// recent readings (typically the last 48 hours). See `fixtures.rs` for the
/// annotated shape. From it we derive:
///
/// - the latest valid reading per station, for the assessment engine, and
/// - per-site flow and temperature series, for trend detection.
///
/// Invalid values are dropped at this boundary so nothing downstream sees
/// them: non-positive flow (including the USGS -999999 missing/ice code),
/// gage heights at or below -100 ft, and non-finite numbers.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::analysis::groupings::{group_by_site, latest_by_site};
use crate::model::{CurrentReading, HistoricalPoint, Quantity};

/// Gage heights at or below this are treated as missing. Some gauges
/// legitimately read below zero, so zero is not the cutoff.
const MIN_VALID_GAGE_HEIGHT_FT: f64 = -100.0;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to read feed {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode feed: {0}")]
    Decode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Serde structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedDocument {
    #[serde(default)]
    pub stations: Vec<FeedStation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedStation {
    pub station_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub readings: Vec<FeedReading>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedReading {
    pub timestamp: String,
    #[serde(default)]
    pub water_flow_cfs: Option<f64>,
    #[serde(default)]
    pub river_depth_ft: Option<f64>,
    #[serde(default)]
    pub water_temp_c: Option<f64>,
}

impl FeedStation {
    /// Site identifier used for reference and threshold lookups: the USGS
    /// site number for USGS stations, the feed's own id otherwise.
    pub fn site_id(&self) -> &str {
        let is_usgs = self
            .provider
            .as_deref()
            .is_some_and(|p| p.eq_ignore_ascii_case("usgs"));
        match self.provider_id.as_deref() {
            Some(id) if is_usgs && !id.trim().is_empty() => id.trim(),
            _ => &self.station_id,
        }
    }
}

impl FeedReading {
    pub fn flow(&self) -> Option<f64> {
        self.water_flow_cfs.filter(|v| v.is_finite() && *v > 0.0)
    }

    pub fn gage_height(&self) -> Option<f64> {
        self.river_depth_ft
            .filter(|v| v.is_finite() && *v > MIN_VALID_GAGE_HEIGHT_FT)
    }

    pub fn water_temp(&self) -> Option<f64> {
        self.water_temp_c.filter(|v| v.is_finite())
    }

    pub fn value(&self, quantity: Quantity) -> Option<f64> {
        match quantity {
            Quantity::Flow => self.flow(),
            Quantity::GageHeight => self.gage_height(),
            Quantity::WaterTemp => self.water_temp(),
        }
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parses an ISO 8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

pub fn decode(json: &str) -> Result<FeedDocument, FeedError> {
    let doc: FeedDocument = serde_json::from_str(json)?;
    debug!(stations = doc.stations.len(), "Decoded feed document");
    Ok(doc)
}

pub fn load_feed(path: &Path) -> Result<FeedDocument, FeedError> {
    let contents = std::fs::read_to_string(path).map_err(|e| FeedError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    decode(&contents)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Latest valid reading for every station in the feed.
///
/// Each field takes its most recent valid value, so a station whose newest
/// reading lacks flow still reports the flow from the reading before it.
/// The reading timestamp is the newest one that carried any valid field.
/// Stations with no valid field in any reading are dropped. When two
/// feed stations resolve to the same site id, the newer reading wins.
/// Output is sorted by site id.
pub fn latest_readings(doc: &FeedDocument) -> Vec<CurrentReading> {
    let mut per_station = Vec::with_capacity(doc.stations.len());
    let mut dropped = 0usize;

    for station in &doc.stations {
        match latest_for_station(station) {
            Some(reading) => per_station.push(reading),
            None => {
                debug!(site_id = station.site_id(), "No valid readings for station");
                dropped += 1;
            }
        }
    }

    let mut out: Vec<CurrentReading> = latest_by_site(per_station).into_values().collect();
    out.sort_by(|a, b| a.site_id.cmp(&b.site_id));

    info!(
        valid = out.len(),
        dropped,
        "Extracted latest readings from feed"
    );
    out
}

fn latest_for_station(station: &FeedStation) -> Option<CurrentReading> {
    let mut timed: Vec<(DateTime<Utc>, &FeedReading)> = Vec::with_capacity(station.readings.len());
    for reading in &station.readings {
        match reading.parsed_timestamp() {
            Some(ts) => timed.push((ts, reading)),
            None => warn!(
                site_id = station.site_id(),
                timestamp = %reading.timestamp,
                "Skipping reading with unparseable timestamp"
            ),
        }
    }
    timed.sort_by_key(|(ts, _)| *ts);

    let latest = |quantity: Quantity| timed.iter().rev().find_map(|(_, r)| r.value(quantity));
    let flow = latest(Quantity::Flow);
    let gage_height = latest(Quantity::GageHeight);
    let water_temp = latest(Quantity::WaterTemp);

    let timestamp = timed
        .iter()
        .rev()
        .find(|(_, r)| r.flow().is_some() || r.gage_height().is_some() || r.water_temp().is_some())
        .map(|(ts, _)| *ts)?;

    CurrentReading::new(station.site_id(), timestamp, flow, gage_height, water_temp).ok()
}

/// Per-site ascending series of one quantity; invalid values are skipped
/// and sites with no valid points are omitted.
pub fn history(doc: &FeedDocument, quantity: Quantity) -> HashMap<String, Vec<HistoricalPoint>> {
    let samples: Vec<(String, HistoricalPoint)> = doc
        .stations
        .iter()
        .flat_map(|station| {
            let site_id = station.site_id().to_string();
            station.readings.iter().filter_map(move |r| {
                let ts = r.parsed_timestamp()?;
                let value = r.value(quantity)?;
                Some((site_id.clone(), HistoricalPoint::new(ts, value)))
            })
        })
        .collect();
    group_by_site(samples)
}

pub fn flow_history(doc: &FeedDocument) -> HashMap<String, Vec<HistoricalPoint>> {
    history(doc, Quantity::Flow)
}

pub fn temperature_history(doc: &FeedDocument) -> HashMap<String, Vec<HistoricalPoint>> {
    history(doc, Quantity::WaterTemp)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
