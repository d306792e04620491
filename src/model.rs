/// Core data types for the flow status assessment service.
///
/// This module defines the shared domain model imported by all other modules:
/// current readings, historical points, baseline rows, flood stage rows, trend
/// results and the emitted status records. It contains no I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Day key
// ---------------------------------------------------------------------------

/// Month-day key (`MM-DD`) used to index annually recurring statistics.
///
/// February 29 is a valid key; baselines computed over leap years carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey {
    month: u32,
    day: u32,
}

impl DayKey {
    pub fn new(month: u32, day: u32) -> Result<Self, AssessError> {
        // 2000 is a leap year, so 02-29 validates.
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(AssessError::InvalidDayKey(format!("{:02}-{:02}", month, day)));
        }
        Ok(Self { month, day })
    }

    /// Day key of the calendar date of `datetime`, in its own time zone.
    pub fn from_datetime<Tz: TimeZone>(datetime: DateTime<Tz>) -> Self {
        Self {
            month: datetime.month(),
            day: datetime.day(),
        }
    }

    /// Day key of `instant` on the wall clock at `offset`, or on the local
    /// system clock when no offset is given.
    ///
    /// Stations are assessed against the baseline of their local calendar
    /// day, so a run at 02:00 UTC in Illinois still uses yesterday's key.
    pub fn at(instant: DateTime<Utc>, offset: Option<FixedOffset>) -> Self {
        match offset {
            Some(offset) => Self::from_datetime(instant.with_timezone(&offset)),
            None => Self::from_datetime(instant.with_timezone(&Local)),
        }
    }

    /// Today's day key on the local system clock.
    pub fn today() -> Self {
        Self::from_datetime(Local::now())
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl FromStr for DayKey {
    type Err = AssessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AssessError::InvalidDayKey(s.to_string());
        let (month, day) = s.trim().split_once('-').ok_or_else(invalid)?;
        if month.len() != 2 || day.len() != 2 {
            return Err(invalid());
        }
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let day: u32 = day.parse().map_err(|_| invalid())?;
        DayKey::new(month, day).map_err(|_| invalid())
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// Latest measured values for one station.
///
/// All three quantities are independently optional, but a reading with none
/// of them is rejected by [`CurrentReading::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentReading {
    pub site_id: String,
    pub timestamp: DateTime<Utc>,
    pub flow: Option<f64>,        // cubic feet per second
    pub gage_height: Option<f64>, // feet
    pub water_temp: Option<f64>,  // degrees C
}

impl CurrentReading {
    pub fn new(
        site_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        flow: Option<f64>,
        gage_height: Option<f64>,
        water_temp: Option<f64>,
    ) -> Result<Self, AssessError> {
        let reading = Self {
            site_id: site_id.into(),
            timestamp,
            flow,
            gage_height,
            water_temp,
        };
        if !reading.has_measurement() {
            return Err(AssessError::InvalidReading(reading.site_id));
        }
        Ok(reading)
    }

    /// True if at least one measured field is present.
    pub fn has_measurement(&self) -> bool {
        self.flow.is_some() || self.gage_height.is_some() || self.water_temp.is_some()
    }

    pub fn value(&self, quantity: Quantity) -> Option<f64> {
        match quantity {
            Quantity::Flow => self.flow,
            Quantity::GageHeight => self.gage_height,
            Quantity::WaterTemp => self.water_temp,
        }
    }
}

/// One timestamped value of a single measured quantity at one site.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl HistoricalPoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Measured quantities a station can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Flow,
    GageHeight,
    WaterTemp,
}

// ---------------------------------------------------------------------------
// Baseline types
// ---------------------------------------------------------------------------

/// Historical percentile thresholds for one site on one calendar day.
///
/// `thresholds` maps percentile (0–100) to flow. Gaps are allowed; the map
/// only holds the percentiles the baseline generator could compute. Values
/// are expected to be non-decreasing in percentile order, but nothing here
/// relies on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRow {
    pub site_id: String,
    pub day_key: DayKey,
    pub thresholds: BTreeMap<u8, f64>,
}

/// Official flood stage thresholds for a gauge station, in feet.
///
/// Stage levels in ascending order: action ≤ minor ≤ moderate ≤ major.
/// Any level may be missing; not every NWS gauge defines all four.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloodThresholdRow {
    pub action_stage_ft: Option<f64>,
    pub flood_stage_ft: Option<f64>,
    pub moderate_flood_stage_ft: Option<f64>,
    pub major_flood_stage_ft: Option<f64>,
}

impl FloodThresholdRow {
    /// True if no stage level is defined.
    pub fn is_empty(&self) -> bool {
        self.action_stage_ft.is_none()
            && self.flood_stage_ft.is_none()
            && self.moderate_flood_stage_ft.is_none()
            && self.major_flood_stage_ft.is_none()
    }

    /// Present stages in ascending-severity order, paired with their label.
    pub fn present_stages(&self) -> Vec<(&'static str, f64)> {
        [
            ("action", self.action_stage_ft),
            ("minor", self.flood_stage_ft),
            ("moderate", self.moderate_flood_stage_ft),
            ("major", self.major_flood_stage_ft),
        ]
        .into_iter()
        .filter_map(|(name, stage)| stage.map(|s| (name, s)))
        .collect()
    }

    /// True if the present stages are non-decreasing in severity order.
    pub fn is_ordered(&self) -> bool {
        self.present_stages().windows(2).all(|w| w[0].1 <= w[1].1)
    }
}

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Flow condition relative to the historical distribution for the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    #[serde(rename = "Much Below Normal")]
    MuchBelowNormal,
    #[serde(rename = "Below Normal")]
    BelowNormal,
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Above Normal")]
    AboveNormal,
    #[serde(rename = "Much Above Normal")]
    MuchAboveNormal,
}

/// U.S. Drought Monitor severity tiers, D4 most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DroughtStatus {
    #[serde(rename = "D0 - Abnormally Dry")]
    D0,
    #[serde(rename = "D1 - Moderate Drought")]
    D1,
    #[serde(rename = "D2 - Severe Drought")]
    D2,
    #[serde(rename = "D3 - Extreme Drought")]
    D3,
    #[serde(rename = "D4 - Exceptional Drought")]
    D4,
}

/// NWS flood categories, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FloodStatus {
    #[serde(rename = "Action Stage")]
    ActionStage,
    #[serde(rename = "Minor Flood")]
    MinorFlood,
    #[serde(rename = "Moderate Flood")]
    ModerateFlood,
    #[serde(rename = "Major Flood")]
    MajorFlood,
}

/// Short-term direction of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Rising => write!(f, "rising"),
            Trend::Falling => write!(f, "falling"),
            Trend::Stable => write!(f, "stable"),
            Trend::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of trend analysis for a single series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub trend: Trend,
    /// Percent per hour for flow, degrees per hour for temperature.
    pub rate: f64,
    pub hours_since_peak: Option<f64>,
    pub sample_count: usize,
}

impl TrendResult {
    pub fn unknown(sample_count: usize) -> Self {
        Self {
            trend: Trend::Unknown,
            rate: 0.0,
            hours_since_peak: None,
            sample_count,
        }
    }

    pub fn stable(sample_count: usize) -> Self {
        Self {
            trend: Trend::Stable,
            rate: 0.0,
            hours_since_peak: None,
            sample_count,
        }
    }
}

// ---------------------------------------------------------------------------
// Output record
// ---------------------------------------------------------------------------

/// Per-station assessment emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub site_id: String,
    /// Region whose baseline table was consulted, if any.
    pub region: Option<String>,
    pub flow: Option<f64>,
    pub gage_height: Option<f64>,
    pub water_temp: Option<f64>,
    pub percentile: Option<f64>,
    pub flow_status: Option<FlowStatus>,
    pub drought_status: Option<DroughtStatus>,
    pub flood_status: Option<FloodStatus>,
    pub trend: Option<Trend>,
    pub trend_rate: Option<f64>,
    pub hours_since_peak: Option<f64>,
    pub water_temp_trend: Option<Trend>,
    /// When the underlying reading was observed.
    pub observed_at: DateTime<Utc>,
    /// When the assessment ran.
    pub timestamp: DateTime<Utc>,
}

impl StatusRecord {
    /// A record is worth publishing only if it says something about the
    /// historical or flood context of the station.
    pub fn is_publishable(&self) -> bool {
        self.percentile.is_some() || self.flood_status.is_some()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Locally recoverable assessment conditions.
///
/// None of these abort a batch; callers fold them into null fields or an
/// `Unknown` trend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssessError {
    #[error("insufficient data: {available} usable points, {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("no reference row for site {site_id} on {day_key}")]
    MissingReference { site_id: String, day_key: DayKey },

    #[error("degenerate series: {0}")]
    DegenerateSeries(Degeneracy),

    #[error("reading for site {0} carries no measured value")]
    InvalidReading(String),

    #[error("invalid day key '{0}', expected MM-DD")]
    InvalidDayKey(String),
}

/// Why a series cannot support a regression fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    ZeroVariance,
    ZeroMedian,
    ShortSpan,
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degeneracy::ZeroVariance => write!(f, "all values identical"),
            Degeneracy::ZeroMedian => write!(f, "median is zero"),
            Degeneracy::ShortSpan => write!(f, "time span too short"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
