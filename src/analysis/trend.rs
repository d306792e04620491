/// Rising / falling limb detection over a short window of readings.
///
/// # Algorithm
///
/// 1. Fewer than `min_points` usable samples → `Unknown`.
/// 2. All values identical (standard deviation ≈ 0) → `Stable`, rate 0.
/// 3. Hours elapsed from the first sample; total span under 0.1 h → `Unknown`.
/// 4. Flow: normalize as percent deviation from the series median
///    (`(v - median) / median * 100`); a median of ≈ 0 → `Unknown`.
///    Temperature: raw deviation from the median, in degrees.
/// 5. Ordinary least-squares slope of normalized value vs. elapsed hours is
///    the rate (% per hour, or degrees per hour).
/// 6. `total_change = rate × span`, compared against the rising and falling
///    thresholds.
/// 7. On a falling limb, hours since the series maximum is reported when it
///    exceeds half an hour.
///
/// Gauge readings arrive every 15 minutes but gaps are common, so the fit
/// works on real elapsed time rather than sample index. Nothing here returns
/// an error: a site with thin history gets `Unknown` and the batch moves on.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{AssessError, Degeneracy, HistoricalPoint, Trend, TrendResult};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

const STD_EPSILON: f64 = 1e-10;
const MEDIAN_EPSILON: f64 = 1e-10;
/// Six minutes. Anything tighter cannot support a per-hour rate.
const MIN_SPAN_HOURS: f64 = 0.1;
/// Peaks closer than this to the latest reading are not reported.
const MIN_PEAK_AGE_HOURS: f64 = 0.5;

/// How values are normalized before the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendMode {
    /// Percent deviation from the median (flow).
    Percent,
    /// Raw deviation from the median (temperature, in degrees).
    Absolute,
}

/// Classification thresholds for one kind of series.
///
/// Thresholds apply to the total change over the window: percent for
/// `Percent` mode, degrees for `Absolute` mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendParams {
    pub rising_threshold: f64,
    pub falling_threshold: f64,
    pub min_points: usize,
    pub mode: TrendMode,
}

impl TrendParams {
    pub fn flow(rising_threshold: f64, falling_threshold: f64, min_points: usize) -> Self {
        Self {
            rising_threshold,
            falling_threshold,
            min_points,
            mode: TrendMode::Percent,
        }
    }

    pub fn temperature(rising_threshold: f64, falling_threshold: f64, min_points: usize) -> Self {
        Self {
            rising_threshold,
            falling_threshold,
            min_points,
            mode: TrendMode::Absolute,
        }
    }
}

impl Default for TrendParams {
    /// ±5 % total change over at least four readings.
    fn default() -> Self {
        Self::flow(5.0, -5.0, 4)
    }
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Classifies the trend of a series of readings.
///
/// Non-finite values are dropped and the remaining points are sorted by
/// timestamp if they are not already ascending.
pub fn detect(series: &[HistoricalPoint], params: &TrendParams) -> TrendResult {
    let mut points: Vec<HistoricalPoint> = series
        .iter()
        .filter(|p| p.value.is_finite())
        .copied()
        .collect();
    if !points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp) {
        points.sort_by_key(|p| p.timestamp);
    }

    let sample_count = points.len();
    match fit(&points, params) {
        Ok(result) => result,
        Err(AssessError::DegenerateSeries(Degeneracy::ZeroVariance)) => {
            TrendResult::stable(sample_count)
        }
        Err(_) => TrendResult::unknown(sample_count),
    }
}

/// The fallible core of [`detect`], on finite, ascending points.
fn fit(points: &[HistoricalPoint], params: &TrendParams) -> Result<TrendResult, AssessError> {
    let n = points.len();
    let required = params.min_points.max(2);
    if n < required {
        return Err(AssessError::InsufficientData { available: n, required });
    }

    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    if std_dev(&values) < STD_EPSILON {
        return Err(AssessError::DegenerateSeries(Degeneracy::ZeroVariance));
    }

    let base = points[0].timestamp;
    let hours: Vec<f64> = points
        .iter()
        .map(|p| (p.timestamp - base).num_milliseconds() as f64 / 3_600_000.0)
        .collect();
    let span = hours[n - 1] - hours[0];
    if span < MIN_SPAN_HOURS {
        return Err(AssessError::DegenerateSeries(Degeneracy::ShortSpan));
    }

    let mid = median(&values);
    let normalized: Vec<f64> = match params.mode {
        TrendMode::Percent => {
            if mid < MEDIAN_EPSILON {
                return Err(AssessError::DegenerateSeries(Degeneracy::ZeroMedian));
            }
            values.iter().map(|v| (v - mid) / mid * 100.0).collect()
        }
        TrendMode::Absolute => values.iter().map(|v| v - mid).collect(),
    };

    let rate = ols_slope(&hours, &normalized)
        .ok_or(AssessError::DegenerateSeries(Degeneracy::ShortSpan))?;
    let total_change = rate * span;

    let trend = if total_change >= params.rising_threshold {
        Trend::Rising
    } else if total_change <= params.falling_threshold {
        Trend::Falling
    } else {
        Trend::Stable
    };

    let hours_since_peak = if trend == Trend::Falling {
        let peak = peak_index(&values);
        let age = hours[n - 1] - hours[peak];
        (age > MIN_PEAK_AGE_HOURS).then(|| round_to(age, 1))
    } else {
        None
    };

    Ok(TrendResult {
        trend,
        rate: round_to(rate, 3),
        hours_since_peak,
        sample_count: n,
    })
}

/// Runs [`detect`] for every site in `histories`.
pub fn detect_all(
    histories: &HashMap<String, Vec<HistoricalPoint>>,
    params: &TrendParams,
) -> HashMap<String, TrendResult> {
    let results: HashMap<String, TrendResult> = histories
        .iter()
        .map(|(site_id, series)| (site_id.clone(), detect(series, params)))
        .collect();

    let summary = TrendSummary::from_results(results.values());
    info!(sites = results.len(), mode = ?params.mode, "Trend summary: {}", summary);
    results
}

/// Counts of each trend class across a set of sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrendSummary {
    pub rising: usize,
    pub falling: usize,
    pub stable: usize,
    pub unknown: usize,
}

impl TrendSummary {
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TrendResult>) -> Self {
        let mut summary = Self::default();
        for r in results {
            match r.trend {
                Trend::Rising => summary.rising += 1,
                Trend::Falling => summary.falling += 1,
                Trend::Stable => summary.stable += 1,
                Trend::Unknown => summary.unknown += 1,
            }
        }
        summary
    }
}

impl fmt::Display for TrendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rising, {} falling, {} stable, {} unknown",
            self.rising, self.falling, self.stable, self.unknown
        )
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Sample standard deviation. Callers guarantee at least two values.
fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (n - 1.0)).sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Closed-form least-squares slope of `y` on `x`.
fn ols_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len() as f64;
    let x_mean = x.iter().sum::<f64>() / n;
    let y_mean = y.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - x_mean) * (yi - y_mean);
        sxx += (xi - x_mean).powi(2);
    }

    (sxx > 0.0).then(|| sxy / sxx)
}

/// Index of the first occurrence of the maximum value.
fn peak_index(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
