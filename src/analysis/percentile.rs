/// Percentile interpolation against a day's historical threshold curve.
///
/// The baseline for a site/day is a handful of (percentile, flow) knots,
/// typically p05, p10, p25, p50, p75, p90 and p95, any of which may be
/// missing. The current flow is placed on the piecewise-linear curve through
/// the present knots and clamped to the knot range at either end.

use std::collections::BTreeMap;

use crate::model::AssessError;

/// Minimum number of knots needed to draw a line.
const MIN_KNOTS: usize = 2;

/// Interpolates the percentile of `current_value` on the threshold curve.
///
/// Knots are taken in percentile order; non-finite values are ignored.
/// Values at or below the first knot return the first percentile, values at
/// or above the last knot return the last percentile. Nothing is rounded
/// here.
///
/// # Errors
/// `AssessError::InsufficientData` when fewer than two usable knots exist.
pub fn interpolate(current_value: f64, thresholds: &BTreeMap<u8, f64>) -> Result<f64, AssessError> {
    let knots: Vec<(f64, f64)> = thresholds
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(p, v)| (f64::from(*p), *v))
        .collect();

    if knots.len() < MIN_KNOTS {
        return Err(AssessError::InsufficientData {
            available: knots.len(),
            required: MIN_KNOTS,
        });
    }

    let (first_pct, first_val) = knots[0];
    let (last_pct, last_val) = knots[knots.len() - 1];

    if current_value <= first_val {
        return Ok(first_pct);
    }
    if current_value >= last_val {
        return Ok(last_pct);
    }

    // First segment whose upper knot reaches the value. On a monotonic curve
    // this is the bracketing segment; on a corrupted one it is still finite.
    for pair in knots.windows(2) {
        let (p0, v0) = pair[0];
        let (p1, v1) = pair[1];
        if current_value <= v1 {
            let width = v1 - v0;
            if width <= 0.0 {
                // Flat or inverted segment: no slope to follow.
                return Ok(p0);
            }
            let fraction = ((current_value - v0) / width).clamp(0.0, 1.0);
            return Ok(p0 + fraction * (p1 - p0));
        }
    }

    // Unreachable on a monotonic curve; a corrupted one can skip past every
    // upper knot.
    Ok(last_pct)
}

/// Rounds a percentile for presentation (one decimal place).
pub fn round_percentile(percentile: f64) -> f64 {
    (percentile * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
