/// Flow and drought classification from an interpolated percentile.
///
/// Flow status uses fixed USGS WaterWatch-style boundaries. Note that the
/// 5–10 and 10–25 bins both map to "Below Normal" and the 75–90 and 90–95
/// bins both map to "Above Normal": five labels, not seven. This merge is
/// intentional and matches the published status labels.
///
/// Drought status follows the U.S. Drought Monitor percentile cutoffs, which
/// are configurable (see `config::DroughtConfig`).

use serde::{Deserialize, Serialize};

use crate::model::{DroughtStatus, FlowStatus};

/// Returns the flow status label for a percentile in [0, 100].
pub fn flow_status(percentile: f64) -> FlowStatus {
    if percentile < 5.0 {
        FlowStatus::MuchBelowNormal
    } else if percentile < 25.0 {
        FlowStatus::BelowNormal
    } else if percentile < 75.0 {
        FlowStatus::Normal
    } else if percentile < 95.0 {
        FlowStatus::AboveNormal
    } else {
        FlowStatus::MuchAboveNormal
    }
}

/// Percentile cutoffs below which each drought tier applies.
///
/// Cutoffs must descend from D0 to D4; `ServiceConfig::validate` checks this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroughtCutoffs {
    pub d0: f64, // Abnormally Dry
    pub d1: f64, // Moderate Drought
    pub d2: f64, // Severe Drought
    pub d3: f64, // Extreme Drought
    pub d4: f64, // Exceptional Drought
}

impl Default for DroughtCutoffs {
    fn default() -> Self {
        Self {
            d0: 30.0,
            d1: 20.0,
            d2: 10.0,
            d3: 5.0,
            d4: 2.0,
        }
    }
}

impl DroughtCutoffs {
    /// True if cutoffs strictly descend from D0 to D4 within [0, 100].
    pub fn is_descending(&self) -> bool {
        let c = [self.d0, self.d1, self.d2, self.d3, self.d4];
        c.iter().all(|v| (0.0..=100.0).contains(v)) && c.windows(2).all(|w| w[0] > w[1])
    }
}

/// Returns the drought tier for a percentile, or `None` when the percentile
/// is at or above the D0 cutoff.
///
/// Tiers are tested most severe first so the lowest matching tier wins.
pub fn drought_status(percentile: f64, cutoffs: &DroughtCutoffs) -> Option<DroughtStatus> {
    if percentile < cutoffs.d4 {
        Some(DroughtStatus::D4)
    } else if percentile < cutoffs.d3 {
        Some(DroughtStatus::D3)
    } else if percentile < cutoffs.d2 {
        Some(DroughtStatus::D2)
    } else if percentile < cutoffs.d1 {
        Some(DroughtStatus::D1)
    } else if percentile < cutoffs.d0 {
        Some(DroughtStatus::D0)
    } else {
        None
    }
}
