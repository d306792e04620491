/// Flood stage threshold checking.
///
/// Compares a gage height against a site's NWS flood categories. Sites can
/// define any subset of the four stages; missing stages are skipped rather
/// than treated as failures.

use crate::model::{FloodStatus, FloodThresholdRow};

/// Returns the flood category for a gage height, or `None` when there is no
/// reading, no threshold row, or the stage is below every defined level.
///
/// Levels are tested most severe first, so a gage above several levels gets
/// the most severe one it reaches.
pub fn flood_status(
    gage_height: Option<f64>,
    thresholds: Option<&FloodThresholdRow>,
) -> Option<FloodStatus> {
    let gage = gage_height.filter(|g| g.is_finite())?;
    let t = thresholds?;

    let levels = [
        (t.major_flood_stage_ft, FloodStatus::MajorFlood),
        (t.moderate_flood_stage_ft, FloodStatus::ModerateFlood),
        (t.flood_stage_ft, FloodStatus::MinorFlood),
        (t.action_stage_ft, FloodStatus::ActionStage),
    ];

    levels
        .into_iter()
        .find(|(stage, _)| matches!(stage, Some(s) if gage >= *s))
        .map(|(_, status)| status)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
