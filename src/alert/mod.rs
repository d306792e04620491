/// Threshold-based alert classification.
///
/// Submodules:
/// - `thresholds` - NWS flood stage category for a gage height.

pub mod thresholds;
