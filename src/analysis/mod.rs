/// Numeric analysis for the flow status service.
///
/// Submodules:
/// - `percentile` - places a current flow on the day's historical curve.
/// - `status`     - flow and drought labels from a percentile.
/// - `trend`      - rising/falling limb detection by least squares.
/// - `groupings`  - organizes flat samples into per-site series.
///
/// Everything here is pure and safe to call from any worker thread.

pub mod groupings;
pub mod percentile;
pub mod status;
pub mod trend;
