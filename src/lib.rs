/// flostat_service: live river gauge status assessment.
///
/// # Module structure
///
/// ```text
/// flostat_service
/// ├── model       - shared data types (CurrentReading, ThresholdRow, StatusRecord, AssessError, …)
/// ├── config      - service configuration loader (flostat.toml + environment)
/// ├── logging     - tracing subscriber setup for the binary
/// ├── stations    - station registry with NWS flood stage thresholds (stations.toml)
/// ├── reference
/// │   ├── cache   - single-flight read-through cache of region baseline tables
/// │   └── store   - local directory, HTTP object storage, layered lookup
/// ├── ingest
/// │   ├── feed    - bulk readings feed: latest values and history series
/// │   └── fixtures (test only) - representative feed payloads
/// ├── history     - trend input sources (feed-embedded, prior snapshots)
/// ├── alert
/// │   └── thresholds - flood stage severity evaluation
/// ├── analysis
/// │   ├── percentile - baseline interpolation
/// │   ├── status     - flow condition and drought tier labels
/// │   ├── trend      - rising/falling/stable detection
/// │   └── groupings  - organizes flat samples into per-site series
/// ├── engine      - batch assessment over a worker pool
/// └── snapshot    - status snapshot output
/// ```

/// Public modules
pub mod alert;
pub mod analysis;
pub mod config;
pub mod engine;
pub mod history;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod reference;
pub mod snapshot;
pub mod stations;
