/// Service configuration loader - parses flostat.toml
///
/// Every setting has a default, so the service runs with no config file at
/// all. Values are resolved in this order, later wins:
///
///   1. built-in defaults
///   2. flostat.toml (or the file given with --config)
///   3. environment (`.env` is read first via dotenv)
///   4. command-line flags, applied by the binary
///
/// Environment overrides: `MAX_WORKERS`, `REFERENCE_BASE_URL`,
/// `REFERENCE_DIR`, `FLOSTAT_DEADLINE_SECS`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;

use crate::analysis::status::DroughtCutoffs;
use crate::analysis::trend::TrendParams;
use crate::reference::store::{DEFAULT_PREFIX, DEFAULT_TIMEOUT_SECS};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Root of flostat.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub drought: DroughtCutoffs,
    pub trend: TrendConfig,
    pub reference: ReferenceConfig,
    pub stations: StationsConfig,
    pub engine: EngineSettings,
    pub output: OutputConfig,
}

/// `[trend]`: window and thresholds for flow and water temperature trends.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// How far back the history window reaches.
    pub window_hours: i64,
    pub min_data_points: usize,
    /// Percent total change over the window.
    pub flow_rising_pct: f64,
    pub flow_falling_pct: f64,
    /// Degrees C total change over the window.
    pub temp_rising_c: f64,
    pub temp_falling_c: f64,
    /// Directory of prior snapshots. When unset, trends come from the feed.
    pub history_dir: Option<PathBuf>,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            window_hours: 48,
            min_data_points: 4,
            flow_rising_pct: 5.0,
            flow_falling_pct: -5.0,
            temp_rising_c: 1.0,
            temp_falling_c: -1.0,
            history_dir: None,
        }
    }
}

impl TrendConfig {
    pub fn flow_params(&self) -> TrendParams {
        TrendParams::flow(self.flow_rising_pct, self.flow_falling_pct, self.min_data_points)
    }

    pub fn temperature_params(&self) -> TrendParams {
        TrendParams::temperature(self.temp_rising_c, self.temp_falling_c, self.min_data_points)
    }
}

/// `[reference]`: where baseline tables live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Local directory checked first (`{region}_stats.json`).
    pub local_dir: Option<PathBuf>,
    /// Object-storage base URL, checked when the local file is missing.
    pub base_url: Option<String>,
    pub prefix: String,
    pub timeout_secs: u64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            local_dir: Some(PathBuf::from("reference_stats")),
            base_url: None,
            prefix: DEFAULT_PREFIX.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ReferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[stations]`: flood threshold sources.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StationsConfig {
    /// Station registry TOML. A missing file means no flood thresholds.
    pub registry: PathBuf,
    /// Optional NWS threshold export merged over the registry.
    pub nws_thresholds: Option<PathBuf>,
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            registry: PathBuf::from("stations.toml"),
            nws_thresholds: None,
        }
    }
}

/// `[engine]`: parallelism and batch deadline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub max_workers: usize,
    /// Wall-clock limit for one batch; partial results are kept on expiry.
    pub deadline_secs: Option<u64>,
    /// UTC offset of the stations' local day, used to pick the day key.
    /// Unset means the system's local time zone.
    pub day_key_utc_offset_hours: Option<i32>,
}

impl EngineSettings {
    pub fn day_key_offset(&self) -> Option<FixedOffset> {
        self.day_key_utc_offset_hours
            .and_then(|hours| FixedOffset::east_opt(hours * 3600))
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_workers: 10,
            deadline_secs: None,
            day_key_utc_offset_hours: None,
        }
    }
}

/// `[output]`: where snapshots are written.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Also write a timestamped copy under `{dir}/history/`.
    pub write_history: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("live_output"),
            write_history: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl ServiceConfig {
    /// Parses TOML contents. `origin` is only used in error messages.
    pub fn from_toml(contents: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Reads `path`. A missing file yields the defaults; any other read
    /// failure is an error.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents, &path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Loads `path`, applies environment overrides, and validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAX_WORKERS") {
            self.engine.max_workers = parse_env("MAX_WORKERS", &v)?;
        }
        if let Some(v) = get("FLOSTAT_DEADLINE_SECS") {
            self.engine.deadline_secs = Some(parse_env("FLOSTAT_DEADLINE_SECS", &v)?);
        }
        if let Some(v) = get("REFERENCE_BASE_URL") {
            self.reference.base_url = Some(v);
        }
        if let Some(v) = get("REFERENCE_DIR") {
            self.reference.local_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.drought.is_descending() {
            return Err(ConfigError::Invalid(format!(
                "drought cutoffs must strictly descend from d0 to d4 within 0-100, got {:?}",
                self.drought
            )));
        }
        if self.trend.min_data_points < 2 {
            return Err(ConfigError::Invalid(
                "trend.min_data_points must be at least 2".to_string(),
            ));
        }
        if self.trend.window_hours <= 0 {
            return Err(ConfigError::Invalid(
                "trend.window_hours must be positive".to_string(),
            ));
        }
        if self.trend.flow_rising_pct <= self.trend.flow_falling_pct {
            return Err(ConfigError::Invalid(
                "trend.flow_rising_pct must be greater than trend.flow_falling_pct".to_string(),
            ));
        }
        if self.trend.temp_rising_c <= self.trend.temp_falling_c {
            return Err(ConfigError::Invalid(
                "trend.temp_rising_c must be greater than trend.temp_falling_c".to_string(),
            ));
        }
        if self.engine.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_workers must be at least 1".to_string(),
            ));
        }
        if self.engine.deadline_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "engine.deadline_secs must be positive when set".to_string(),
            ));
        }
        if let Some(hours) = self.engine.day_key_utc_offset_hours {
            if !(-12..=14).contains(&hours) {
                return Err(ConfigError::Invalid(format!(
                    "engine.day_key_utc_offset_hours must be within -12..=14, got {}",
                    hours
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{}='{}' is not a valid number", key, value)))
}
