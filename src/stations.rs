/// Station registry and NWS flood stage thresholds.
///
/// Stations are listed in `stations.toml` so thresholds can be updated or
/// stations added without recompiling the service. A JSON export of NWS
/// flood stages (one object per site) is also accepted, for regions where
/// the threshold set is pulled from the NWS rather than maintained by hand.
///
/// The registry is the only source of flood stages; gage heights for sites
/// not listed here get no flood classification.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::model::FloodThresholdRow;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StationsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("duplicate site code '{0}' in station registry")]
    DuplicateSite(String),
}

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// One `[[station]]` entry from stations.toml.
#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    /// USGS site code, as it appears in the feed.
    pub site_code: String,
    pub name: String,
    /// Region (state) whose baseline table covers this station.
    #[serde(default)]
    pub region: Option<String>,
    /// NWS flood stages; absent for pool gauges and most tributaries.
    #[serde(default)]
    pub thresholds: Option<FloodThresholdRow>,
}

/// Root structure for TOML parsing.
#[derive(Debug, Deserialize)]
struct StationFile {
    #[serde(default)]
    station: Vec<StationConfig>,
}

/// One entry of the NWS threshold JSON export.
#[derive(Debug, Deserialize)]
struct NwsThresholdEntry {
    site_id: String,
    #[serde(default)]
    action_stage: Option<f64>,
    #[serde(default)]
    flood_stage: Option<f64>,
    #[serde(default)]
    moderate_flood_stage: Option<f64>,
    #[serde(default)]
    major_flood_stage: Option<f64>,
}

impl From<NwsThresholdEntry> for FloodThresholdRow {
    fn from(entry: NwsThresholdEntry) -> Self {
        FloodThresholdRow {
            action_stage_ft: entry.action_stage,
            flood_stage_ft: entry.flood_stage,
            moderate_flood_stage_ft: entry.moderate_flood_stage,
            major_flood_stage_ft: entry.major_flood_stage,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Stations and flood thresholds keyed by site code.
#[derive(Debug, Clone, Default)]
pub struct StationRegistry {
    stations: HashMap<String, StationConfig>,
}

impl StationRegistry {
    pub fn from_stations(stations: Vec<StationConfig>) -> Result<Self, StationsError> {
        let mut map = HashMap::with_capacity(stations.len());
        for station in stations {
            if map.contains_key(&station.site_code) {
                return Err(StationsError::DuplicateSite(station.site_code));
            }
            map.insert(station.site_code.clone(), station);
        }
        let registry = Self { stations: map };
        registry.warn_unordered();
        Ok(registry)
    }

    /// Parses stations.toml contents. `origin` is only used in error messages.
    pub fn from_toml(contents: &str, origin: &str) -> Result<Self, StationsError> {
        let file: StationFile = toml::from_str(contents).map_err(|e| StationsError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Self::from_stations(file.station)
    }

    /// Parses a JSON array of NWS threshold entries. Entries carry no region
    /// or name; the site code stands in for the name.
    pub fn from_nws_json(contents: &str, origin: &str) -> Result<Self, StationsError> {
        let entries: Vec<NwsThresholdEntry> =
            serde_json::from_str(contents).map_err(|e| StationsError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;

        let stations = entries
            .into_iter()
            .map(|entry| StationConfig {
                site_code: entry.site_id.clone(),
                name: entry.site_id.clone(),
                region: None,
                thresholds: Some(entry.into()),
            })
            .collect();
        Self::from_stations(stations)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn get(&self, site_code: &str) -> Option<&StationConfig> {
        self.stations.get(site_code)
    }

    /// Flood stages for `site_code`, if the station defines any.
    pub fn lookup(&self, site_code: &str) -> Option<&FloodThresholdRow> {
        self.stations
            .get(site_code)?
            .thresholds
            .as_ref()
            .filter(|t| !t.is_empty())
    }

    pub fn region_of(&self, site_code: &str) -> Option<&str> {
        self.stations.get(site_code)?.region.as_deref()
    }

    /// Sorted site codes of all registered stations.
    pub fn site_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.stations.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }

    /// Adds stations from `other`. Entries in `other` replace existing
    /// thresholds but keep an existing name and region when `other` has none.
    pub fn merge(&mut self, other: StationRegistry) {
        for (code, incoming) in other.stations {
            match self.stations.get_mut(&code) {
                Some(existing) => {
                    if incoming.thresholds.is_some() {
                        existing.thresholds = incoming.thresholds;
                    }
                    if incoming.region.is_some() {
                        existing.region = incoming.region;
                    }
                }
                None => {
                    self.stations.insert(code, incoming);
                }
            }
        }
        self.warn_unordered();
    }

    /// Site codes whose defined stages are not in ascending order.
    ///
    /// Such stations are still classified (most severe level first), but
    /// the result may be surprising, so they are reported at load time.
    pub fn unordered_sites(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .stations
            .values()
            .filter(|s| s.thresholds.as_ref().is_some_and(|t| !t.is_ordered()))
            .map(|s| s.site_code.as_str())
            .collect();
        codes.sort_unstable();
        codes
    }

    fn warn_unordered(&self) {
        for code in self.unordered_sites() {
            warn!(site_code = code, "Flood stages are not in ascending order");
        }
    }
}

/// The registry as seen by the assessment engine: a site-to-stages lookup.
pub type FloodThresholdSet = StationRegistry;

// ---------------------------------------------------------------------------
// Loaders
// ---------------------------------------------------------------------------

/// Loads the station registry from a TOML file.
pub fn load_stations(path: &Path) -> Result<StationRegistry, StationsError> {
    let contents = read(path)?;
    let registry = StationRegistry::from_toml(&contents, &path.display().to_string())?;
    info!(path = %path.display(), stations = registry.len(), "Loaded station registry");
    Ok(registry)
}

/// Loads flood thresholds from an NWS JSON export.
pub fn load_nws_thresholds(path: &Path) -> Result<StationRegistry, StationsError> {
    let contents = read(path)?;
    let registry = StationRegistry::from_nws_json(&contents, &path.display().to_string())?;
    info!(path = %path.display(), stations = registry.len(), "Loaded NWS flood thresholds");
    Ok(registry)
}

fn read(path: &Path) -> Result<String, StationsError> {
    fs::read_to_string(path).map_err(|e| StationsError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY_TOML: &str = r#"
        [[station]]
        site_code = "05568500"
        name = "Illinois River at Kingston Mines, IL"
        region = "IL"

        [station.thresholds]
        action_stage_ft = 14.0
        flood_stage_ft = 16.0
        moderate_flood_stage_ft = 20.0
        major_flood_stage_ft = 24.0

        [[station]]
        site_code = "05567500"
        name = "Illinois River at Peoria, IL"
        region = "IL"

        [[station]]
        site_code = "05570000"
        name = "Spoon River at Seville, IL"

        [station.thresholds]
        flood_stage_ft = 15.0
    "#;

    fn registry() -> StationRegistry {
        StationRegistry::from_toml(REGISTRY_TOML, "test").expect("fixture should parse")
    }

    #[test]
    fn test_kingston_mines_has_thresholds() {
        let reg = registry();
        let t = reg.lookup("05568500").expect("Kingston Mines should have thresholds");
        assert_eq!(t.action_stage_ft, Some(14.0));
        assert_eq!(t.flood_stage_ft, Some(16.0));
        assert_eq!(t.moderate_flood_stage_ft, Some(20.0));
        assert_eq!(t.major_flood_stage_ft, Some(24.0));
    }

    #[test]
    fn test_peoria_pool_has_no_thresholds() {
        assert!(registry().lookup("05567500").is_none());
    }

    #[test]
    fn test_partial_thresholds_are_kept() {
        let reg = registry();
        let t = reg.lookup("05570000").expect("partial thresholds");
        assert_eq!(t.flood_stage_ft, Some(15.0));
        assert_eq!(t.action_stage_ft, None);
    }

    #[test]
    fn test_region_of() {
        let reg = registry();
        assert_eq!(reg.region_of("05568500"), Some("IL"));
        assert_eq!(reg.region_of("05570000"), None);
        assert_eq!(reg.region_of("00000000"), None);
    }

    #[test]
    fn test_duplicate_site_codes_rejected() {
        let toml = r#"
            [[station]]
            site_code = "05568500"
            name = "a"
            [[station]]
            site_code = "05568500"
            name = "b"
        "#;
        assert!(matches!(
            StationRegistry::from_toml(toml, "test"),
            Err(StationsError::DuplicateSite(code)) if code == "05568500"
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = StationRegistry::from_toml("[[station]\nsite_code=", "bad.toml").unwrap_err();
        assert!(matches!(err, StationsError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_nws_json_loader() {
        let json = r#"[
            {"site_id": "01135500", "action_stage": 8.0, "flood_stage": 10.0,
             "moderate_flood_stage": 14.0, "major_flood_stage": 18.0},
            {"site_id": "01144000", "action_stage": null, "flood_stage": 12.0}
        ]"#;
        let reg = StationRegistry::from_nws_json(json, "nws.json").unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.lookup("01135500").unwrap().major_flood_stage_ft, Some(18.0));
        let partial = reg.lookup("01144000").unwrap();
        assert_eq!(partial.action_stage_ft, None);
        assert_eq!(partial.flood_stage_ft, Some(12.0));
    }

    #[test]
    fn test_merge_overrides_thresholds_and_keeps_region() {
        let mut reg = registry();
        let json = r#"[{"site_id": "05568500", "flood_stage": 17.0}]"#;
        reg.merge(StationRegistry::from_nws_json(json, "nws.json").unwrap());

        let t = reg.lookup("05568500").unwrap();
        assert_eq!(t.flood_stage_ft, Some(17.0));
        assert_eq!(t.action_stage_ft, None, "merged row replaces the whole set");
        assert_eq!(reg.region_of("05568500"), Some("IL"));
    }

    #[test]
    fn test_unordered_sites_reported() {
        let toml = r#"
            [[station]]
            site_code = "X"
            name = "backwards"
            [station.thresholds]
            action_stage_ft = 20.0
            flood_stage_ft = 10.0
        "#;
        let reg = StationRegistry::from_toml(toml, "test").unwrap();
        assert_eq!(reg.unordered_sites(), vec!["X"]);
        assert!(registry().unordered_sites().is_empty());
    }

    #[test]
    fn test_load_stations_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.toml");
        std::fs::write(&path, REGISTRY_TOML).unwrap();
        let reg = load_stations(&path).unwrap();
        assert_eq!(reg.site_codes(), vec!["05567500", "05568500", "05570000"]);
    }

    #[test]
    fn test_load_stations_missing_file_is_io_error() {
        let err = load_stations(Path::new("/nonexistent/stations.toml")).unwrap_err();
        assert!(matches!(err, StationsError::Io { .. }));
    }

    #[test]
    fn test_repository_stations_toml_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("stations.toml");
        let reg = load_stations(&path).expect("stations.toml should load");
        assert!(reg.len() >= 5, "should have at least 5 stations");
        assert!(reg.unordered_sites().is_empty(), "shipped thresholds must be ordered");
        for code in reg.site_codes() {
            assert_eq!(code.len(), 8, "site code '{}' should be 8 digits", code);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
