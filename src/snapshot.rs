/// Status snapshot output.
///
/// Each run writes the full set of station records as one JSON document:
///
/// ```text
/// {output_dir}/current_status.json            - overwritten every run
/// {output_dir}/history/YYYY-MM-DDTHHMM.json   - one per run, kept
/// ```
///
/// The history copies double as a trend source for later runs
/// (see `history::SnapshotHistory`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::StatusRecord;

pub const CURRENT_FILE: &str = "current_status.json";
pub const HISTORY_DIR: &str = "history";
/// Filename stem format of history snapshots.
pub const HISTORY_STEM_FORMAT: &str = "%Y-%m-%dT%H%M";

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub site_count: usize,
    pub sites: BTreeMap<String, StatusRecord>,
}

impl StatusSnapshot {
    pub fn new(generated_at: DateTime<Utc>, records: Vec<StatusRecord>) -> Self {
        let sites: BTreeMap<String, StatusRecord> = records
            .into_iter()
            .map(|r| (r.site_id.clone(), r))
            .collect();
        Self {
            generated_at,
            site_count: sites.len(),
            sites,
        }
    }

    pub fn history_file_name(&self) -> String {
        format!("{}.json", self.generated_at.format(HISTORY_STEM_FORMAT))
    }
}

/// Parses the timestamp encoded in a history snapshot file name.
pub fn parse_history_file_name(path: &Path) -> Option<DateTime<Utc>> {
    if path.extension()? != "json" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, HISTORY_STEM_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Paths written by [`write_snapshot`].
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenSnapshot {
    pub current: PathBuf,
    pub history: Option<PathBuf>,
}

/// Writes `current_status.json` and, if `with_history`, the timestamped
/// copy. Directories are created as needed.
pub fn write_snapshot(
    snapshot: &StatusSnapshot,
    output_dir: &Path,
    with_history: bool,
) -> Result<WrittenSnapshot, SnapshotError> {
    let json = serde_json::to_string_pretty(snapshot)?;

    create_dir(output_dir)?;
    let current = output_dir.join(CURRENT_FILE);
    write_file(&current, &json)?;

    let history = if with_history {
        let dir = output_dir.join(HISTORY_DIR);
        create_dir(&dir)?;
        let path = dir.join(snapshot.history_file_name());
        write_file(&path, &json)?;
        Some(path)
    } else {
        None
    };

    info!(
        sites = snapshot.site_count,
        path = %current.display(),
        "Wrote status snapshot"
    );
    Ok(WrittenSnapshot { current, history })
}

fn create_dir(dir: &Path) -> Result<(), SnapshotError> {
    fs::create_dir_all(dir).map_err(|e| SnapshotError::Io {
        path: dir.display().to_string(),
        source: e,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), SnapshotError> {
    fs::write(path, contents).map_err(|e| SnapshotError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{FloodStatus, FlowStatus, Trend};
    use chrono::TimeZone;

    pub(crate) fn record(site_id: &str, flow: f64, at: DateTime<Utc>) -> StatusRecord {
        StatusRecord {
            site_id: site_id.to_string(),
            region: Some("IL".to_string()),
            flow: Some(flow),
            gage_height: Some(18.42),
            water_temp: Some(14.3),
            percentile: Some(62.5),
            flow_status: Some(FlowStatus::Normal),
            drought_status: None,
            flood_status: Some(FloodStatus::MinorFlood),
            trend: Some(Trend::Falling),
            trend_rate: Some(-6.1),
            hours_since_peak: Some(5.0),
            water_temp_trend: Some(Trend::Stable),
            observed_at: at,
            timestamp: at,
        }
    }

    #[test]
    fn test_snapshot_indexes_records_by_site() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snap = StatusSnapshot::new(at, vec![record("05568500", 60.0, at), record("05557000", 80.0, at)]);
        assert_eq!(snap.site_count, 2);
        assert!(snap.sites.contains_key("05568500"));
        assert_eq!(snap.history_file_name(), "2024-05-01T1200.json");
    }

    #[test]
    fn test_write_snapshot_creates_current_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        let snap = StatusSnapshot::new(at, vec![record("05568500", 60.0, at)]);

        let written = write_snapshot(&snap, &dir.path().join("out"), true).unwrap();
        assert!(written.current.ends_with("current_status.json"));
        let history = written.history.expect("history path");
        assert!(history.ends_with("history/2024-05-01T1205.json"));

        let back: StatusSnapshot =
            serde_json::from_str(&std::fs::read_to_string(&written.current).unwrap()).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_write_snapshot_without_history() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snap = StatusSnapshot::new(at, vec![]);
        let written = write_snapshot(&snap, dir.path(), false).unwrap();
        assert!(written.history.is_none());
        assert!(!dir.path().join(HISTORY_DIR).exists());
    }

    #[test]
    fn test_snapshot_labels_serialize_as_strings() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snap = StatusSnapshot::new(at, vec![record("05568500", 60.0, at)]);
        let json = serde_json::to_value(&snap).unwrap();
        let site = &json["sites"]["05568500"];
        assert_eq!(site["flood_status"], "Minor Flood");
        assert_eq!(site["flow_status"], "Normal");
        assert_eq!(site["trend"], "falling");
        assert!(site["drought_status"].is_null());
    }

    #[test]
    fn test_parse_history_file_name() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
        assert_eq!(
            parse_history_file_name(Path::new("/x/2024-05-01T1205.json")),
            Some(expected)
        );
        assert_eq!(parse_history_file_name(Path::new("current_status.json")), None);
        assert_eq!(parse_history_file_name(Path::new("2024-05-01T1205.txt")), None);
    }
}
