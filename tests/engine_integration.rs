/// End-to-end assessment: feed → trends → partition → engine → snapshot.
///
/// Uses a local reference directory and an in-memory station registry, so
/// no network or database is needed.
///
/// Run with: cargo test --test engine_integration

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use flostat_service::analysis::trend::TrendParams;
use flostat_service::engine::{
    AssessmentContext, AssessmentEngine, EngineConfig, RegionBatch, partition_by_reference,
    partition_by_registry,
};
use flostat_service::history::{FeedHistory, HistoryWindow, detect_trends};
use flostat_service::ingest::feed::{decode, latest_readings};
use flostat_service::model::{
    CurrentReading, DayKey, DroughtStatus, FloodStatus, FlowStatus, Quantity, ThresholdRow, Trend,
};
use flostat_service::reference::{
    LocalDirStore, ReferenceCache, ReferenceError, ReferenceStore, ReferenceTable,
};
use flostat_service::snapshot::{StatusSnapshot, write_snapshot};
use flostat_service::stations::StationRegistry;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Kingston Mines on a falling limb above flood stage; a Vermont site in
/// low flow; a Vermont site with no baseline; an unregistered site with
/// nothing to report.
const FEED: &str = r#"{
  "stations": [
    {
      "station_id": "st-001", "provider": "USGS", "provider_id": "05568500",
      "readings": [
        { "timestamp": "2024-05-01T06:00:00Z", "water_flow_cfs": 100.0, "river_depth_ft": 17.1, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T07:00:00Z", "water_flow_cfs": 150.0, "river_depth_ft": 18.9, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T08:00:00Z", "water_flow_cfs": 140.0, "river_depth_ft": 18.8, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T09:00:00Z", "water_flow_cfs": 120.0, "river_depth_ft": 18.7, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T10:00:00Z", "water_flow_cfs": 100.0, "river_depth_ft": 18.6, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T11:00:00Z", "water_flow_cfs": 80.0,  "river_depth_ft": 18.5, "water_temp_c": 14.0 },
        { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": 60.0,  "river_depth_ft": 18.42, "water_temp_c": 14.0 }
      ]
    },
    {
      "station_id": "st-002", "provider": "USGS", "provider_id": "01135500",
      "readings": [
        { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": 420.0 }
      ]
    },
    {
      "station_id": "st-003", "provider": "USGS", "provider_id": "01144000",
      "readings": [
        { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": 900.0, "river_depth_ft": 6.0 }
      ]
    },
    {
      "station_id": "st-004", "provider": "USGS", "provider_id": "09999999",
      "readings": [
        { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": -999999.0, "river_depth_ft": 2.0 }
      ]
    }
  ]
}"#;

/// Vermont baseline for 05-01 (01144000 deliberately absent).
const VT_REFERENCE: &str = r#"[
  { "site_id": "01135500", "month_day": "05-01",
    "percentiles": { "5": 400.0, "10": 550.0, "25": 900.0, "50": 1500.0, "75": 2400.0, "90": 3800.0, "95": 5200.0 } }
]"#;

/// Illinois baseline for 05-01.
const IL_REFERENCE: &str = r#"[
  { "site_id": "05568500", "month_day": "05-01",
    "percentiles": { "5": 20.0, "25": 40.0, "50": 70.0, "75": 120.0, "95": 300.0 } }
]"#;

const STATIONS: &str = r#"
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
site_code = "01135500"
name = "Passumpsic River at Passumpsic, VT"
region = "VT"

[[station]]
site_code = "01144000"
name = "White River at West Hartford, VT"
region = "VT"

[station.thresholds]
action_stage_ft = 5.0
flood_stage_ft = 7.0
"#;

fn reference_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("VT_stats.json"), VT_REFERENCE).unwrap();
    std::fs::write(dir.path().join("IL_stats.json"), IL_REFERENCE).unwrap();
    dir
}

fn noon() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[test]
fn test_full_cycle_produces_expected_records() {
    let ref_dir = reference_dir();
    let cache = Arc::new(ReferenceCache::new(Arc::new(LocalDirStore::new(ref_dir.path()))));
    let registry = Arc::new(StationRegistry::from_toml(STATIONS, "stations.toml").unwrap());

    let feed = decode(FEED).unwrap();
    let readings = latest_readings(&feed);
    assert_eq!(readings.len(), 4, "sentinel flow still leaves a valid stage");

    let history = FeedHistory::from_feed(&feed);
    let window = HistoryWindow::new(noon(), 48);
    let flow_trends = detect_trends(&history, Quantity::Flow, &window, &TrendParams::default());
    let temp_trends = detect_trends(
        &history,
        Quantity::WaterTemp,
        &window,
        &TrendParams::temperature(1.0, -1.0, 4),
    );

    let regions = vec!["VT".to_string(), "IL".to_string(), "WY".to_string()];
    let batches = partition_by_reference(readings, &regions, &cache, 4);

    let ctx = AssessmentContext::new(DayKey::new(5, 1).unwrap())
        .with_flood_thresholds(registry)
        .with_trends(flow_trends, temp_trends)
        .with_assessed_at(noon());
    let engine = AssessmentEngine::new(Arc::clone(&cache), EngineConfig::default());
    let report = engine.run(batches, ctx);

    assert!(!report.timed_out);
    assert_eq!(report.regions_assessed, vec!["IL".to_string(), "VT".to_string()]);
    assert_eq!(report.regions_not_found, vec!["WY".to_string()]);
    assert!(report.regions_failed.is_empty());

    let sites: Vec<&str> = report.records.iter().map(|r| r.site_id.as_str()).collect();
    assert_eq!(sites, vec!["01135500", "01144000", "05568500"]);
    assert_eq!(report.stations_dropped, 1, "unregistered sentinel station has nothing to report");

    // Low flow in Vermont: 420 cfs between p5 (400) and p10 (550).
    let vt = &report.records[0];
    assert_eq!(vt.region.as_deref(), Some("VT"));
    assert_eq!(vt.percentile, Some(5.7));
    assert_eq!(vt.flow_status, Some(FlowStatus::BelowNormal));
    assert_eq!(vt.drought_status, Some(DroughtStatus::D2));
    assert_eq!(vt.flood_status, None);
    assert_eq!(vt.trend, Some(Trend::Unknown), "one reading is not enough for a trend");

    // No baseline, but above flood stage.
    let white = &report.records[1];
    assert_eq!(white.percentile, None);
    assert_eq!(white.region, None, "no requested table claims this site");
    assert_eq!(white.flood_status, Some(FloodStatus::ActionStage));

    // Kingston Mines: 60 cfs between p25 (40) and p50 (70), minor flood,
    // falling five hours after the peak.
    let km = &report.records[2];
    assert_eq!(km.region.as_deref(), Some("IL"));
    assert_eq!(km.percentile, Some(41.7));
    assert_eq!(km.flow_status, Some(FlowStatus::Normal));
    assert_eq!(km.flood_status, Some(FloodStatus::MinorFlood));
    assert_eq!(km.trend, Some(Trend::Falling));
    assert_eq!(km.hours_since_peak, Some(5.0));
    assert_eq!(km.water_temp_trend, Some(Trend::Stable));
    assert_eq!(km.observed_at, noon());
    assert_eq!(km.timestamp, noon());

    // Snapshot round trip.
    let out = tempfile::tempdir().unwrap();
    let snapshot = StatusSnapshot::new(noon(), report.records);
    let written = write_snapshot(&snapshot, out.path(), true).unwrap();
    assert!(written.current.exists());
    assert!(out.path().join("history/2024-05-01T1200.json").exists());

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&written.current).unwrap()).unwrap();
    assert_eq!(json["site_count"], 3);
    assert_eq!(json["sites"]["05568500"]["flood_status"], "Minor Flood");
    assert_eq!(json["sites"]["01135500"]["drought_status"], "D2 - Severe Drought");
}

#[test]
fn test_missing_reference_directory_still_yields_flood_records() {
    let cache = Arc::new(ReferenceCache::new(Arc::new(LocalDirStore::new(
        "/nonexistent/reference_stats",
    ))));
    let registry = Arc::new(StationRegistry::from_toml(STATIONS, "stations.toml").unwrap());

    let readings = latest_readings(&decode(FEED).unwrap());
    let batches = partition_by_registry(readings, &registry);

    let ctx = AssessmentContext::new(DayKey::new(5, 1).unwrap()).with_flood_thresholds(registry);
    let engine = AssessmentEngine::new(
        cache,
        EngineConfig {
            max_workers: 2,
            deadline: Some(Duration::from_secs(30)),
            ..EngineConfig::default()
        },
    );
    let report = engine.run(batches, ctx);

    assert_eq!(report.regions_not_found, vec!["IL".to_string(), "VT".to_string()]);
    let sites: Vec<&str> = report.records.iter().map(|r| r.site_id.as_str()).collect();
    assert_eq!(sites, vec!["01144000", "05568500"], "only flood classifications survive");
    assert!(report.records.iter().all(|r| r.percentile.is_none()));
}

#[test]
fn test_each_region_table_loaded_once_across_partition_and_run() {
    let ref_dir = reference_dir();
    let cache = Arc::new(ReferenceCache::new(Arc::new(LocalDirStore::new(ref_dir.path()))));

    let readings = latest_readings(&decode(FEED).unwrap());
    let regions = vec!["VT".to_string(), "IL".to_string()];
    let batches = partition_by_reference(readings, &regions, &cache, 2);

    let engine = AssessmentEngine::new(Arc::clone(&cache), EngineConfig::default());
    engine.run(batches, AssessmentContext::new(DayKey::new(5, 1).unwrap()));

    assert_eq!(cache.stats().loads(), 2, "partition loads each table; the engine hits the cache");
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Serves a one-site table per region; "SLOW" takes seconds to answer.
struct StallingStore;

impl ReferenceStore for StallingStore {
    fn load(&self, region: &str) -> Result<Option<ReferenceTable>, ReferenceError> {
        if region == "SLOW" {
            std::thread::sleep(Duration::from_secs(3));
        }
        Ok(Some(ReferenceTable::from_rows(
            region,
            vec![ThresholdRow {
                site_id: format!("{}-1", region),
                day_key: DayKey::new(5, 1).unwrap(),
                thresholds: BTreeMap::from([(5, 10.0), (50, 50.0), (95, 90.0)]),
            }],
        )))
    }

    fn describe(&self) -> String {
        "stalling".to_string()
    }
}

fn batch(region: &str) -> RegionBatch {
    RegionBatch {
        region: Some(region.to_string()),
        readings: vec![
            CurrentReading::new(format!("{}-1", region), noon(), Some(50.0), None, None).unwrap(),
        ],
    }
}

#[test]
fn test_deadline_returns_partial_results() {
    let cache = Arc::new(ReferenceCache::new(Arc::new(StallingStore)));
    let engine = AssessmentEngine::new(
        cache,
        EngineConfig {
            max_workers: 2,
            deadline: Some(Duration::from_millis(500)),
            ..EngineConfig::default()
        },
    );

    let started = Instant::now();
    let report = engine.run(
        vec![batch("FAST"), batch("SLOW")],
        AssessmentContext::new(DayKey::new(5, 1).unwrap()).with_assessed_at(noon()),
    );

    assert!(report.timed_out);
    assert!(started.elapsed() < Duration::from_secs(2), "run must not wait for the slow region");
    let sites: Vec<&str> = report.records.iter().map(|r| r.site_id.as_str()).collect();
    assert_eq!(sites, vec!["FAST-1"]);
    assert_eq!(report.records[0].percentile, Some(50.0));
    assert_eq!(report.regions_assessed, vec!["FAST".to_string()]);
}
