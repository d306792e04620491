/// Site grouping and data organization utilities.
///
/// `group_by_site` takes flat, site-tagged samples (as produced by the feed
/// decoder or the snapshot history loader) and organizes them into per-site
/// series in ascending timestamp order, which is what the trend detector
/// expects. `latest_by_site` collapses a list of current readings to one per
/// site.

use std::collections::HashMap;

use crate::model::{CurrentReading, HistoricalPoint};

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Groups `(site_id, point)` samples into per-site series sorted by time.
///
/// If multiple samples share a site and timestamp (which shouldn't happen
/// with a well-formed feed but can when overlapping snapshots are merged),
/// the last one encountered wins.
pub fn group_by_site(samples: Vec<(String, HistoricalPoint)>) -> HashMap<String, Vec<HistoricalPoint>> {
    let mut grouped: HashMap<String, Vec<HistoricalPoint>> = HashMap::new();

    for (site_id, point) in samples {
        grouped.entry(site_id).or_default().push(point);
    }

    for series in grouped.values_mut() {
        // Stable sort keeps encounter order among equal timestamps, so the
        // last duplicate is the one retained below.
        series.sort_by_key(|p| p.timestamp);
        let mut deduped: Vec<HistoricalPoint> = Vec::with_capacity(series.len());
        for point in series.drain(..) {
            match deduped.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => deduped.push(point),
            }
        }
        *series = deduped;
    }

    grouped
}

/// Keeps the most recent reading for each site.
///
/// Ties on timestamp go to the reading encountered last.
pub fn latest_by_site(readings: Vec<CurrentReading>) -> HashMap<String, CurrentReading> {
    let mut latest: HashMap<String, CurrentReading> = HashMap::new();

    for reading in readings {
        match latest.get(&reading.site_id) {
            Some(existing) if existing.timestamp > reading.timestamp => {}
            _ => {
                latest.insert(reading.site_id.clone(), reading);
            }
        }
    }

    latest
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn at(minutes: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_group_by_site_sorts_each_series_ascending() {
        let samples = vec![
            ("05568500".to_string(), HistoricalPoint::new(at(30), 3.0)),
            ("05568500".to_string(), HistoricalPoint::new(at(0), 1.0)),
            ("05568500".to_string(), HistoricalPoint::new(at(15), 2.0)),
        ];
        let grouped = group_by_site(samples);
        let values: Vec<f64> = grouped["05568500"].iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_group_by_site_produces_one_entry_per_site() {
        let samples = vec![
            ("05568500".to_string(), HistoricalPoint::new(at(0), 1.0)),
            ("05567500".to_string(), HistoricalPoint::new(at(0), 2.0)),
            ("05568500".to_string(), HistoricalPoint::new(at(15), 3.0)),
        ];
        let grouped = group_by_site(samples);
        assert_eq!(grouped.len(), 2, "should have exactly 2 site entries");
        assert_eq!(grouped["05568500"].len(), 2);
        assert_eq!(grouped["05567500"].len(), 1);
    }

    #[test]
    fn test_group_by_site_duplicate_timestamp_last_wins() {
        let samples = vec![
            ("05568500".to_string(), HistoricalPoint::new(at(0), 1.0)),
            ("05568500".to_string(), HistoricalPoint::new(at(0), 9.0)),
        ];
        let grouped = group_by_site(samples);
        assert_eq!(grouped["05568500"], vec![HistoricalPoint::new(at(0), 9.0)]);
    }

    #[test]
    fn test_group_by_site_empty_input_returns_empty_map() {
        assert!(group_by_site(vec![]).is_empty(), "empty input should produce empty map");
    }

    #[test]
    fn test_latest_by_site_keeps_newest_reading() {
        let old = CurrentReading::new("05568500", at(0), Some(40_000.0), None, None).unwrap();
        let new = CurrentReading::new("05568500", at(15), Some(42_300.0), Some(18.42), None).unwrap();
        let latest = latest_by_site(vec![new.clone(), old]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["05568500"], new);
    }
}
