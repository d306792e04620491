/// Test fixtures: representative bulk readings documents.
///
/// Feed shape:
///   stations[]
///     .station_id   - feed-internal identifier
///     .name, .provider, .provider_id (USGS site number when provider is USGS)
///     .readings[]
///       .timestamp       - ISO 8601, with or without offset
///       .water_flow_cfs  - discharge; -999999 is the USGS missing/ice code
///       .river_depth_ft  - gage height
///       .water_temp_c
///
/// Any measured field may be null or absent on any reading.

/// Kingston Mines on a falling limb (hourly flow 100 → 60 after a peak of
/// 150) with stage above flood stage, and a Vermont site whose latest
/// reading carries only temperature.
pub(crate) fn fixture_two_station_feed_json() -> &'static str {
    r#"{
      "stations": [
        {
          "station_id": "st-001",
          "name": "Illinois River at Kingston Mines, IL",
          "provider": "USGS",
          "provider_id": "05568500",
          "readings": [
            { "timestamp": "2024-05-01T06:00:00Z", "water_flow_cfs": 100.0, "river_depth_ft": 17.1, "water_temp_c": 14.0 },
            { "timestamp": "2024-05-01T07:00:00Z", "water_flow_cfs": 150.0, "river_depth_ft": 18.9, "water_temp_c": 14.1 },
            { "timestamp": "2024-05-01T08:00:00Z", "water_flow_cfs": 140.0, "river_depth_ft": 18.8, "water_temp_c": 14.1 },
            { "timestamp": "2024-05-01T09:00:00Z", "water_flow_cfs": 120.0, "river_depth_ft": 18.7, "water_temp_c": 14.2 },
            { "timestamp": "2024-05-01T10:00:00Z", "water_flow_cfs": 100.0, "river_depth_ft": 18.6, "water_temp_c": 14.2 },
            { "timestamp": "2024-05-01T11:00:00Z", "water_flow_cfs": 80.0,  "river_depth_ft": 18.5, "water_temp_c": 14.3 },
            { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": 60.0,  "river_depth_ft": 18.42, "water_temp_c": null }
          ]
        },
        {
          "station_id": "st-002",
          "name": "Winooski River near Essex Junction, VT",
          "provider": "USGS",
          "provider_id": "04290500",
          "readings": [
            { "timestamp": "2024-05-01T11:00:00Z", "water_flow_cfs": 1500.0, "river_depth_ft": 4.2 },
            { "timestamp": "2024-05-01T12:00:00Z", "water_flow_cfs": null, "water_temp_c": 9.5 }
          ]
        }
      ]
    }"#
}

/// Stations exercising the invalid-value rules: an ice-affected flow
/// sentinel, a nonsense stage, a station with no usable field at all, a
/// naive timestamp, and a non-USGS provider.
pub(crate) fn fixture_invalid_values_feed_json() -> &'static str {
    r#"{
      "stations": [
        {
          "station_id": "st-ice",
          "provider": "USGS",
          "provider_id": "01135500",
          "readings": [
            { "timestamp": "2024-01-15T12:00:00", "water_flow_cfs": -999999.0, "river_depth_ft": 3.1 }
          ]
        },
        {
          "station_id": "st-dead",
          "provider": "USGS",
          "provider_id": "01144000",
          "readings": [
            { "timestamp": "2024-01-15T12:00:00Z", "water_flow_cfs": 0.0, "river_depth_ft": -999.0 }
          ]
        },
        {
          "station_id": "st-badtime",
          "provider": "USGS",
          "provider_id": "01150500",
          "readings": [
            { "timestamp": "yesterday", "water_flow_cfs": 10.0 }
          ]
        },
        {
          "station_id": "cw-77",
          "provider": "CWMS",
          "provider_id": "PEOI2",
          "readings": [
            { "timestamp": "2024-01-15T12:00:00-06:00", "river_depth_ft": 11.0 }
          ]
        }
      ]
    }"#
}
