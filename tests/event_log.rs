use serde_json::json;
use std::fs;

use occupancy_kernel::{BusinessType, EventLog, EventQuery, ExportFormat};

#[test]
fn reload_skips_malformed_lines_and_reads_legacy_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events_supermarket.log");
    let lines = [
        r#"{"timestamp":100.0,"datetime":"1970-01-01 00:01:40","type":"detection","data":{"class_name":"person"},"business_type":"supermarket","confidence":0.9}"#,
        "{ this is not json",
        "",
        "2024-03-01 09:15:00,person,0.87",
        r#"{"timestamp":200.0,"datetime":"1970-01-01 00:03:20","type":"stream_connected","data":{"source":"stub://cam"}}"#,
        "garbage,row",
    ];
    fs::write(&path, lines.join("\n")).unwrap();

    let log = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.skipped_lines(), 2);

    let legacy: Vec<_> = log
        .events()
        .filter(|e| e.data.get("confidence").is_some())
        .collect();
    assert_eq!(legacy.len(), 1);
    assert_eq!(legacy[0].event_type, "detection");
    assert_eq!(legacy[0].data["class_name"], "person");
    assert_eq!(legacy[0].effective_confidence(), Some(0.87));
}

#[test]
fn per_business_type_files_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let mut market = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    let mut pharmacy = EventLog::for_business_type(dir.path(), BusinessType::Pharmacy).unwrap();

    market.log("detection", json!({"class_name": "person"}), Some(0.8)).unwrap();
    market.log("detection", json!({"class_name": "shopping cart"}), Some(0.6)).unwrap();
    pharmacy.log("detection", json!({"class_name": "bottle"}), Some(0.5)).unwrap();

    let market = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    let pharmacy = EventLog::for_business_type(dir.path(), BusinessType::Pharmacy).unwrap();
    assert_eq!(market.len(), 2);
    assert_eq!(pharmacy.len(), 1);
    assert!(pharmacy
        .events()
        .all(|e| e.business_type.as_deref() == Some("pharmacy")));
}

#[test]
fn csv_export_has_header_and_one_row_per_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = EventLog::for_business_type(dir.path(), BusinessType::Condominium).unwrap();
    log.log_at("detection", json!({"class_name": "person", "zone": "entrance"}), Some(0.75), 1000.0)
        .unwrap();
    log.log_at("stream_disconnected", json!({"source": "stub://gate"}), None, 1001.0)
        .unwrap();

    let out = dir.path().join("export.csv");
    assert_eq!(log.export(&out, ExportFormat::Csv).unwrap(), 2);

    let text = fs::read_to_string(&out).unwrap();
    let rows: Vec<&str> = text.lines().collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0], "timestamp,datetime,type,confidence,data");
    assert!(rows[1].starts_with("1000,"));
    assert!(rows[1].contains(",detection,0.75,"));
    assert!(rows[1].ends_with(r#"{"class_name":"person","zone":"entrance"}"#));
    assert!(rows[2].contains(",stream_disconnected,,"));
}

#[test]
fn json_export_round_trips_through_serde() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    for i in 0..4 {
        log.log_at("detection", json!({"n": i}), Some(0.5), 10.0 + i as f64).unwrap();
    }

    let out = dir.path().join("export.json");
    log.export(&out, "json".parse().unwrap()).unwrap();
    let exported: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(exported.len(), 4);
    assert_eq!(exported[0]["type"], "detection");
    assert_eq!(exported[3]["data"]["n"], 3);
}

#[test]
fn clear_truncates_file_and_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    log.log("detection", json!({}), Some(0.9)).unwrap();
    log.clear().unwrap();
    assert!(log.is_empty());
    assert_eq!(fs::read_to_string(log.path()).unwrap(), "");

    let reopened = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    assert!(reopened.is_empty());
    assert!(reopened.query(&EventQuery::new()).is_empty());
}

#[test]
fn stats_fall_back_to_data_confidence() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = EventLog::for_business_type(dir.path(), BusinessType::Supermarket).unwrap();
    log.log_at("detection", json!({"confidence": 0.6}), None, 500.0).unwrap();
    log.log_at("detection", json!({}), Some(0.8), 510.0).unwrap();
    log.log_at("stream_connected", json!({}), None, 520.0).unwrap();

    let stats = log.stats_at(None, 60.0, 530.0);
    assert_eq!(stats.total_events, 3);
    assert_eq!(stats.events_per_type.get("detection"), Some(&2));
    assert!((stats.average_confidence - 0.7).abs() < 1e-9);

    let only_connects = log.stats_at(Some("stream_connected"), 60.0, 530.0);
    assert_eq!(only_connects.total_events, 1);
    assert_eq!(only_connects.average_confidence, 0.0);
}
