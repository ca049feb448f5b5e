mod common;

use chrono::Utc;
use common::{datastream, revoked_device, seeded_store, MemStore};
use ingestor::errors::Error;
use ingestor::ingest::{ingest, ingest_batch};
use ingestor::model::{RawValue, TelemetryPayload, TypedValue};

fn payload(pin: &str, value: RawValue) -> TelemetryPayload {
    TelemetryPayload {
        pin: pin.to_string(),
        value,
        timestamp: None,
    }
}

#[tokio::test]
async fn test_double_pin_commits_history_and_state() {
    let store = seeded_store();

    let ingested = ingest(&store, "dev-1", &payload("V0", RawValue::Float(23.5)))
        .await
        .unwrap();

    assert_eq!(ingested.value, TypedValue::Double(23.5));
    assert_eq!(ingested.pin, "V0");
    assert_eq!(ingested.datastream_id, "ds-v0");

    let rows = store.telemetry_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].slots.double_value, Some(23.5));
    assert!((Utc::now() - rows[0].ts).num_seconds().abs() < 5);

    let state = store.state_row("dev-1", "ds-v0").unwrap();
    assert_eq!(state.slots.double_value, Some(23.5));
}

#[tokio::test]
async fn test_int_pin_truncates_fraction() {
    let store = seeded_store();

    let ingested = ingest(&store, "dev-1", &payload("V1", RawValue::Float(7.9)))
        .await
        .unwrap();

    assert_eq!(ingested.value, TypedValue::Long(7));
    assert_eq!(store.telemetry_rows()[0].slots.long_value, Some(7));
}

#[tokio::test]
async fn test_unknown_device_fails_without_writes() {
    let store = seeded_store();

    let err = ingest(&store, "ghost", &payload("V0", RawValue::Float(1.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert!(store.telemetry_rows().is_empty());
    assert_eq!(store.state_len(), 0);
}

#[tokio::test]
async fn test_unknown_pin_fails_without_writes() {
    let store = seeded_store();

    let err = ingest(&store, "dev-1", &payload("V9", RawValue::Float(1.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert!(store.telemetry_rows().is_empty());
    assert_eq!(store.state_len(), 0);
}

#[tokio::test]
async fn test_revoked_device_is_unauthorized() {
    let store = MemStore::new();
    store.add_device(revoked_device("dev-1", "tpl-1"));
    store.add_datastream(datastream("ds-v0", "tpl-1", "V0", "DOUBLE"));

    let err = ingest(&store, "dev-1", &payload("V0", RawValue::Float(1.0)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Unauthorized(_)));
    assert!(store.telemetry_rows().is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_no_side_effects() {
    let store = seeded_store();
    store.fail_next_commit();

    let err = ingest(&store, "dev-1", &payload("V0", RawValue::Float(23.5)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(store.telemetry_rows().is_empty());
    assert_eq!(store.state_len(), 0);

    // Liveness must not move when the transaction did not commit.
    let device = store.device_row("dev-1").unwrap();
    assert_eq!(device.status, None);
    assert_eq!(device.last_seen, None);

    // The fault is one-shot; the next attempt goes through.
    ingest(&store, "dev-1", &payload("V0", RawValue::Float(23.5)))
        .await
        .unwrap();
    assert_eq!(store.telemetry_rows().len(), 1);
}

#[tokio::test]
async fn test_repeat_ingest_appends_history_once_per_call() {
    let store = seeded_store();

    ingest(&store, "dev-1", &payload("V0", RawValue::Float(23.5)))
        .await
        .unwrap();
    ingest(&store, "dev-1", &payload("V0", RawValue::Float(24.0)))
        .await
        .unwrap();

    // Two history rows, one state row holding the later value.
    assert_eq!(store.telemetry_rows().len(), 2);
    assert_eq!(store.state_len(), 1);
    assert_eq!(
        store.state_row("dev-1", "ds-v0").unwrap().slots.double_value,
        Some(24.0)
    );
}

#[tokio::test]
async fn test_device_claimed_timestamp_is_used() {
    let store = seeded_store();

    let ingested = ingest(
        &store,
        "dev-1",
        &TelemetryPayload {
            pin: "V0".to_string(),
            value: RawValue::Float(20.0),
            timestamp: Some(1700000000.5),
        },
    )
    .await
    .unwrap();

    assert_eq!(ingested.timestamp.timestamp(), 1700000000);

    let rows = store.telemetry_rows();
    assert_eq!(rows[0].ts, ingested.timestamp);
    // reported_at stays server-observed regardless of the claimed time.
    assert!((Utc::now() - rows[0].reported_at).num_seconds().abs() < 5);
}

#[tokio::test]
async fn test_out_of_range_timestamp_rejected() {
    let store = seeded_store();

    let err = ingest(
        &store,
        "dev-1",
        &TelemetryPayload {
            pin: "V0".to_string(),
            value: RawValue::Float(20.0),
            timestamp: Some(1e18),
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert!(store.telemetry_rows().is_empty());
}

#[tokio::test]
async fn test_successful_ingest_marks_device_online() {
    let store = seeded_store();

    ingest(&store, "dev-1", &payload("V2", RawValue::Bool(true)))
        .await
        .unwrap();

    let device = store.device_row("dev-1").unwrap();
    assert_eq!(device.status.as_deref(), Some("ONLINE"));
    assert!(device.last_seen.is_some());
}

#[tokio::test]
async fn test_unknown_data_type_lands_in_string_slot() {
    let store = seeded_store();
    store.add_datastream(datastream("ds-v8", "tpl-1", "V8", "GEO"));

    let ingested = ingest(&store, "dev-1", &payload("V8", RawValue::Float(1.5)))
        .await
        .unwrap();

    assert_eq!(ingested.value, TypedValue::Text("1.5".to_string()));

    let slots = &store.telemetry_rows()[0].slots;
    assert_eq!(slots.string_value.as_deref(), Some("1.5"));
    assert!(slots.long_value.is_none());
    assert!(slots.double_value.is_none());
    assert!(slots.bool_value.is_none());
}

#[tokio::test]
async fn test_batch_continues_past_failed_items() {
    let store = seeded_store();

    let payloads = vec![
        payload("V0", RawValue::Float(21.0)),
        payload("V9", RawValue::Float(1.0)),
        payload("V1", RawValue::Int(12)),
    ];

    let results = ingest_batch(&store, "dev-1", &payloads).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(Error::NotFound(_))));
    assert!(results[2].is_ok());

    // The failed middle item skipped, the rest committed in order.
    let rows = store.telemetry_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].datastream_id, "ds-v0");
    assert_eq!(rows[1].datastream_id, "ds-v1");
}

#[tokio::test]
async fn test_string_pin_stringifies_numeric_input() {
    let store = seeded_store();

    let ingested = ingest(&store, "dev-1", &payload("V3", RawValue::Int(42)))
        .await
        .unwrap();

    assert_eq!(ingested.value, TypedValue::Text("42".to_string()));
}
