use crate::db::{Store, TelemetryWrite};
use crate::errors::{Error, Result};
use crate::metrics::{INGESTED_TOTAL, INGEST_LATENCY_SECONDS, STORAGE_FAILURES_TOTAL};
use crate::model::{
    IngestionResult, TelemetryEvent, TelemetryPayload, TypedValue, ValueSlots,
};
use crate::validate::{validate_datastream, validate_device};
use crate::value;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::warn;
use uuid::Uuid;

/// A successfully committed telemetry point.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub device_id: String,
    pub datastream_id: String,
    pub pin: String,
    pub value: TypedValue,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Ingested {
    pub fn event(&self) -> TelemetryEvent {
        TelemetryEvent {
            device_id: self.device_id.clone(),
            datastream_id: self.datastream_id.clone(),
            timestamp: self.timestamp,
            value: self.value.clone(),
        }
    }

    pub fn report(&self) -> IngestionResult {
        IngestionResult {
            success: true,
            device_id: self.device_id.clone(),
            pin: self.pin.clone(),
            timestamp: self.timestamp,
            duration: self.duration_ms,
        }
    }
}

/// Validates, encodes and commits one telemetry payload.
///
/// The commit is one transaction: telemetry append, device-state upsert and
/// device liveness update all land or none do. There is no retry here; a
/// storage failure surfaces to the transport, which owns redelivery policy.
pub async fn ingest(
    store: &dyn Store,
    device_id: &str,
    payload: &TelemetryPayload,
) -> Result<Ingested> {
    let started = Instant::now();

    let device = validate_device(store, device_id).await?;
    let datastream = validate_datastream(store, &device.template_id, &payload.pin).await?;

    let value = value::encode(&payload.value, &datastream.data_type)?;

    let reported_at = Utc::now();
    let ts = match payload.timestamp {
        Some(epoch) => from_epoch_seconds(epoch)?,
        None => reported_at,
    };

    let write = TelemetryWrite {
        id: Uuid::new_v4().to_string(),
        device_id: device.id.clone(),
        datastream_id: datastream.id.clone(),
        slots: ValueSlots::from(&value),
        ts,
        reported_at,
    };

    if let Err(e) = store.commit_telemetry(&write).await {
        STORAGE_FAILURES_TOTAL.inc();
        return Err(e);
    }

    let elapsed = started.elapsed();
    INGESTED_TOTAL.inc();
    INGEST_LATENCY_SECONDS.observe(elapsed.as_secs_f64());

    Ok(Ingested {
        device_id: device.id,
        datastream_id: datastream.id,
        pin: datastream.pin,
        value,
        timestamp: ts,
        duration_ms: elapsed.as_millis() as u64,
    })
}

/// Runs `ingest` per payload, in order. A failed item is logged and skipped;
/// the rest of the batch still runs.
pub async fn ingest_batch(
    store: &dyn Store,
    device_id: &str,
    payloads: &[TelemetryPayload],
) -> Vec<Result<Ingested>> {
    let mut results = Vec::with_capacity(payloads.len());

    for payload in payloads {
        let result = ingest(store, device_id, payload).await;
        if let Err(e) = &result {
            warn!(
                "Batch item for device {} pin {} failed: {}",
                device_id, payload.pin, e
            );
        }
        results.push(result);
    }

    results
}

fn from_epoch_seconds(epoch: f64) -> Result<DateTime<Utc>> {
    if !epoch.is_finite() {
        return Err(Error::Validation(format!(
            "Timestamp {} is not a valid epoch",
            epoch
        )));
    }

    DateTime::from_timestamp_millis((epoch * 1000.0).round() as i64)
        .ok_or_else(|| Error::Validation(format!("Timestamp {} out of range", epoch)))
}
