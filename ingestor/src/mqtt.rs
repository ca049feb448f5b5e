use crate::db::Store;
use crate::errors::{Error, Result};
use crate::hub::Hub;
use crate::ingest::{ingest, ingest_batch};
use crate::metrics::{DROPPED_MESSAGES_TOTAL, MESSAGES_TOTAL, REVOKED_DEVICE_MESSAGES_TOTAL};
use crate::model::{DeviceStatus, TelemetryPayload};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const TELEMETRY_TOPIC: &str = "devices/+/telemetry";
const STATUS_TOPIC: &str = "devices/+/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicKind {
    Telemetry,
    Status,
}

/// Body of a telemetry publish: one payload or an array of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TelemetryBody {
    Single(TelemetryPayload),
    Batch(Vec<TelemetryPayload>),
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

pub async fn run_mqtt(
    broker: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);
    if let Some((username, password)) = credentials {
        mqtt_options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await?;
    client.subscribe(STATUS_TOPIC, QoS::AtLeastOnce).await?;
    info!(
        "Subscribed to {} and {} with QoS 1",
        TELEMETRY_TOPIC, STATUS_TOPIC
    );

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    // One attempt per message; failures are dropped and the
                    // broker's QoS 1 redelivery is the only retry path.
                    if let Err(e) =
                        dispatch(&publish.topic, &publish.payload, store.as_ref(), &hub).await
                    {
                        record_drop(&publish.topic, &e);
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Counts one dropped message. A revoked credential logs at error level and
/// lands in a dedicated counter; every other failure logs at warn.
fn record_drop(topic: &str, error: &Error) {
    if matches!(error, Error::Unauthorized(_)) {
        error!("Dropping message on {}: {}", topic, error);
        REVOKED_DEVICE_MESSAGES_TOTAL.inc();
    } else {
        warn!("Dropping message on {}: {}", topic, error);
    }
    DROPPED_MESSAGES_TOTAL.inc();
}

async fn dispatch(topic: &str, payload: &[u8], store: &dyn Store, hub: &Hub) -> Result<()> {
    let (device_id, kind) = parse_topic(topic)
        .ok_or_else(|| Error::Validation(format!("Unroutable topic '{}'", topic)))?;

    match kind {
        TopicKind::Telemetry => handle_telemetry(device_id, payload, store, hub).await,
        TopicKind::Status => handle_status(device_id, payload, store).await,
    }
}

async fn handle_telemetry(
    device_id: &str,
    payload: &[u8],
    store: &dyn Store,
    hub: &Hub,
) -> Result<()> {
    let body = serde_json::from_slice::<TelemetryBody>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    match body {
        TelemetryBody::Single(item) => {
            let ingested = ingest(store, device_id, &item).await?;
            if let Ok(report) = serde_json::to_string(&ingested.report()) {
                debug!("Ingestion result: {}", report);
            }
            // Delivery is best-effort; a hub miss never fails the message.
            hub.broadcast(&ingested.event());
            Ok(())
        }
        TelemetryBody::Batch(items) => {
            let results = ingest_batch(store, device_id, &items).await;

            let mut delivered = 0;
            for ingested in results.iter().flatten() {
                hub.broadcast(&ingested.event());
                delivered += 1;
            }

            let failed = results.len() - delivered;
            if failed > 0 {
                let revoked = results
                    .iter()
                    .filter(|result| matches!(result, Err(Error::Unauthorized(_))))
                    .count();
                if revoked > 0 {
                    REVOKED_DEVICE_MESSAGES_TOTAL.inc_by(revoked as f64);
                    error!(
                        "Batch from device {}: {} items rejected on a revoked credential",
                        device_id, revoked
                    );
                }
                DROPPED_MESSAGES_TOTAL.inc_by(failed as f64);
                warn!(
                    "Batch from device {}: {} ingested, {} dropped",
                    device_id, delivered, failed
                );
            }

            Ok(())
        }
    }
}

async fn handle_status(device_id: &str, payload: &[u8], store: &dyn Store) -> Result<()> {
    let body = serde_json::from_slice::<StatusBody>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    let status = DeviceStatus::parse(&body.status)
        .ok_or_else(|| Error::Validation(format!("Unknown status '{}'", body.status)))?;

    if store
        .set_device_status(device_id, status.as_str(), Utc::now())
        .await?
    {
        debug!("Device {} reported {}", device_id, status.as_str());
    } else {
        warn!("Status report for unknown device {}", device_id);
    }

    Ok(())
}

/// Splits `devices/{device_id}/{kind}` into its parts.
fn parse_topic(topic: &str) -> Option<(&str, TopicKind)> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("devices"), Some(device_id), Some("telemetry"), None) if !device_id.is_empty() => {
            Some((device_id, TopicKind::Telemetry))
        }
        (Some("devices"), Some(device_id), Some("status"), None) if !device_id.is_empty() => {
            Some((device_id, TopicKind::Status))
        }
        _ => None,
    }
}
