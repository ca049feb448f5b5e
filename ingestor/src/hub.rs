use crate::metrics::{
    DEVICE_SUBSCRIPTIONS, WS_CONNECTIONS, WS_DELIVERIES_TOTAL, WS_DELIVERY_FAILURES_TOTAL,
};
use crate::model::TelemetryEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Capacity of one connection's delivery queue. A subscriber that falls
/// further behind than this is treated as failed and removed.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Handle for one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages sent to realtime clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Telemetry(TelemetryEvent),
    Subscription { message: String },
    Error { message: String },
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnId, mpsc::Sender<String>>,
    /// Device id to subscriber set. Entries are removed once empty.
    subscriptions: HashMap<String, HashSet<ConnId>>,
}

/// Snapshot of hub occupancy, for health reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub subscriptions: usize,
}

/// In-memory registry of live connections and per-device subscriber sets.
///
/// All state sits behind one lock; fan-out volume is bounded by dashboard
/// viewer counts, not device count.
pub struct Hub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a newly opened connection. No subscriptions yet.
    pub fn add_connection(&self, sender: mpsc::Sender<String>) -> ConnId {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.connections.insert(id, sender);
        WS_CONNECTIONS.set(state.connections.len() as f64);
        info!("Client {} connected ({} total)", id, state.connections.len());
        id
    }

    /// Drops the connection and every subscription it held. Devices left with
    /// no subscribers lose their map entry entirely.
    pub fn remove_connection(&self, id: ConnId) {
        let mut state = self.state.lock();
        if state.connections.remove(&id).is_none() {
            return;
        }
        state.subscriptions.retain(|_, subscribers| {
            subscribers.remove(&id);
            !subscribers.is_empty()
        });
        WS_CONNECTIONS.set(state.connections.len() as f64);
        DEVICE_SUBSCRIPTIONS.set(state.subscriptions.len() as f64);
        info!(
            "Client {} disconnected ({} remaining)",
            id,
            state.connections.len()
        );
    }

    /// Adds the connection to the device's subscriber set and acks it.
    /// Subscribing twice has the effect of subscribing once.
    pub fn subscribe(&self, id: ConnId, device_id: &str) {
        {
            let mut state = self.state.lock();
            if !state.connections.contains_key(&id) {
                warn!("Subscribe from unknown client {}", id);
                return;
            }
            state
                .subscriptions
                .entry(device_id.to_string())
                .or_default()
                .insert(id);
            DEVICE_SUBSCRIPTIONS.set(state.subscriptions.len() as f64);
        }

        debug!("Client {} subscribed to device {}", id, device_id);
        self.send_to(
            id,
            &ServerMessage::Subscription {
                message: format!("Subscribed to device: {}", device_id),
            },
        );
    }

    /// Dispatches one inbound client message. Subscribe requests are honored,
    /// unknown types are logged and ignored, unparseable input gets an error
    /// ack back to the sender only.
    pub fn handle_message(&self, id: ConnId, raw: &str) {
        let parsed: serde_json::Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                warn!("Client {} sent malformed message: {}", id, e);
                self.send_to(
                    id,
                    &ServerMessage::Error {
                        message: "Invalid message format".to_string(),
                    },
                );
                return;
            }
        };

        let kind = parsed.get("type").and_then(|t| t.as_str());
        let device_id = parsed.get("deviceId").and_then(|d| d.as_str());

        match (kind, device_id) {
            (Some("subscribe"), Some(device_id)) => self.subscribe(id, device_id),
            _ => warn!(
                "Ignoring message from client {} with unknown type {:?}",
                id, kind
            ),
        }
    }

    /// Fans the event out to the device's subscribers. Zero subscribers is a
    /// no-op. The event is serialized once; a dead or backlogged connection is
    /// removed and never blocks delivery to the rest. Returns the delivery
    /// count.
    pub fn broadcast(&self, event: &TelemetryEvent) -> usize {
        let subscribers: Vec<(ConnId, mpsc::Sender<String>)> = {
            let state = self.state.lock();
            match state.subscriptions.get(&event.device_id) {
                Some(subscribers) => subscribers
                    .iter()
                    .filter_map(|id| state.connections.get(id).map(|tx| (*id, tx.clone())))
                    .collect(),
                None => return 0,
            }
        };

        let message = match serde_json::to_string(&ServerMessage::Telemetry(event.clone())) {
            Ok(m) => m,
            Err(e) => {
                warn!("Failed to serialize telemetry event: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sender) in subscribers {
            match sender.try_send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    WS_DELIVERIES_TOTAL.inc();
                }
                Err(TrySendError::Full(_)) => {
                    debug!("Client {} delivery queue full", id);
                    dead.push(id);
                    WS_DELIVERY_FAILURES_TOTAL.inc();
                }
                Err(TrySendError::Closed(_)) => {
                    dead.push(id);
                    WS_DELIVERY_FAILURES_TOTAL.inc();
                }
            }
        }

        for id in dead {
            debug!("Dropping unresponsive client {} during fan-out", id);
            self.remove_connection(id);
        }

        delivered
    }

    pub fn stats(&self) -> HubStats {
        let state = self.state.lock();
        HubStats {
            connections: state.connections.len(),
            subscriptions: state.subscriptions.len(),
        }
    }

    fn send_to(&self, id: ConnId, message: &ServerMessage) {
        let sender = self.state.lock().connections.get(&id).cloned();
        if let Some(sender) = sender {
            if let Ok(text) = serde_json::to_string(message) {
                let _ = sender.try_send(text);
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
