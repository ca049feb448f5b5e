use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingestor::db::{Store, TelemetryWrite};
use ingestor::errors::{Error, Result};
use ingestor::model::{Datastream, Device};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory Store with all-or-nothing commits and a one-shot fault switch.
#[derive(Default)]
pub struct MemStore {
    devices: Mutex<HashMap<String, Device>>,
    datastreams: Mutex<HashMap<(String, String), Datastream>>,
    telemetry: Mutex<Vec<TelemetryWrite>>,
    state: Mutex<HashMap<(String, String), TelemetryWrite>>,
    fail_next_commit: AtomicBool,
}

#[allow(dead_code)]
impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Device) {
        self.devices.lock().insert(device.id.clone(), device);
    }

    pub fn add_datastream(&self, datastream: Datastream) {
        self.datastreams.lock().insert(
            (datastream.template_id.clone(), datastream.pin.clone()),
            datastream,
        );
    }

    /// Makes the next commit fail before any write lands.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn telemetry_rows(&self) -> Vec<TelemetryWrite> {
        self.telemetry.lock().clone()
    }

    pub fn state_row(&self, device_id: &str, datastream_id: &str) -> Option<TelemetryWrite> {
        self.state
            .lock()
            .get(&(device_id.to_string(), datastream_id.to_string()))
            .cloned()
    }

    pub fn state_len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn device_row(&self, device_id: &str) -> Option<Device> {
        self.devices.lock().get(device_id).cloned()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn device(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.lock().get(device_id).cloned())
    }

    async fn datastream(&self, template_id: &str, pin: &str) -> Result<Option<Datastream>> {
        Ok(self
            .datastreams
            .lock()
            .get(&(template_id.to_string(), pin.to_string()))
            .cloned())
    }

    async fn commit_telemetry(&self, write: &TelemetryWrite) -> Result<()> {
        // Models the transaction: either every write lands or none do.
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage(sqlx::Error::PoolTimedOut));
        }

        self.telemetry.lock().push(write.clone());
        self.state.lock().insert(
            (write.device_id.clone(), write.datastream_id.clone()),
            write.clone(),
        );
        if let Some(device) = self.devices.lock().get_mut(&write.device_id) {
            device.status = Some("ONLINE".to_string());
            device.last_seen = Some(write.reported_at);
        }

        Ok(())
    }

    async fn set_device_status(
        &self,
        device_id: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.devices.lock().get_mut(device_id) {
            Some(device) => {
                device.status = Some(status.to_string());
                device.last_seen = Some(seen_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[allow(dead_code)]
pub fn device(id: &str, template_id: &str) -> Device {
    Device {
        id: id.to_string(),
        organization_id: "org-1".to_string(),
        template_id: template_id.to_string(),
        auth_token: Some("token".to_string()),
        status: None,
        last_seen: None,
    }
}

#[allow(dead_code)]
pub fn revoked_device(id: &str, template_id: &str) -> Device {
    Device {
        auth_token: None,
        ..device(id, template_id)
    }
}

#[allow(dead_code)]
pub fn datastream(id: &str, template_id: &str, pin: &str, data_type: &str) -> Datastream {
    Datastream {
        id: id.to_string(),
        template_id: template_id.to_string(),
        name: format!("Stream {}", pin),
        pin: pin.to_string(),
        data_type: data_type.to_string(),
        min_value: None,
        max_value: None,
        default_value: None,
    }
}

/// Device "dev-1" on template "tpl-1" with pins V0..V3 across the four types.
#[allow(dead_code)]
pub fn seeded_store() -> MemStore {
    let store = MemStore::new();
    store.add_device(device("dev-1", "tpl-1"));
    store.add_datastream(datastream("ds-v0", "tpl-1", "V0", "DOUBLE"));
    store.add_datastream(datastream("ds-v1", "tpl-1", "V1", "INT"));
    store.add_datastream(datastream("ds-v2", "tpl-1", "V2", "BOOL"));
    store.add_datastream(datastream("ds-v3", "tpl-1", "V3", "STRING"));
    store
}
