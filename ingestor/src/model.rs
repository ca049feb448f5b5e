use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device record as provisioned by the management surface.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: String,
    pub organization_id: String,
    pub template_id: String,
    /// None once the credential has been revoked.
    pub auth_token: Option<String>,
    pub status: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Datastream declaration, owned by a template. (template_id, pin) is unique.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Datastream {
    pub id: String,
    pub template_id: String,
    pub name: String,
    pub pin: String,
    pub data_type: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub default_value: Option<String>,
}

/// Device liveness as tracked on the device row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Online => "ONLINE",
            DeviceStatus::Offline => "OFFLINE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ONLINE" => Some(DeviceStatus::Online),
            "OFFLINE" => Some(DeviceStatus::Offline),
            _ => None,
        }
    }
}

/// A value as reported by a device, before any type coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// A value after coercion to its datastream's declared type.
///
/// Serializes as the bare JSON value, without a type wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
}

/// Storage-boundary shape of one typed value: four nullable columns, exactly
/// one populated.
#[derive(Debug, Clone, Default, PartialEq, sqlx::FromRow)]
pub struct ValueSlots {
    pub long_value: Option<i64>,
    pub double_value: Option<f64>,
    pub bool_value: Option<bool>,
    pub string_value: Option<String>,
}

impl From<&TypedValue> for ValueSlots {
    fn from(value: &TypedValue) -> Self {
        let mut slots = ValueSlots::default();
        match value {
            TypedValue::Bool(b) => slots.bool_value = Some(*b),
            TypedValue::Long(n) => slots.long_value = Some(*n),
            TypedValue::Double(f) => slots.double_value = Some(*f),
            TypedValue::Text(s) => slots.string_value = Some(s.clone()),
        }
        slots
    }
}

/// Immutable telemetry history row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TelemetryRow {
    pub id: String,
    pub device_id: String,
    pub datastream_id: String,
    #[sqlx(flatten)]
    pub value: ValueSlots,
    pub ts: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

/// Inbound telemetry payload for a single pin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub pin: String,
    pub value: RawValue,
    /// Device-claimed event time in epoch seconds; fractional allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Unit broadcast to realtime subscribers after a successful ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub device_id: String,
    pub datastream_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: TypedValue,
}

/// Outcome report handed back to the transport adapter.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub success: bool,
    pub device_id: String,
    pub pin: String,
    pub timestamp: DateTime<Utc>,
    /// Elapsed processing time in milliseconds.
    pub duration: u64,
}
