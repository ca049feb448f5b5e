use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

const STRING_STATES: &[&str] = &["idle", "active", "fault"];

/// Wire shape consumed by the ingestor's telemetry topic.
#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub pin: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Cycles the four pin types: V0 DOUBLE, V1 INT, V2 BOOL, V3 STRING.
pub fn sample(rng: &mut impl Rng, seq: u64) -> Payload {
    match seq % 4 {
        0 => Payload {
            pin: "V0".to_string(),
            value: json!(rng.gen_range(15.0..35.0)),
            timestamp: None,
        },
        1 => Payload {
            pin: "V1".to_string(),
            value: json!(rng.gen_range(0..1024)),
            timestamp: None,
        },
        2 => Payload {
            pin: "V2".to_string(),
            value: json!(rng.gen_bool(0.5)),
            // Device-claimed event time exercises the epoch-seconds path.
            timestamp: Some(now_epoch()),
        },
        _ => Payload {
            pin: "V3".to_string(),
            value: json!(STRING_STATES[rng.gen_range(0..STRING_STATES.len())]),
            timestamp: None,
        },
    }
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
