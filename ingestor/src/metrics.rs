use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_ingested_total",
        "Total telemetry points committed"
    ))
    .unwrap();
    pub static ref DROPPED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_dropped_messages_total",
        "Total payloads dropped after validation or storage failure"
    ))
    .unwrap();
    pub static ref REVOKED_DEVICE_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_revoked_device_messages_total",
        "Total payloads dropped because the device credential was revoked"
    ))
    .unwrap();
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_storage_failures_total",
        "Total ingestion transactions that failed to commit"
    ))
    .unwrap();
    pub static ref UNKNOWN_DATA_TYPE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_unknown_data_type_total",
        "Total values stored as strings due to an unknown data type"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to validate and commit one telemetry point"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref WS_CONNECTIONS: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_ws_connections",
        "Current live websocket connections"
    ))
    .unwrap();
    pub static ref DEVICE_SUBSCRIPTIONS: Gauge = Gauge::with_opts(Opts::new(
        "ingestor_device_subscriptions",
        "Devices with at least one live subscriber"
    ))
    .unwrap();
    pub static ref WS_DELIVERIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_ws_deliveries_total",
        "Total telemetry events delivered to subscribers"
    ))
    .unwrap();
    pub static ref WS_DELIVERY_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_ws_delivery_failures_total",
        "Total deliveries dropped due to dead or backlogged connections"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(INGESTED_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(DROPPED_MESSAGES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(REVOKED_DEVICE_MESSAGES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(STORAGE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UNKNOWN_DATA_TYPE_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(WS_CONNECTIONS.clone())).unwrap();
    REGISTRY
        .register(Box::new(DEVICE_SUBSCRIPTIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(WS_DELIVERIES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(WS_DELIVERY_FAILURES_TOTAL.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
