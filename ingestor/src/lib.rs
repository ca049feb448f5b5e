//! Telemetry ingestion and realtime fan-out for provisioned IoT devices.

pub mod db;
pub mod errors;
pub mod hub;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod validate;
pub mod value;
pub mod ws;
