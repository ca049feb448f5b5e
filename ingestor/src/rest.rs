use crate::hub::Hub;
use crate::model::{TelemetryRow, TypedValue, ValueSlots};
use crate::value;
use crate::ws;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub hub: Arc<Hub>,
    pub started: Instant,
}

#[derive(Debug, Deserialize)]
pub struct TelemetryQuery {
    device_id: Option<String>,
    datastream_id: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// One decoded history point.
#[derive(Debug, Serialize)]
pub struct TelemetryPoint {
    pub id: String,
    pub device_id: String,
    pub datastream_id: String,
    pub value: TypedValue,
    pub ts: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<TelemetryPoint>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct DeviceStateEntry {
    pub datastream_id: String,
    pub pin: String,
    pub name: String,
    pub data_type: String,
    pub value: TypedValue,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DeviceStateResponse {
    pub device_id: String,
    pub data: Vec<DeviceStateEntry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub subscriptions: usize,
    pub uptime_seconds: u64,
}

pub fn create_router(pool: PgPool, hub: Arc<Hub>) -> Router {
    let state = AppState {
        pool,
        hub,
        started: Instant::now(),
    };

    Router::new()
        .route("/api/v1/telemetry", get(get_telemetry))
        .route("/api/v1/devices/:device_id/state", get(get_device_state))
        .route("/health", get(get_health))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

async fn get_telemetry(
    State(state): State<AppState>,
    Query(params): Query<TelemetryQuery>,
) -> Result<Json<TelemetryResponse>, AppError> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);

    let mut conditions = Vec::new();
    let mut args = 0;

    if params.device_id.is_some() {
        args += 1;
        conditions.push(format!("device_id = ${}", args));
    }
    if params.datastream_id.is_some() {
        args += 1;
        conditions.push(format!("datastream_id = ${}", args));
    }
    if params.start.is_some() {
        args += 1;
        conditions.push(format!("ts >= ${}", args));
    }
    if params.end.is_some() {
        args += 1;
        conditions.push(format!("ts <= ${}", args));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let query = format!(
        "SELECT id, device_id, datastream_id, long_value, double_value, bool_value, string_value, ts, reported_at
         FROM telemetry
         {}
         ORDER BY ts DESC
         LIMIT {} OFFSET {}",
        where_clause, limit, offset
    );

    let mut query_builder = sqlx::query_as::<_, TelemetryRow>(&query);

    if let Some(device_id) = &params.device_id {
        query_builder = query_builder.bind(device_id);
    }
    if let Some(datastream_id) = &params.datastream_id {
        query_builder = query_builder.bind(datastream_id);
    }
    if let Some(start) = &params.start {
        query_builder = query_builder.bind(start);
    }
    if let Some(end) = &params.end {
        query_builder = query_builder.bind(end);
    }

    let rows = query_builder.fetch_all(&state.pool).await?;

    let data: Vec<TelemetryPoint> = rows
        .into_iter()
        .filter_map(|row| match value::decode(&row.value) {
            Some(value) => Some(TelemetryPoint {
                id: row.id,
                device_id: row.device_id,
                datastream_id: row.datastream_id,
                value,
                ts: row.ts,
                reported_at: row.reported_at,
            }),
            None => {
                warn!("Telemetry row {} has no populated value slot", row.id);
                None
            }
        })
        .collect();

    Ok(Json(TelemetryResponse {
        total: data.len(),
        data,
        limit,
        offset,
    }))
}

#[derive(Debug, sqlx::FromRow)]
struct StateRow {
    datastream_id: String,
    pin: String,
    name: String,
    data_type: String,
    #[sqlx(flatten)]
    value: ValueSlots,
    updated_at: DateTime<Utc>,
}

async fn get_device_state(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Response, AppError> {
    let exists = sqlx::query_scalar::<_, String>("SELECT id FROM device WHERE id = $1")
        .bind(&device_id)
        .fetch_optional(&state.pool)
        .await?;

    if exists.is_none() {
        return Ok((StatusCode::NOT_FOUND, "Device not found").into_response());
    }

    let rows = sqlx::query_as::<_, StateRow>(
        "SELECT s.datastream_id, d.pin, d.name, d.data_type,
                s.long_value, s.double_value, s.bool_value, s.string_value, s.updated_at
         FROM device_state s
         JOIN datastream d ON d.id = s.datastream_id
         WHERE s.device_id = $1
         ORDER BY d.pin",
    )
    .bind(&device_id)
    .fetch_all(&state.pool)
    .await?;

    let data: Vec<DeviceStateEntry> = rows
        .into_iter()
        .filter_map(|row| match value::decode(&row.value) {
            Some(value) => Some(DeviceStateEntry {
                datastream_id: row.datastream_id,
                pin: row.pin,
                name: row.name,
                data_type: row.data_type,
                value,
                updated_at: row.updated_at,
            }),
            None => {
                warn!(
                    "State row for datastream {} has no populated value slot",
                    row.datastream_id
                );
                None
            }
        })
        .collect();

    Ok(Json(DeviceStateResponse { device_id, data }).into_response())
}

async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats();

    Json(HealthResponse {
        status: "ok",
        connections: stats.connections,
        subscriptions: stats.subscriptions,
        uptime_seconds: state.started.elapsed().as_secs(),
    })
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API error: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {}", self.0),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
