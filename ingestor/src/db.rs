use crate::errors::Result;
use crate::model::{Datastream, Device, ValueSlots};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// One ingestion's worth of writes, committed atomically.
#[derive(Debug, Clone)]
pub struct TelemetryWrite {
    pub id: String,
    pub device_id: String,
    pub datastream_id: String,
    pub slots: ValueSlots,
    pub ts: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

/// Storage operations the ingestion pipeline depends on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn device(&self, device_id: &str) -> Result<Option<Device>>;

    async fn datastream(&self, template_id: &str, pin: &str) -> Result<Option<Datastream>>;

    /// Appends the telemetry row, overwrites the device-state row and marks
    /// the device ONLINE, all in one transaction.
    async fn commit_telemetry(&self, write: &TelemetryWrite) -> Result<()>;

    /// Returns false when no device row matched.
    async fn set_device_status(
        &self,
        device_id: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn device(&self, device_id: &str) -> Result<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            "SELECT id, organization_id, template_id, auth_token, status, last_seen
             FROM device WHERE id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(device)
    }

    async fn datastream(&self, template_id: &str, pin: &str) -> Result<Option<Datastream>> {
        let datastream = sqlx::query_as::<_, Datastream>(
            "SELECT id, template_id, name, pin, data_type, min_value, max_value, default_value
             FROM datastream WHERE template_id = $1 AND pin = $2",
        )
        .bind(template_id)
        .bind(pin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(datastream)
    }

    async fn commit_telemetry(&self, write: &TelemetryWrite) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO telemetry
                (id, device_id, datastream_id, long_value, double_value, bool_value, string_value, ts, reported_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&write.id)
        .bind(&write.device_id)
        .bind(&write.datastream_id)
        .bind(write.slots.long_value)
        .bind(write.slots.double_value)
        .bind(write.slots.bool_value)
        .bind(write.slots.string_value.as_deref())
        .bind(write.ts)
        .bind(write.reported_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO device_state
                (device_id, datastream_id, long_value, double_value, bool_value, string_value, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (device_id, datastream_id) DO UPDATE SET
                long_value = EXCLUDED.long_value,
                double_value = EXCLUDED.double_value,
                bool_value = EXCLUDED.bool_value,
                string_value = EXCLUDED.string_value,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&write.device_id)
        .bind(&write.datastream_id)
        .bind(write.slots.long_value)
        .bind(write.slots.double_value)
        .bind(write.slots.bool_value)
        .bind(write.slots.string_value.as_deref())
        .bind(write.reported_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE device SET status = $2, last_seen = $3 WHERE id = $1")
            .bind(&write.device_id)
            .bind(crate::model::DeviceStatus::Online.as_str())
            .bind(write.reported_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_device_status(
        &self,
        device_id: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE device SET status = $2, last_seen = $3 WHERE id = $1")
            .bind(device_id)
            .bind(status)
            .bind(seen_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
