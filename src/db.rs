use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::{
    store::{ReadingStore, StorageError, Watermark},
    telemetry::{PersistedRow, Reading},
};

pub async fn new_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(16)
        .connect(database_url)
        .await
        .context("failed to open database pool")
}

/// Creates the readings relation if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id               BIGSERIAL PRIMARY KEY,
            device_id        TEXT             NOT NULL,
            source_address   TEXT             NOT NULL,
            illumination     DOUBLE PRECISION NOT NULL,
            ammonia          DOUBLE PRECISION NOT NULL,
            hydrogen_sulfide DOUBLE PRECISION NOT NULL,
            humidity         DOUBLE PRECISION NOT NULL,
            temperature      DOUBLE PRECISION NOT NULL,
            observed_at      TIMESTAMPTZ      NOT NULL
        )
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("failed to create sensor_readings")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_observed_at
            ON sensor_readings (observed_at)
        "#,
    )
    .execute(&mut *tx)
    .await
    .context("failed to create sensor_readings index")?;

    tx.commit().await.context("failed to commit transaction")?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct ReadingRecord {
    id: i64,
    device_id: String,
    source_address: String,
    illumination: f64,
    ammonia: f64,
    hydrogen_sulfide: f64,
    humidity: f64,
    temperature: f64,
    observed_at: DateTime<Utc>,
}

impl ReadingRecord {
    fn into_row(self, timezone: Tz) -> PersistedRow {
        PersistedRow {
            id: self.id,
            reading: Reading {
                device_id: self.device_id,
                source_address: self.source_address,
                illumination: self.illumination,
                ammonia: self.ammonia,
                hydrogen_sulfide: self.hydrogen_sulfide,
                humidity: self.humidity,
                temperature: self.temperature,
                observed_at: self.observed_at.with_timezone(&timezone),
            },
        }
    }
}

/// [`ReadingStore`] backed by the `sensor_readings` relation.
///
/// Timestamps are stored as `TIMESTAMPTZ` and handed back in `timezone`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    timezone: Tz,
}

impl PgStore {
    pub fn new(pool: PgPool, timezone: Tz) -> Self {
        Self { pool, timezone }
    }
}

#[async_trait]
impl ReadingStore for PgStore {
    async fn insert(&self, reading: &Reading) -> Result<PersistedRow, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sensor_readings (device_id, source_address, illumination, ammonia, hydrogen_sulfide, humidity, temperature, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&reading.device_id)
        .bind(&reading.source_address)
        .bind(reading.illumination)
        .bind(reading.ammonia)
        .bind(reading.hydrogen_sulfide)
        .bind(reading.humidity)
        .bind(reading.temperature)
        .bind(reading.observed_at.with_timezone(&Utc))
        .fetch_one(&self.pool)
        .await?;

        Ok(PersistedRow {
            id,
            reading: reading.clone(),
        })
    }

    async fn fetch_after(
        &self,
        after: Watermark,
        limit: i64,
    ) -> Result<Vec<PersistedRow>, StorageError> {
        let records: Vec<ReadingRecord> = sqlx::query_as(
            r#"
            SELECT id, device_id, source_address, illumination, ammonia, hydrogen_sulfide, humidity, temperature, observed_at
            FROM sensor_readings
            WHERE id > $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(after.id())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records
            .into_iter()
            .map(|r| r.into_row(self.timezone))
            .collect())
    }
}
