use crate::tracker::UsageSample;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// The loop is the only writer, so a single connection is all the pool needs.
pub async fn build_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url:?}"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .context("connecting to readings database")?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS state_readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meter_box TEXT NOT NULL,
            utc_timestamp INTEGER NOT NULL,
            energy_usage REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("creating state_readings table")?;
    Ok(())
}

/// Append-only sink for usage samples. No batching, no dedup, no updates.
#[derive(Clone)]
pub struct ReadingSink {
    pool: SqlitePool,
}

impl ReadingSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn persist(&self, sample: &UsageSample) -> Result<()> {
        sqlx::query(
            "INSERT INTO state_readings (meter_box, utc_timestamp, energy_usage) VALUES (?1, ?2, ?3)",
        )
        .bind(&sample.channel)
        .bind(sample.timestamp_ms)
        .bind(sample.watts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
