use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info, warn};

use super::StatisticsStore;
use crate::{
    config::DbConfig,
    domain::{LastStatistic, StatisticMetadata, StatisticPoint},
};

const CONNECT_ATTEMPTS: usize = 5;

const CREATE_META_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS statistics_meta (
        statistic_id        TEXT PRIMARY KEY NOT NULL,
        source              TEXT NOT NULL,
        name                TEXT NOT NULL,
        unit_of_measurement TEXT NOT NULL,
        has_mean            INTEGER NOT NULL,
        has_sum             INTEGER NOT NULL
    )
"#;

const CREATE_STATISTICS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS statistics (
        statistic_id TEXT NOT NULL REFERENCES statistics_meta (statistic_id),
        start_ts     INTEGER NOT NULL,
        state        TEXT NOT NULL,
        sum          TEXT NOT NULL,
        PRIMARY KEY (statistic_id, start_ts)
    )
"#;

type PointRow = (i64, String, String);
type MetadataRow = (String, String, String, String, bool, bool);

/// SQLite-backed statistics store.
///
/// Decimal values are stored as text so cumulative sums survive a round trip
/// unchanged.
#[derive(Clone)]
pub struct SqliteStatisticsStore {
    pool: SqlitePool,
}

impl SqliteStatisticsStore {
    /// Connect, create the schema and verify the connection.
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        info!(url = %cfg.url, "opening statistics database");
        let pool = Self::connect_with_retry(cfg, CONNECT_ATTEMPTS).await?;
        let store = Self { pool };
        store.migrate().await?;
        store.health_check().await?;
        Ok(store)
    }

    /// Fresh in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DbConfig { url: "sqlite::memory:".to_string(), max_connections: 1 }).await
    }

    async fn connect_with_retry(cfg: &DbConfig, max_attempts: usize) -> Result<SqlitePool> {
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            attempt += 1;
            match Self::try_connect(cfg).await {
                Ok(pool) => return Ok(pool),
                Err(e) if attempt >= max_attempts => {
                    return Err(e).context(format!(
                        "Failed to open statistics database after {max_attempts} attempts"
                    ));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, ?delay, "database connection failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn try_connect(cfg: &DbConfig) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::from_str(&cfg.url)
            .with_context(|| format!("invalid database URL {}", cfg.url))?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own database,
        // so the pool must hold on to exactly one.
        let pool_options = if is_in_memory(&cfg.url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(cfg.max_connections.max(1))
        };

        pool_options
            .connect_with(options)
            .await
            .context("Failed to create database pool")
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_META_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create statistics_meta table")?;
        sqlx::query(CREATE_STATISTICS_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create statistics table")?;
        Ok(())
    }

}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn point_from_row((start_ts, state, sum): PointRow) -> Result<StatisticPoint> {
    let start = DateTime::<Utc>::from_timestamp(start_ts, 0)
        .with_context(|| format!("invalid statistic timestamp {start_ts}"))?;
    Ok(StatisticPoint {
        start,
        state: Decimal::from_str(&state).with_context(|| format!("invalid state {state}"))?,
        sum: Decimal::from_str(&sum).with_context(|| format!("invalid sum {sum}"))?,
    })
}

fn metadata_from_row(row: MetadataRow) -> StatisticMetadata {
    let (statistic_id, source, name, unit_of_measurement, has_mean, has_sum) = row;
    StatisticMetadata { source, statistic_id, name, unit_of_measurement, has_mean, has_sum }
}

#[async_trait]
impl StatisticsStore for SqliteStatisticsStore {
    async fn last_statistic(&self, statistic_id: &str) -> Result<Option<LastStatistic>> {
        let row = sqlx::query_as::<_, PointRow>(
            r#"
            SELECT start_ts, state, sum
            FROM statistics
            WHERE statistic_id = ?
            ORDER BY start_ts DESC
            LIMIT 1
            "#,
        )
        .bind(statistic_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch last statistic")?;

        row.map(point_from_row).transpose().map(|p| p.map(LastStatistic::from))
    }

    async fn add_statistics(
        &self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;

        sqlx::query(
            r#"
            INSERT INTO statistics_meta (statistic_id, source, name, unit_of_measurement, has_mean, has_sum)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (statistic_id) DO UPDATE SET
                source = excluded.source,
                name = excluded.name,
                unit_of_measurement = excluded.unit_of_measurement,
                has_mean = excluded.has_mean,
                has_sum = excluded.has_sum
            "#,
        )
        .bind(&metadata.statistic_id)
        .bind(&metadata.source)
        .bind(&metadata.name)
        .bind(&metadata.unit_of_measurement)
        .bind(metadata.has_mean)
        .bind(metadata.has_sum)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert statistics metadata")?;

        for point in points {
            sqlx::query(
                r#"
                INSERT INTO statistics (statistic_id, start_ts, state, sum)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (statistic_id, start_ts) DO UPDATE SET
                    state = excluded.state,
                    sum = excluded.sum
                "#,
            )
            .bind(&metadata.statistic_id)
            .bind(point.start.timestamp())
            .bind(point.state.to_string())
            .bind(point.sum.to_string())
            .execute(&mut *tx)
            .await
            .context("Failed to insert statistic")?;
        }

        tx.commit().await.context("Failed to commit statistics")?;

        debug!(statistic_id = %metadata.statistic_id, count = points.len(), "stored statistics");
        Ok(())
    }

    async fn statistics_during(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticPoint>> {
        let rows = sqlx::query_as::<_, PointRow>(
            r#"
            SELECT start_ts, state, sum
            FROM statistics
            WHERE statistic_id = ? AND start_ts >= ? AND start_ts < ?
            ORDER BY start_ts ASC
            "#,
        )
        .bind(statistic_id)
        .bind(start.timestamp())
        .bind(end.timestamp())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch statistics in range")?;

        rows.into_iter().map(point_from_row).collect()
    }

    async fn metadata(&self, statistic_id: &str) -> Result<Option<StatisticMetadata>> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT statistic_id, source, name, unit_of_measurement, has_mean, has_sum
            FROM statistics_meta
            WHERE statistic_id = ?
            "#,
        )
        .bind(statistic_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch statistics metadata")?;

        Ok(row.map(metadata_from_row))
    }

    async fn list_metadata(&self) -> Result<Vec<StatisticMetadata>> {
        let rows = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT statistic_id, source, name, unit_of_measurement, has_mean, has_sum
            FROM statistics_meta
            ORDER BY statistic_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list statistics metadata")?;

        Ok(rows.into_iter().map(metadata_from_row).collect())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    async fn close(&self) {
        info!("closing statistics database");
        self.pool.close().await;
    }
}
