//! Persistence for long-term energy statistics.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{LastStatistic, StatisticMetadata, StatisticPoint};

pub use sqlite::SqliteStatisticsStore;

#[async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Most recent point of a series, if any was imported.
    async fn last_statistic(&self, statistic_id: &str) -> Result<Option<LastStatistic>>;

    /// Upsert metadata and points; points are keyed by their start time.
    async fn add_statistics(
        &self,
        metadata: &StatisticMetadata,
        points: &[StatisticPoint],
    ) -> Result<()>;

    /// Points with `start <= t < end`, oldest first.
    async fn statistics_during(
        &self,
        statistic_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StatisticPoint>>;

    async fn metadata(&self, statistic_id: &str) -> Result<Option<StatisticMetadata>>;

    async fn list_metadata(&self) -> Result<Vec<StatisticMetadata>>;

    async fn health_check(&self) -> Result<()>;

    /// Release connections on shutdown.
    async fn close(&self) {}
}
