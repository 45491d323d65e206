use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Instant};

use super::{error::ApiError, health, response::ApiResponse};
use crate::{
    auth::{require_bearer, BearerToken},
    config::Config,
    domain::{StatisticMetadata, StatisticPoint},
    sensor::{MeterSensor, SensorSnapshot, UpdateOutcome},
    sync::{AppState, TaskStatus},
};

const DEFAULT_STATISTICS_DAYS: i64 = 7;

pub fn router(state: AppState, cfg: &Config) -> Router {
    let protected = Router::new()
        .route("/meters", get(list_meters))
        .route("/meters/:id", get(get_meter))
        .route("/meters/:id/statistics", get(get_statistics))
        .route("/meters/:id/sync", post(sync_meter))
        .route("/status", get(get_status))
        .route_layer(middleware::from_fn_with_state(
            BearerToken::new(&cfg.auth.token),
            require_bearer,
        ));

    Router::new()
        .route("/healthz", get(health::liveness_check))
        .route("/health", get(health::health_check))
        .merge(protected)
        .with_state(state)
}

fn find_sensor(state: &AppState, id: &str) -> Result<Arc<MeterSensor>, ApiError> {
    state
        .scheduler
        .sensor(id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("metering point {id}")))
}

pub async fn list_meters(State(st): State<AppState>) -> ApiResponse<Vec<SensorSnapshot>> {
    let snapshots = join_all(st.scheduler.sensors().map(|s| s.snapshot())).await;
    let count = snapshots.len();
    ApiResponse::success(snapshots).with_count(count)
}

pub async fn get_meter(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<SensorSnapshot>, ApiError> {
    let sensor = find_sensor(&st, &id)?;
    Ok(ApiResponse::success(sensor.snapshot().await))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl StatisticsQuery {
    /// Requested range, defaulting to the last week.
    fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
        let end = self.end.unwrap_or(now);
        let start = self.start.unwrap_or(end - Duration::days(DEFAULT_STATISTICS_DAYS));
        if start >= end {
            return Err(ApiError::BadRequest("start must be before end".to_string()));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub statistic_id: String,
    pub metadata: Option<StatisticMetadata>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub points: Vec<StatisticPoint>,
}

pub async fn get_statistics(
    State(st): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<StatisticsQuery>,
) -> Result<ApiResponse<StatisticsResponse>, ApiError> {
    let started = Instant::now();
    let sensor = find_sensor(&st, &id)?;
    let (start, end) = q.resolve(Utc::now())?;

    let statistic_id = sensor.statistic_id().to_string();
    let metadata = st.store.metadata(&statistic_id).await?;
    let points = st.store.statistics_during(&statistic_id, start, end).await?;
    let count = points.len();

    Ok(ApiResponse::success(StatisticsResponse { statistic_id, metadata, start, end, points })
        .with_count(count)
        .with_duration(started.elapsed().as_millis() as u64))
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub outcome: UpdateOutcome,
    pub meter: SensorSnapshot,
}

pub async fn sync_meter(
    State(st): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<SyncResponse>, ApiError> {
    let sensor = find_sensor(&st, &id)?;
    let outcome = st
        .scheduler
        .trigger(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("metering point {id}")))?;
    if outcome == UpdateOutcome::Skipped {
        return Err(ApiError::Conflict(format!("sync of {id} already in progress")));
    }
    Ok(ApiResponse::success(SyncResponse { outcome, meter: sensor.snapshot().await }))
}

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub scan_interval_secs: u64,
    pub meters: BTreeMap<String, TaskStatus>,
}

pub async fn get_status(State(st): State<AppState>) -> ApiResponse<ServiceStatus> {
    ApiResponse::success(ServiceStatus {
        scan_interval_secs: st.scheduler.interval().as_secs(),
        meters: st.scheduler.status().await,
    })
}
