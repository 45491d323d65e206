use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::time::Instant;

use crate::sync::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: ComponentHealth,
    meters: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self { status: "healthy", latency_ms: Some(latency_ms), error: None }
    }

    fn unhealthy(error: String) -> Self {
        Self { status: "unhealthy", latency_ms: None, error: Some(error) }
    }

    fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// GET /health - store connectivity and sensor availability
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let start = Instant::now();

    let database = match state.store.health_check().await {
        Ok(()) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
        Err(e) => ComponentHealth::unhealthy(format!("{e:#}")),
    };
    let meters = check_meters(&state).await;

    let all_healthy = database.is_healthy() && meters.is_healthy();
    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" },
        timestamp: chrono::Utc::now(),
        checks: HealthChecks { database, meters },
    };

    let status_code = if all_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    tracing::debug!(
        duration_ms = start.elapsed().as_millis() as u64,
        healthy = all_healthy,
        "Health check completed"
    );

    (status_code, Json(response))
}

async fn check_meters(state: &AppState) -> ComponentHealth {
    let mut unavailable = Vec::new();
    for sensor in state.scheduler.sensors() {
        if !sensor.is_available().await {
            unavailable.push(sensor.metering_point_id().to_string());
        }
    }
    if unavailable.is_empty() {
        ComponentHealth::healthy(0)
    } else {
        ComponentHealth::unhealthy(format!("unavailable: {}", unavailable.join(", ")))
    }
}

/// GET /healthz - liveness probe
pub async fn liveness_check() -> impl IntoResponse {
    StatusCode::OK
}
