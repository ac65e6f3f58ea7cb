use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn check_component<F, T, E>(check: F) -> ComponentHealth
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    match check.await {
        Ok(_) => ComponentHealth {
            status: "ok",
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error",
            latency_ms: None,
        },
    }
}

/// GET /health: dependency status for the API process.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = check_component(sqlx::query("SELECT 1").execute(&state.db)).await;
    let redis = check_component(state.queue.health_check()).await;

    let queue_depth = if redis.is_ok() {
        state.queue.queue_depth().await.ok()
    } else {
        None
    };
    if let Some(depth) = queue_depth {
        metrics::gauge!("batch_queue_depth").set(depth as f64);
    }

    let all_healthy = database.is_ok() && redis.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks { database, redis },
        queue_depth,
    };

    (status_code, Json(response))
}
