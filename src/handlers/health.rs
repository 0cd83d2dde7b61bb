use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Instant;

use crate::AppState;

/// Component health status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub database: ComponentStatus,
    pub database_latency_ms: u64,
}

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Liveness probe
pub async fn api_status() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Readiness probe: 503 when the database does not answer
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let latency = started.elapsed().as_millis() as u64;

    let (status, code) = match &db_result {
        Ok(()) => (ComponentStatus::Up, StatusCode::OK),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (ComponentStatus::Down, StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let body = HealthResponse {
        status: status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        database: status,
        database_latency_ms: latency,
    };
    (code, Json(body))
}
