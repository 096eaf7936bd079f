//! Health and probe endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

async fn database_reachable(state: &AppState) -> bool {
    sqlx::query("SELECT 1").execute(&state.pool).await.is_ok()
}

/// Full health report including database reachability
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = database_reachable(&state).await;

    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if db_ok { "healthy" } else { "unhealthy" },
        version: env!("CARGO_PKG_VERSION"),
        database: if db_ok { "reachable" } else { "unreachable" },
    };

    (code, Json(body))
}

/// Liveness probe, 200 whenever the process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe, 200 only when the database answers
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if database_reachable(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
