//! Monitoring handlers: liveness, readiness, Prometheus metrics.
use crate::api::error::{api_unavailable, ApiError};
use crate::api::types::HealthResponse;
use crate::app::AppState;
use axum::extract::State;
use axum::Json;

#[utoipa::path(
    get,
    path = "/liveness",
    tag = "monitoring",
    responses((status = 200, description = "Process is alive", body = HealthResponse))
)]
pub(crate) async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "alive".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/readiness",
    tag = "monitoring",
    responses(
        (status = 200, description = "Ready to serve traffic", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn readiness(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    if let Err(err) = state.store.health_check().await {
        tracing::warn!(error = ?err, "readiness check failed");
        return Err(api_unavailable("database is down"));
    }
    Ok(Json(HealthResponse {
        status: "ready".to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/metrics",
    tag = "monitoring",
    responses((status = 200, description = "Prometheus exposition text"))
)]
pub(crate) async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
