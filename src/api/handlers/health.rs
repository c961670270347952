use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    /// Jobs between `queued` and `rendering`.
    pub jobs_in_flight: usize,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse),
        (status = 503, description = "Storage root is not usable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let storage_ok = tokio::fs::metadata(state.layout.root())
        .await
        .is_ok_and(|m| m.is_dir());

    let jobs_in_flight = match state.store.in_flight().await {
        Ok(ids) => ids.len(),
        Err(e) => {
            tracing::warn!("Health check could not list jobs: {:#}", e);
            0
        }
    };

    let code = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if storage_ok { "ok" } else { "degraded" }.to_string(),
            storage: if storage_ok { "available" } else { "unavailable" }.to_string(),
            jobs_in_flight,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
