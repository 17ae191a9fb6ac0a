use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Catalog size, absent when the database is unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Health check: the service answers and the parameter catalog is readable
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let parameters = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM parameters")
        .fetch_one(&state.db)
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "health probe failed"))
        .ok();

    let (status, http_status) = match parameters {
        Some(_) => ("ok", StatusCode::OK),
        None => ("degraded", StatusCode::SERVICE_UNAVAILABLE),
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            parameters,
        }),
    )
}
