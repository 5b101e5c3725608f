//! Readiness endpoint: fulfillment store plus storage backend.

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use storefront_runtime::HealthCheck;
use storefront_web::handlers::readiness;

/// Readiness report.
///
/// ```text
/// GET /health/ready
/// ```
///
/// 200 when every component is healthy or degraded, 503 otherwise.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<Vec<HealthCheck>>) {
    let backend = state.storage.backend();
    let storage = match state.storage.ping().await {
        Ok(()) => HealthCheck::healthy("storage"),
        Err(error) => {
            tracing::warn!(%error, backend, "Storage readiness check failed");
            HealthCheck::unhealthy("storage", error.to_string())
        },
    }
    .with_metadata("backend", backend);

    readiness(vec![state.fulfillment.health(), storage])
}
