//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{http::StatusCode, Json};
use storefront_runtime::{HealthCheck, HealthStatus};

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK to indicate the service is running.
/// This endpoint does NOT check dependencies (database, payment processor).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness report over several components.
///
/// Applications collect one [`HealthCheck`] per dependency (a store's
/// `health()`, a database ping) and return this from `/health/ready`.
///
/// # Status Codes
///
/// - 200 OK: every component Healthy or Degraded
/// - 503 Service Unavailable: any component Unhealthy
///
/// # Response
///
/// ```json
/// [
///   {"component": "fulfillment", "status": "Healthy", "message": null, "metadata": []},
///   {"component": "storage", "status": "Healthy", "message": null,
///    "metadata": [["backend", "memory"]]}
/// ]
/// ```
#[must_use]
pub fn readiness(checks: Vec<HealthCheck>) -> (StatusCode, Json<Vec<HealthCheck>>) {
    let overall = checks
        .iter()
        .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));
    let status = match overall {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(checks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[test]
    fn degraded_is_still_ready() {
        let (status, Json(checks)) = readiness(vec![
            HealthCheck::healthy("store"),
            HealthCheck::degraded("database", "slow"),
        ]);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(checks.len(), 2);
    }

    #[test]
    fn one_unhealthy_component_fails_readiness() {
        let (status, _) = readiness(vec![
            HealthCheck::healthy("store"),
            HealthCheck::unhealthy("database", "connection refused"),
        ]);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
