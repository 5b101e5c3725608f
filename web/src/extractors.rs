//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request correlation ID (from the middleware, the header, or fresh)
//!
//! # Examples
//!
//! ```ignore
//! async fn create_session(
//!     correlation_id: CorrelationId,
//! ) -> Result<Json<CheckoutSession>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Creating checkout session");
//!     Ok(Json(session))
//! }
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use uuid::Uuid;

use crate::middleware::CORRELATION_ID_HEADER;

/// Correlation ID for request tracing.
///
/// Uses the ID stored by [`correlation_id_layer`](crate::correlation_id_layer)
/// when the layer is installed, so handlers log the same ID the response
/// header carries. Without the layer it reads `X-Correlation-ID` or
/// generates a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}
