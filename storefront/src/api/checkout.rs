//! `POST /api/v1/checkout/create-session`

use crate::auth::AuthUser;
use crate::checkout::CheckoutSession;
use crate::server::AppState;
use axum::{extract::State, Json};
use storefront_web::{CorrelationId, WebResult};

/// Opens a processor checkout session for the caller's cart.
///
/// Answers `{sessionId, url}`; the client redirects to `url`.
#[tracing::instrument(
    skip(state, user),
    fields(user_id = %user.id, correlation_id = %correlation_id.0)
)]
pub async fn create_session(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    user: AuthUser,
) -> WebResult<Json<CheckoutSession>> {
    let session = state.checkout.create_session(&user.id).await?;
    tracing::info!(session_id = %session.session_id, "Checkout session created");
    Ok(Json(session))
}
