//! Router configuration.

use super::health::readiness_check;
use super::state::AppState;
use crate::api::{cart, checkout, orders, webhook};
use axum::{
    routing::{get, post, put},
    Router,
};
use storefront_web::{correlation_id_layer, handlers::health_check};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Builds the complete router.
///
/// - `GET /health`, `GET /health/ready` (no authentication)
/// - `/api/v1/checkout/*`, `/api/v1/cart/*`, `/api/v1/orders/*`
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Checkout
        .route("/checkout/create-session", post(checkout::create_session))
        .route("/checkout/webhook", post(webhook::handle_webhook))
        // Cart
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route(
            "/cart/items/:id",
            put(cart::update_item).delete(cart::remove_item),
        )
        // Orders
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(correlation_id_layer())
        .with_state(state)
}
