//! Order endpoints.

use super::JsonBody;
use crate::auth::AuthUser;
use crate::orders::PlaceOrderRequest;
use crate::server::AppState;
use crate::types::{Order, OrderNumber};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use storefront_web::WebResult;

/// `GET /api/v1/orders`, newest first
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> WebResult<Json<Vec<Order>>> {
    Ok(Json(state.orders.list(&user.id).await?))
}

/// `GET /api/v1/orders/:id`
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(number): Path<String>,
) -> WebResult<Json<Order>> {
    let number = OrderNumber::new(number);
    Ok(Json(state.orders.get(&user.id, &number).await?))
}

/// `POST /api/v1/orders`
///
/// ```bash
/// curl -X POST http://localhost:3000/api/v1/orders \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "products": [{"productId": "550e8400-e29b-41d4-a716-446655440000", "quantity": 1}],
///     "shippingAddress": {"street": "1 Main St", "city": "Springfield", "state": "IL",
///                         "zipCode": "62701", "country": "US"},
///     "couponApplied": "WELCOME10"
///   }'
/// ```
pub async fn place_order(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<PlaceOrderRequest>,
) -> WebResult<(StatusCode, Json<Order>)> {
    let order = state.orders.place(&user.id, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// `POST /api/v1/orders/:id/cancel`
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(number): Path<String>,
) -> WebResult<Json<Order>> {
    let number = OrderNumber::new(number);
    Ok(Json(state.orders.cancel(&user.id, &number).await?))
}
