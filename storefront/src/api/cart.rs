//! Cart endpoints. Every mutation answers with the formatted cart.

use super::JsonBody;
use crate::auth::AuthUser;
use crate::cart::{AddItemRequest, CartError, CartView, UpdateItemRequest};
use crate::server::AppState;
use crate::types::CartItemId;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use storefront_web::WebResult;

/// `{ "message": ... }`
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    /// Confirmation text
    pub message: String,
}

/// Unknown or malformed line ids are both "not in the cart"
fn item_id(raw: &str) -> Result<CartItemId, CartError> {
    CartItemId::parse(raw).map_err(|_| CartError::ItemNotFound)
}

/// `GET /api/v1/cart`
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> WebResult<Json<CartView>> {
    Ok(Json(state.carts.get(&user.id).await?))
}

/// `POST /api/v1/cart/items`
///
/// ```bash
/// curl -X POST http://localhost:3000/api/v1/cart/items \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"productId": "550e8400-e29b-41d4-a716-446655440000", "quantity": 2}'
/// ```
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    JsonBody(request): JsonBody<AddItemRequest>,
) -> WebResult<Json<CartView>> {
    Ok(Json(state.carts.add_item(&user.id, request).await?))
}

/// `PUT /api/v1/cart/items/:id`
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<UpdateItemRequest>,
) -> WebResult<Json<CartView>> {
    let id = item_id(&id)?;
    Ok(Json(state.carts.update_item(&user.id, id, request).await?))
}

/// `DELETE /api/v1/cart/items/:id`
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> WebResult<Json<CartView>> {
    let id = item_id(&id)?;
    Ok(Json(state.carts.remove_item(&user.id, id).await?))
}

/// `DELETE /api/v1/cart`
pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> WebResult<Json<MessageResponse>> {
    state.carts.clear(&user.id).await?;
    Ok(Json(MessageResponse {
        message: "Cart cleared successfully".to_string(),
    }))
}
