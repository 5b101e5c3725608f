//! API endpoints, mounted under `/api/v1`.
//!
//! - Checkout: session creation and the processor webhook
//! - Cart: read and mutate the caller's cart
//! - Orders: place, list, read, cancel

pub mod cart;
pub mod checkout;
pub mod orders;
pub mod webhook;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use storefront_web::AppError;

/// JSON request body whose rejections use the `{code, message}` error shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|rejection: JsonRejection| AppError::bad_request(rejection.body_text()))
    }
}
