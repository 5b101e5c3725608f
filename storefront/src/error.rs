//! Domain errors → HTTP responses.
//!
//! | Kind | Status |
//! |---|---|
//! | validation, empty or invalid cart, insufficient stock, bad transition, bad signature | 400 |
//! | missing token | 401 |
//! | bad token, non-owner | 403 |
//! | unknown cart item, order, product | 404 |
//! | duplicate order id, lost optimistic retries, fulfillment in progress | 409 |
//! | store failure | 500 |
//! | processor failure | 502 |
//!
//! 5xx responses keep the domain error as their source, which the web crate
//! logs once when the response is rendered.

use crate::cart::CartError;
use crate::checkout::CheckoutError;
use crate::orders::OrderError;
use crate::payment::WebhookError;
use crate::storage::StorageError;
use storefront_web::AppError;

impl From<StorageError> for AppError {
    fn from(error: StorageError) -> Self {
        if error.is_conflict() {
            return Self::conflict("Resource was modified concurrently, please retry");
        }
        Self::internal("Internal Server Error").with_source(error)
    }
}

impl From<CartError> for AppError {
    fn from(error: CartError) -> Self {
        match error {
            CartError::InvalidProductOrQuantity
            | CartError::InsufficientStock
            | CartError::InvalidQuantity => Self::bad_request(error.to_string()),
            CartError::ProductUnavailable | CartError::ItemNotFound | CartError::CartNotFound => {
                Self::missing(error.to_string())
            },
            CartError::Conflict => Self::conflict(error.to_string()),
            CartError::Storage(e) => e.into(),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(error: CheckoutError) -> Self {
        match error {
            CheckoutError::EmptyCart
            | CheckoutError::InsufficientStock(_)
            | CheckoutError::InvalidCartContents(_) => Self::bad_request(error.to_string()),
            CheckoutError::Processor(_) => Self::bad_gateway(error.to_string()).with_source(error),
            CheckoutError::Storage(e) => e.into(),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(error: OrderError) -> Self {
        match error {
            OrderError::NotFound => Self::missing(error.to_string()),
            OrderError::Forbidden => Self::forbidden(error.to_string()),
            OrderError::InvalidStateTransition { .. }
            | OrderError::InsufficientStock { .. }
            | OrderError::Validation(_) => Self::bad_request(error.to_string()),
            OrderError::DuplicateOrderId(_) => Self::conflict(error.to_string()),
            OrderError::Storage(e) => e.into(),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(error: WebhookError) -> Self {
        Self::bad_request(format!("Webhook Error: {error}"))
    }
}
