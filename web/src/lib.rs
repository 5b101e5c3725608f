//! Axum integration for storefront services.
//!
//! Handlers stay thin: they extract request data, call into services or
//! dispatch an action through a `Store`, and map the outcome to a response.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract data** from request (JSON, headers, raw body)
//! 3. **Call** a service or **dispatch** an action through a `Store`
//! 4. **Map result** to HTTP response, converting domain errors to [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use storefront_web::{AppError, WebResult};
//! use axum::{extract::State, Json};
//!
//! async fn get_cart(
//!     State(state): State<AppState>,
//!     user: AuthUser,
//! ) -> WebResult<Json<CartView>> {
//!     let cart = state.carts.get(&user.id).await?;
//!     Ok(Json(cart))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{correlation_id_layer, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
