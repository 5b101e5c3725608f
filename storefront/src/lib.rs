//! Storefront checkout-to-fulfillment service.
//!
//! Carts, hosted checkout sessions at a payment processor, webhook-driven
//! order fulfillment, and order management, behind a JSON API.
//!
//! # Architecture
//!
//! ```text
//!  client ──► /api/v1/cart ──────────► CartService ──────┐
//!         ──► /api/v1/checkout/... ──► CheckoutService ──┤ snapshot
//!                                         │              │
//!                                         ▼              ▼
//!                                   PaymentProcessor   storage (memory | postgres)
//!                                         │              ▲
//!  processor ──► /api/v1/checkout/webhook │              │ one atomic commit
//!                    verify + parse ──► Store<FulfillmentReducer> ──┘
//!  client ──► /api/v1/orders ───────► OrderService ──────┘
//! ```
//!
//! # Key Properties
//!
//! - **Atomic fulfillment**: order insert, stock decrements, cart release,
//!   and the idempotency receipt commit together or not at all.
//! - **Idempotent webhooks**: an in-process session state machine plus a
//!   durable receipt keyed by the checkout session id.
//! - **Frozen carts**: the cart is snapshotted when the session is created,
//!   and the snapshot is what gets fulfilled.
//! - **No overselling**: every stock decrement is conditional; a shortfall
//!   during fulfillment routes the order to `needs_review`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod fulfillment;
pub mod inventory;
pub mod metrics;
pub mod orders;
pub mod payment;
pub mod server;
pub mod storage;
pub mod types;

pub use config::Config;
pub use server::{build_router, AppState};
pub use types::*;
