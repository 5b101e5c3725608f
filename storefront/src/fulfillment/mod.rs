//! Payment fulfillment: turns a verified payment confirmation into an order.
//!
//! # Architecture
//!
//! ```text
//! webhook handler ── ConfirmPayment{delivery} ──► Store<FulfillmentReducer>
//!                                                   │ test-and-set on session id
//!                                                   ▼
//!                                     Effect::Future(process::fulfill)
//!                                                   │ one atomic OrderRepository::commit
//!                                                   ▼
//! webhook handler ◄── result action{delivery} ── broadcast, then fed back
//! ```
//!
//! The reducer holds only the sessions being fulfilled right now. A
//! delivery for one of them gets [`FulfillmentAction::InProgress`]; any
//! final result releases the session again. A delivery for a finished
//! session runs a new attempt, which finds the durable receipt and answers
//! [`FulfillmentAction::AlreadyFulfilled`].
//!
//! The in-process guard only covers this process. The durable guard is the
//! fulfillment receipt claimed inside the commit transaction.

pub mod actions;
pub mod environment;
mod process;
pub mod reducer;
#[cfg(test)]
mod tests;

pub use actions::FulfillmentAction;
pub use environment::FulfillmentEnvironment;
pub use reducer::{FulfillmentReducer, FulfillmentState};

use storefront_runtime::Store;

/// Runtime store driving the fulfillment reducer
pub type FulfillmentStore =
    Store<FulfillmentState, FulfillmentAction, FulfillmentEnvironment, FulfillmentReducer>;

/// Creates a fulfillment store with empty state.
#[must_use]
pub fn fulfillment_store(env: FulfillmentEnvironment) -> FulfillmentStore {
    Store::new(FulfillmentState::default(), FulfillmentReducer::new(), env)
}
