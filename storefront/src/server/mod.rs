//! HTTP server: application state, router, readiness.

pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::{AppState, ShopBackend};
