//! HTTP request handlers shared by storefront services.

pub mod health;

pub use health::{health_check, readiness};
