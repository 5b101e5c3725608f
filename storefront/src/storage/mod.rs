//! Storage backends.
//!
//! Every repository trait in the crate (`InventoryLedger`, `CartRepository`,
//! `CheckoutRepository`, `OrderRepository`) is implemented by both backends:
//!
//! - [`memory::InMemoryShop`]: one lock over the whole document set (default)
//! - `postgres::PostgresShop`: `sqlx` transactions (feature `postgres`)

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryShop;
#[cfg(feature = "postgres")]
pub use postgres::PostgresShop;

/// Failures shared by all repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Optimistic write lost against a concurrent write
    #[error("concurrent modification: expected version {expected}")]
    VersionConflict {
        /// Version the writer started from
        expected: u64,
    },

    /// Backend could not be reached or rejected the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// True for a lost optimistic write
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Backend liveness, for readiness checks.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Backend name in health reports
    fn backend(&self) -> &'static str;

    /// Checks that the backend answers.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] when it does not.
    async fn ping(&self) -> Result<(), StorageError>;
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(error: sqlx::Error) -> Self {
        Self::Unavailable(error.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<serde_json::Error> for StorageError {
    fn from(error: serde_json::Error) -> Self {
        Self::Corrupt(error.to_string())
    }
}
