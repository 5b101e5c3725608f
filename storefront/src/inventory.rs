//! Inventory ledger: product records and their stock counts.
//!
//! Stock changes are atomic conditional updates. A decrement that would take
//! stock below zero fails with [`InventoryError::InsufficientStock`] and
//! leaves the count untouched.
//!
//! These are the standalone ledger operations. Order commit and
//! cancellation apply the same conditional update inside their own atomic
//! step, so each backend shares one decrement and one restock routine
//! between both paths.

use crate::storage::StorageError;
use crate::types::{Product, ProductId};
use async_trait::async_trait;
use thiserror::Error;

/// Inventory failures.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// No product with this id
    #[error("product {0} not found")]
    ProductNotFound(ProductId),

    /// Stock is lower than the requested quantity
    #[error(
        "insufficient stock for product {product_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        /// Product that could not be decremented
        product_id: ProductId,
        /// Units requested
        requested: u32,
        /// Units in stock
        available: u32,
    },

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Product reads and atomic stock updates.
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Loads one product (active or not).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StorageError>;

    /// Loads the products that exist among `ids`, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StorageError>;

    /// Removes `quantity` units, only if that many are in stock.
    ///
    /// Returns the remaining stock.
    ///
    /// # Errors
    ///
    /// - [`InventoryError::ProductNotFound`]: unknown product
    /// - [`InventoryError::InsufficientStock`]: stock below `quantity` (nothing changes)
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError>;

    /// Returns `quantity` units to stock. Returns the new stock.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::ProductNotFound`] for an unknown product.
    async fn restock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError>;
}
