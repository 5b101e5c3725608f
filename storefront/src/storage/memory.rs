//! In-memory document store.
//!
//! All tables sit behind one mutex, so every repository call (including the
//! multi-document order commit) is a single atomic step. The lock is never
//! held across an `.await`.

use super::{HealthProbe, StorageError};
use crate::cart::CartRepository;
use crate::checkout::CheckoutRepository;
use crate::inventory::{InventoryError, InventoryLedger};
use crate::orders::{CommitOutcome, OrderCommit, OrderError, OrderRepository, StockPolicy};
use crate::types::{
    Cart, CartId, CheckoutId, CheckoutSnapshot, Order, OrderNumber, OrderStatus, Product,
    ProductId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    carts: HashMap<CartId, Cart>,
    cart_owners: HashMap<UserId, CartId>,
    snapshots: HashMap<CheckoutId, CheckoutSnapshot>,
    /// Insertion order is creation order
    orders: Vec<Order>,
    /// Session id → (event id, order number)
    receipts: HashMap<String, (String, OrderNumber)>,
}

impl Tables {
    fn order_mut(&mut self, number: &OrderNumber) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.order_number == *number)
    }

    /// Conditional decrement; `None` when the product is missing or short
    fn take_stock(&mut self, id: ProductId, quantity: u32) -> Option<u32> {
        let product = self.products.get_mut(&id).filter(|p| p.stock >= quantity)?;
        product.stock -= quantity;
        Some(product.stock)
    }

    fn return_stock(&mut self, id: ProductId, quantity: u32) -> Option<u32> {
        let product = self.products.get_mut(&id)?;
        product.stock = product.stock.saturating_add(quantity);
        Some(product.stock)
    }
}

/// Every repository over one in-process document set.
#[derive(Default)]
pub struct InMemoryShop {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl std::fmt::Debug for InMemoryShop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.lock();
        f.debug_struct("InMemoryShop")
            .field("products", &tables.products.len())
            .field("carts", &tables.carts.len())
            .field("orders", &tables.orders.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryShop {
    /// Creates an empty shop
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a catalog product.
    pub fn insert_product(&self, product: Product) {
        self.lock().products.insert(product.id, product);
    }

    /// Removes a catalog product. Carts and orders keep referring to it.
    pub fn delete_product(&self, id: ProductId) {
        self.lock().products.remove(&id);
    }

    /// Overwrites an order's status (fulfilment staff tooling).
    ///
    /// Returns false when the order does not exist.
    pub fn set_order_status(&self, number: &OrderNumber, status: OrderStatus) -> bool {
        let mut tables = self.lock();
        let Some(order) = tables.order_mut(number) else {
            return false;
        };
        order.status = status;
        true
    }

    /// Makes the next [`OrderRepository::commit`] fail as if the backend
    /// went away mid-transaction.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HealthProbe for InMemoryShop {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[async_trait]
impl InventoryLedger for InMemoryShop {
    async fn product(&self, id: ProductId) -> Result<Option<Product>, StorageError> {
        Ok(self.lock().products.get(&id).cloned())
    }

    async fn products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StorageError> {
        let tables = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id).cloned())
            .collect())
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError> {
        let mut tables = self.lock();
        if let Some(remaining) = tables.take_stock(id, quantity) {
            return Ok(remaining);
        }
        match tables.products.get(&id) {
            None => Err(InventoryError::ProductNotFound(id)),
            Some(product) => Err(InventoryError::InsufficientStock {
                product_id: id,
                requested: quantity,
                available: product.stock,
            }),
        }
    }

    async fn restock(&self, id: ProductId, quantity: u32) -> Result<u32, InventoryError> {
        self.lock()
            .return_stock(id, quantity)
            .ok_or(InventoryError::ProductNotFound(id))
    }
}

#[async_trait]
impl CartRepository for InMemoryShop {
    async fn find_by_user(&self, user: &UserId) -> Result<Option<Cart>, StorageError> {
        let tables = self.lock();
        Ok(tables
            .cart_owners
            .get(user)
            .and_then(|id| tables.carts.get(id))
            .cloned())
    }

    async fn find(&self, id: CartId) -> Result<Option<Cart>, StorageError> {
        Ok(self.lock().carts.get(&id).cloned())
    }

    async fn save(&self, cart: &Cart) -> Result<Cart, StorageError> {
        let mut tables = self.lock();
        let stored_version = tables.carts.get(&cart.id).map(|c| c.version);

        let fresh_cart_taken = cart.version == 0
            && (stored_version.is_some() || tables.cart_owners.contains_key(&cart.user_id));
        let stale = cart.version > 0 && stored_version != Some(cart.version);
        if fresh_cart_taken || stale {
            return Err(StorageError::VersionConflict {
                expected: cart.version,
            });
        }

        let mut stored = cart.clone();
        stored.version += 1;
        tables.cart_owners.insert(stored.user_id.clone(), stored.id);
        tables.carts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn clear(&self, user: &UserId) -> Result<Option<Cart>, StorageError> {
        let mut tables = self.lock();
        let Some(id) = tables.cart_owners.get(user).copied() else {
            return Ok(None);
        };
        Ok(tables.carts.get_mut(&id).map(|cart| {
            cart.clear();
            cart.version += 1;
            cart.clone()
        }))
    }
}

#[async_trait]
impl CheckoutRepository for InMemoryShop {
    async fn save_snapshot(&self, snapshot: &CheckoutSnapshot) -> Result<(), StorageError> {
        self.lock().snapshots.insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn snapshot(&self, id: CheckoutId) -> Result<Option<CheckoutSnapshot>, StorageError> {
        Ok(self.lock().snapshots.get(&id).cloned())
    }

    async fn attach_session(&self, id: CheckoutId, session_id: &str) -> Result<(), StorageError> {
        let mut tables = self.lock();
        let snapshot = tables
            .snapshots
            .get_mut(&id)
            .ok_or_else(|| StorageError::Corrupt(format!("checkout {id} not found")))?;
        snapshot.session_id = Some(session_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryShop {
    async fn commit(&self, commit: OrderCommit) -> Result<CommitOutcome, OrderError> {
        let mut tables = self.lock();

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            let lost = StorageError::Unavailable("connection lost during commit".to_string());
            return Err(lost.into());
        }

        if let Some(receipt) = &commit.receipt {
            if let Some((_, order_number)) = tables.receipts.get(&receipt.session_id) {
                return Ok(CommitOutcome::Duplicate {
                    order_number: order_number.clone(),
                });
            }
        }

        let mut order = commit.order;
        if tables.orders.iter().any(|o| o.order_number == order.order_number) {
            return Err(OrderError::DuplicateOrderId(order.order_number));
        }

        let mut taken = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            if tables.take_stock(line.product_id, line.quantity).is_some() {
                taken.push((line.product_id, line.quantity));
                continue;
            }
            if commit.stock_policy == StockPolicy::Reject {
                for (product_id, quantity) in taken {
                    tables.return_stock(product_id, quantity);
                }
                return Err(OrderError::InsufficientStock {
                    product_id: line.product_id,
                    name: line.name.clone(),
                });
            }
            order.shortfalls.push(line.product_id);
        }
        if !order.shortfalls.is_empty() {
            order.status = OrderStatus::NeedsReview;
        }

        if let Some(release) = &commit.cart_release {
            if let Some(cart) = tables.carts.get_mut(&release.cart_id) {
                cart.release(&release.purchased);
                cart.version += 1;
                cart.updated_at = order.created_at;
            }
        }

        if let Some(snapshot) = commit.checkout_id.and_then(|id| tables.snapshots.get_mut(&id)) {
            snapshot.consumed = true;
        }

        if let Some(receipt) = commit.receipt {
            tables
                .receipts
                .insert(receipt.session_id, (receipt.event_id, order.order_number.clone()));
        }

        tables.orders.push(order.clone());
        Ok(CommitOutcome::Committed(order))
    }

    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>, StorageError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .find(|o| o.order_number == *number)
            .cloned())
    }

    async fn list_for_user(&self, user: &UserId) -> Result<Vec<Order>, StorageError> {
        Ok(self
            .lock()
            .orders
            .iter()
            .rev()
            .filter(|o| o.user_id == *user)
            .cloned()
            .collect())
    }

    async fn find_by_payment(&self, session_id: &str) -> Result<Option<OrderNumber>, StorageError> {
        Ok(self
            .lock()
            .receipts
            .get(session_id)
            .map(|(_, number)| number.clone()))
    }

    async fn cancel(
        &self,
        number: &OrderNumber,
        requester: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderError> {
        let mut tables = self.lock();
        let order = tables.order_mut(number).ok_or(OrderError::NotFound)?;
        if order.user_id != *requester {
            return Err(OrderError::Forbidden);
        }
        if !order.status.can_cancel() {
            return Err(OrderError::InvalidStateTransition { from: order.status });
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        let cancelled = order.clone();

        for line in cancelled.decremented_lines() {
            if tables.return_stock(line.product_id, line.quantity).is_none() {
                tracing::warn!(product_id = %line.product_id, "Cancelled line for deleted product");
            }
        }

        Ok(cancelled)
    }
}
