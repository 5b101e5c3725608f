//! Order store and direct order placement.
//!
//! [`OrderRepository::commit`] is the single atomic write behind every new
//! order. It claims the fulfillment receipt, inserts the order, decrements
//! stock, releases the purchased cart lines and consumes the checkout
//! snapshot, all or nothing.

use crate::inventory::InventoryLedger;
use crate::storage::StorageError;
use crate::types::{
    CartId, CheckoutId, Money, Order, OrderId, OrderLine, OrderNumber, OrderStatus, Product,
    ProductId, ShippingAddress, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storefront_core::environment::Clock;
use thiserror::Error;
use uuid::Uuid;

/// What a commit does with lines whose stock cannot be decremented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockPolicy {
    /// Record the shortfall and mark the order `needs_review` (paid orders)
    Review,
    /// Abort the whole commit (unpaid direct placement)
    Reject,
}

/// Durable idempotency record for a processor checkout session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FulfillmentReceipt {
    /// Processor checkout-session id
    pub session_id: String,
    /// Event that fulfilled the session
    pub event_id: String,
}

/// Purchased quantities to take out of the live cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartRelease {
    /// Cart to release from
    pub cart_id: CartId,
    /// Units bought per product
    pub purchased: Vec<(ProductId, u32)>,
}

/// Everything a single order commit writes.
#[derive(Clone, Debug)]
pub struct OrderCommit {
    /// Order to insert (status `pending`; may become `needs_review`)
    pub order: Order,
    /// Receipt to claim, for processor-paid orders
    pub receipt: Option<FulfillmentReceipt>,
    /// Shortfall handling
    pub stock_policy: StockPolicy,
    /// Cart lines to release
    pub cart_release: Option<CartRelease>,
    /// Snapshot to mark consumed
    pub checkout_id: Option<CheckoutId>,
}

/// Result of a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Everything was written
    Committed(Order),
    /// The session already has a receipt; nothing was written
    Duplicate {
        /// Order created by the first commit
        order_number: OrderNumber,
    },
}

/// Order failures. Display strings are the user-facing messages.
#[derive(Debug, Error)]
pub enum OrderError {
    /// No such order
    #[error("Order not found")]
    NotFound,

    /// The requester does not own the order
    #[error("Access denied")]
    Forbidden,

    /// Cancellation from a status that does not allow it
    #[error("Cannot cancel an order with status {from}")]
    InvalidStateTransition {
        /// Current status
        from: OrderStatus,
    },

    /// Stock below the ordered quantity (direct placement only)
    #[error("Insufficient stock for {name}")]
    InsufficientStock {
        /// Short product
        product_id: ProductId,
        /// Its name
        name: String,
    },

    /// Order number already taken
    #[error("Order {0} already exists")]
    DuplicateOrderId(OrderNumber),

    /// Malformed placement request
    #[error("{0}")]
    Validation(String),

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Atomically writes an order and its side effects.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InsufficientStock`] under [`StockPolicy::Reject`]
    /// - [`OrderError::DuplicateOrderId`] when the order number exists
    /// - [`OrderError::Storage`]; nothing is written
    async fn commit(&self, commit: OrderCommit) -> Result<CommitOutcome, OrderError>;

    /// Loads an order by number.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn get(&self, number: &OrderNumber) -> Result<Option<Order>, StorageError>;

    /// A user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn list_for_user(&self, user: &UserId) -> Result<Vec<Order>, StorageError>;

    /// Order number recorded in the receipt for a processor session.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn find_by_payment(&self, session_id: &str) -> Result<Option<OrderNumber>, StorageError>;

    /// Cancels an order and restocks its decremented lines.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`], [`OrderError::Forbidden`] or
    /// [`OrderError::InvalidStateTransition`].
    async fn cancel(
        &self,
        number: &OrderNumber,
        requester: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderError>;
}

/// Source of order numbers.
pub trait OrderNumberGenerator: Send + Sync {
    /// Next order number for an order created at `now`
    fn next(&self, now: DateTime<Utc>) -> OrderNumber;
}

/// `ORD-YYYYMMDD-<32 uppercase hex>` from a random UUID.
#[derive(Clone, Copy, Debug, Default)]
pub struct DatedOrderNumbers;

impl OrderNumberGenerator for DatedOrderNumbers {
    fn next(&self, now: DateTime<Utc>) -> OrderNumber {
        OrderNumber::new(format!(
            "ORD-{}-{}",
            now.format("%Y%m%d"),
            Uuid::new_v4().simple().to_string().to_uppercase()
        ))
    }
}

/// `ORD-YYYYMMDD-000001`, `...-000002`, ... for tests.
#[derive(Debug, Default)]
pub struct SequentialOrderNumbers {
    next: AtomicU64,
}

impl SequentialOrderNumbers {
    /// Counter starting at 1
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }
}

impl OrderNumberGenerator for SequentialOrderNumbers {
    fn next(&self, now: DateTime<Utc>) -> OrderNumber {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        OrderNumber::new(format!("ORD-{}-{n:06}", now.format("%Y%m%d")))
    }
}

// ============================================================================
// Placement request
// ============================================================================

/// One requested product.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    /// Product id
    pub product_id: Option<String>,
    /// Units (at least 1)
    pub quantity: Option<i64>,
}

/// Shipping address as submitted; every field is required.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    /// Street line
    pub street: Option<String>,
    /// City
    pub city: Option<String>,
    /// State or province
    pub state: Option<String>,
    /// Postal code
    pub zip_code: Option<String>,
    /// Country
    pub country: Option<String>,
}

impl AddressRequest {
    fn into_address(self) -> Option<ShippingAddress> {
        let address = ShippingAddress {
            street: self.street?,
            city: self.city?,
            state: self.state?,
            zip_code: self.zip_code?,
            country: self.country?,
        };
        address.is_complete().then_some(address)
    }
}

/// `POST /orders` body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    /// Products to buy
    pub products: Option<Vec<OrderItemRequest>>,
    /// Where to ship
    pub shipping_address: Option<AddressRequest>,
    /// Coupon code, stored verbatim
    pub coupon_applied: Option<String>,
}

/// Order operations for the HTTP layer.
#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    inventory: Arc<dyn InventoryLedger>,
    clock: Arc<dyn Clock>,
    numbers: Arc<dyn OrderNumberGenerator>,
}

impl OrderService {
    /// Creates the service
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        inventory: Arc<dyn InventoryLedger>,
        clock: Arc<dyn Clock>,
        numbers: Arc<dyn OrderNumberGenerator>,
    ) -> Self {
        Self {
            orders,
            inventory,
            clock,
            numbers,
        }
    }

    /// Places an order directly from the live catalog.
    ///
    /// Repeated products are merged. Stock is decremented in the same commit
    /// and any shortfall rejects the order.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Validation`]: empty product list, bad quantity,
    ///   unknown/inactive product, incomplete address
    /// - [`OrderError::InsufficientStock`]
    #[tracing::instrument(skip(self, request), fields(user_id = %user))]
    pub async fn place(
        &self,
        user: &UserId,
        request: PlaceOrderRequest,
    ) -> Result<Order, OrderError> {
        let invalid = |message: &str| OrderError::Validation(message.to_string());
        let items = request
            .products
            .filter(|items| !items.is_empty())
            .ok_or_else(|| invalid("Order must contain at least one product"))?;

        let mut wanted: Vec<(ProductId, u32)> = Vec::new();
        for item in items {
            let quantity = item
                .quantity
                .filter(|q| *q >= 1)
                .and_then(|q| u32::try_from(q).ok())
                .ok_or_else(|| OrderError::Validation("Invalid quantity".to_string()))?;
            let product_id = item
                .product_id
                .as_deref()
                .and_then(|id| ProductId::parse(id).ok())
                .ok_or_else(|| OrderError::Validation("Invalid product".to_string()))?;

            match wanted.iter_mut().find(|(id, _)| *id == product_id) {
                Some((_, q)) => *q = q.saturating_add(quantity),
                None => wanted.push((product_id, quantity)),
            }
        }

        let shipping_address = request
            .shipping_address
            .and_then(AddressRequest::into_address)
            .ok_or_else(|| invalid("Complete shipping address is required"))?;

        let ids: Vec<ProductId> = wanted.iter().map(|(id, _)| *id).collect();
        let catalog: HashMap<ProductId, Product> = self
            .inventory
            .products(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(wanted.len());
        let mut total = Money::ZERO;
        for (product_id, quantity) in &wanted {
            let product = catalog
                .get(product_id)
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    OrderError::Validation(format!("Product {product_id} not found or unavailable"))
                })?;
            total = product
                .price
                .checked_times(*quantity)
                .and_then(|subtotal| total.checked_add(subtotal))
                .ok_or_else(|| OrderError::Validation("Order total is too large".to_string()))?;
            lines.push(OrderLine::new(*product_id, product.name.clone(), product.price, *quantity));
        }

        let now = self.clock.now();
        let order = new_order(
            self.numbers.next(now),
            user.clone(),
            lines,
            shipping_address,
            request.coupon_applied,
            None,
            now,
        );

        let outcome = self
            .orders
            .commit(OrderCommit {
                order,
                receipt: None,
                stock_policy: StockPolicy::Reject,
                cart_release: None,
                checkout_id: None,
            })
            .await?;

        match outcome {
            CommitOutcome::Committed(order) => {
                metrics::counter!("storefront.orders.placed", "source" => "direct").increment(1);
                tracing::info!(
                    order_number = %order.order_number,
                    total = %order.total,
                    "Order placed"
                );
                Ok(order)
            },
            CommitOutcome::Duplicate { order_number } => {
                Err(OrderError::DuplicateOrderId(order_number))
            },
        }
    }

    /// The user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`OrderError::Storage`] on backend failure.
    pub async fn list(&self, user: &UserId) -> Result<Vec<Order>, OrderError> {
        Ok(self.orders.list_for_user(user).await?)
    }

    /// One order, visible to its owner only.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`] or [`OrderError::Forbidden`].
    pub async fn get(&self, user: &UserId, number: &OrderNumber) -> Result<Order, OrderError> {
        let order = self.orders.get(number).await?.ok_or(OrderError::NotFound)?;
        if order.user_id != *user {
            tracing::warn!(order_number = %number, user_id = %user, "Order read by non-owner");
            return Err(OrderError::Forbidden);
        }
        Ok(order)
    }

    /// Cancels a `pending`, `processing` or `needs_review` order.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`], [`OrderError::Forbidden`] or
    /// [`OrderError::InvalidStateTransition`].
    #[tracing::instrument(skip(self), fields(user_id = %user, order_number = %number))]
    pub async fn cancel(&self, user: &UserId, number: &OrderNumber) -> Result<Order, OrderError> {
        let order = self.orders.cancel(number, user, self.clock.now()).await?;
        metrics::counter!("storefront.orders.cancelled").increment(1);
        tracing::info!("Order cancelled");
        Ok(order)
    }
}

/// Builds a `pending` order; the total is the sum of line subtotals.
#[must_use]
pub fn new_order(
    order_number: OrderNumber,
    user_id: UserId,
    lines: Vec<OrderLine>,
    shipping_address: ShippingAddress,
    coupon_applied: Option<String>,
    payment_session_id: Option<String>,
    now: DateTime<Utc>,
) -> Order {
    let total: Money = lines.iter().map(|line| line.subtotal).sum();
    Order {
        id: OrderId::new(),
        order_number,
        user_id,
        lines,
        total,
        discount: Money::ZERO,
        coupon_applied,
        shipping_address,
        status: OrderStatus::Pending,
        payment_session_id,
        shortfalls: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
