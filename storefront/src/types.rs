//! Core domain types for the storefront.
//!
//! Money is always an integer amount of minor units (cents). Carts keep their
//! total private and recompute it on every mutation, so `total == Σ(price ×
//! quantity)` holds for every cart value that exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use uuid::Uuid;

/// Authenticated user identity (the `userId` token claim).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId` from a string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses the hyphenated UUID form
            ///
            /// # Errors
            ///
            /// Returns an error when `s` is not a UUID.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a product
    ProductId
);
uuid_id!(
    /// Unique identifier for a cart
    CartId
);
uuid_id!(
    /// Unique identifier for a cart line
    CartItemId
);
uuid_id!(
    /// Unique identifier for a checkout snapshot (also the processor idempotency key)
    CheckoutId
);
uuid_id!(
    /// Internal order identifier
    OrderId
);

/// Human-meaningful order number, e.g. `ORD-20250101-<32 hex>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Creates an order number from a string
    #[must_use]
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in cents (to avoid floating point issues)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero cents
    pub const ZERO: Self = Self(0);

    /// Creates a new money amount from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Creates a new money amount from dollars (converted to cents)
    #[must_use]
    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    /// Returns the value in cents
    #[must_use]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Price of `quantity` units at this unit price, saturating at the bounds
    #[must_use]
    pub const fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as i64))
    }

    /// Price of `quantity` units, or `None` on overflow
    #[must_use]
    pub const fn checked_times(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as i64) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Sum of two amounts, or `None` on overflow
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Catalog product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Description shown on the payment page
    pub description: String,
    /// Image URLs (may contain empty entries)
    pub images: Vec<String>,
    /// Unit price in cents
    pub price: Money,
    /// Units in stock
    pub stock: u32,
    /// Category name
    pub category: String,
    /// Whether the product can be sold
    pub is_active: bool,
}

/// One line of a cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Cart line identifier
    pub id: CartItemId,
    /// Product in this line
    pub product_id: ProductId,
    /// Units (always at least 1)
    pub quantity: u32,
    /// Unit price captured when the line was created
    pub price: Money,
}

impl CartItem {
    /// Line total
    #[must_use]
    pub const fn subtotal(&self) -> Money {
        self.price.times(self.quantity)
    }
}

/// A user's cart.
///
/// Items and total are private: every mutation goes through a method that
/// recomputes the total.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cart {
    /// Cart identifier
    pub id: CartId,
    /// Owner (one cart per user)
    pub user_id: UserId,
    items: Vec<CartItem>,
    total: Money,
    /// Optimistic concurrency version (bumped by every save)
    pub version: u64,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Creates an empty, never-saved cart
    #[must_use]
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: CartId::new(),
            user_id,
            items: Vec::new(),
            total: Money::ZERO,
            version: 0,
            updated_at: now,
        }
    }

    /// Rebuilds a cart from stored parts, recomputing the total
    #[must_use]
    pub fn from_parts(
        id: CartId,
        user_id: UserId,
        items: Vec<CartItem>,
        version: u64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut cart = Self {
            id,
            user_id,
            items,
            total: Money::ZERO,
            version,
            updated_at,
        };
        cart.recompute_total();
        cart
    }

    /// Cart lines in insertion order
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// Σ(price × quantity)
    #[must_use]
    pub const fn total(&self) -> Money {
        self.total
    }

    /// True when the cart has no lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Looks up a line by id
    #[must_use]
    pub fn item(&self, id: CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Looks up the line holding a product
    #[must_use]
    pub fn item_for_product(&self, product_id: ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Adds units of a product.
    ///
    /// Merges into the existing line (keeping its captured price) or appends
    /// a new line at `price`. Returns the line id. A zero quantity is a no-op.
    pub fn add(
        &mut self,
        product_id: ProductId,
        quantity: u32,
        price: Money,
    ) -> Option<CartItemId> {
        if quantity == 0 {
            return None;
        }

        let id = if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            item.quantity = item.quantity.saturating_add(quantity);
            item.id
        } else {
            let id = CartItemId::new();
            self.items.push(CartItem {
                id,
                product_id,
                quantity,
                price,
            });
            id
        };

        self.recompute_total();
        Some(id)
    }

    /// Sets a line's quantity; zero removes the line.
    ///
    /// Returns false when the line does not exist.
    pub fn set_quantity(&mut self, item_id: CartItemId, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove(item_id);
        }

        let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) else {
            return false;
        };
        item.quantity = quantity;
        self.recompute_total();
        true
    }

    /// Removes a line. Returns false when the line does not exist.
    pub fn remove(&mut self, item_id: CartItemId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.id != item_id);
        let removed = self.items.len() != before;
        if removed {
            self.recompute_total();
        }
        removed
    }

    /// Keeps only the lines matching `keep`. Returns how many were dropped.
    pub fn retain(&mut self, keep: impl FnMut(&CartItem) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(keep);
        let dropped = before - self.items.len();
        if dropped > 0 {
            self.recompute_total();
        }
        dropped
    }

    /// Subtracts purchased quantities, dropping lines that reach zero.
    ///
    /// Lines added after the purchase (or extra units) survive.
    pub fn release(&mut self, purchased: &[(ProductId, u32)]) {
        for (product_id, quantity) in purchased {
            if let Some(item) = self.items.iter_mut().find(|i| i.product_id == *product_id) {
                item.quantity = item.quantity.saturating_sub(*quantity);
            }
        }
        self.items.retain(|i| i.quantity > 0);
        self.recompute_total();
    }

    /// Empties the cart
    pub fn clear(&mut self) {
        self.items.clear();
        self.recompute_total();
    }

    fn recompute_total(&mut self) {
        self.total = self.items.iter().map(CartItem::subtotal).sum();
    }
}

/// One frozen line of a checkout snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine {
    /// Product purchased
    pub product_id: ProductId,
    /// Product name at checkout time
    pub name: String,
    /// Unit price captured in the cart
    pub unit_price: Money,
    /// Units purchased
    pub quantity: u32,
}

/// Immutable copy of a cart taken when a checkout session is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSnapshot {
    /// Checkout identifier
    pub id: CheckoutId,
    /// Buyer
    pub user_id: UserId,
    /// Cart the snapshot was taken from
    pub cart_id: CartId,
    /// Cart version at snapshot time
    pub cart_version: u64,
    /// Frozen lines
    pub lines: Vec<CheckoutLine>,
    /// Σ line totals
    pub total: Money,
    /// Processor session id, once the processor answered
    pub session_id: Option<String>,
    /// Set when an order was committed from this snapshot
    pub consumed: bool,
    /// Snapshot time
    pub created_at: DateTime<Utc>,
}

impl CheckoutSnapshot {
    /// Freezes a cart, naming each line with the given product names
    #[must_use]
    pub fn freeze(
        id: CheckoutId,
        cart: &Cart,
        names: impl Fn(ProductId) -> String,
        now: DateTime<Utc>,
    ) -> Self {
        let lines = cart
            .items()
            .iter()
            .map(|item| CheckoutLine {
                product_id: item.product_id,
                name: names(item.product_id),
                unit_price: item.price,
                quantity: item.quantity,
            })
            .collect();

        Self {
            id,
            user_id: cart.user_id.clone(),
            cart_id: cart.id,
            cart_version: cart.version,
            lines,
            total: cart.total(),
            session_id: None,
            consumed: false,
            created_at: now,
        }
    }
}

/// Order line: a snapshot of the product at purchase time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Product purchased
    pub product_id: ProductId,
    /// Product name at purchase time
    pub name: String,
    /// Unit price in cents
    pub price: Money,
    /// Units purchased
    pub quantity: u32,
    /// `price × quantity`
    pub subtotal: Money,
}

impl OrderLine {
    /// Creates a line, computing its subtotal
    #[must_use]
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        price: Money,
        quantity: u32,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            price,
            quantity,
            subtotal: price.times(quantity),
        }
    }
}

/// Default for shipping fields the processor did not report
pub const ADDRESS_FIELD_MISSING: &str = "N/A";

/// Shipping address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    /// Street line
    pub street: String,
    /// City
    pub city: String,
    /// State or province
    pub state: String,
    /// Postal code
    pub zip_code: String,
    /// Country
    pub country: String,
}

impl ShippingAddress {
    /// True when no field is blank
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [
            &self.street,
            &self.city,
            &self.state,
            &self.zip_code,
            &self.country,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

impl Default for ShippingAddress {
    fn default() -> Self {
        Self {
            street: ADDRESS_FIELD_MISSING.to_string(),
            city: ADDRESS_FIELD_MISSING.to_string(),
            state: ADDRESS_FIELD_MISSING.to_string(),
            zip_code: ADDRESS_FIELD_MISSING.to_string(),
            country: ADDRESS_FIELD_MISSING.to_string(),
        }
    }
}

/// Status of an order in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Paid, waiting to be processed
    Pending,
    /// Being prepared
    Processing,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Cancelled before shipping
    Cancelled,
    /// Stock could not be fully decremented; needs manual reconciliation
    NeedsReview,
}

impl OrderStatus {
    /// Whether a cancellation is allowed from this status
    #[must_use]
    pub const fn can_cancel(self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::NeedsReview)
    }

    /// Wire / storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::NeedsReview => "needs_review",
        }
    }

    /// Parses the wire / storage name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "shipped" => Self::Shipped,
            "delivered" => Self::Delivered,
            "cancelled" => Self::Cancelled,
            "needs_review" => Self::NeedsReview,
            _ => return None,
        })
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A placed order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Internal identifier
    pub id: OrderId,
    /// Human-meaningful number (the public id)
    #[serde(rename = "orderId")]
    pub order_number: OrderNumber,
    /// Buyer
    pub user_id: UserId,
    /// Immutable lines (never empty)
    #[serde(rename = "products")]
    pub lines: Vec<OrderLine>,
    /// Σ subtotals
    #[serde(rename = "totalPrice")]
    pub total: Money,
    /// Reserved, always zero
    #[serde(rename = "totalDiscount")]
    pub discount: Money,
    /// Coupon code, stored verbatim
    pub coupon_applied: Option<String>,
    /// Where to ship
    pub shipping_address: ShippingAddress,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Processor checkout session that paid for this order
    pub payment_session_id: Option<String>,
    /// Products whose stock could not be decremented
    pub shortfalls: Vec<ProductId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Lines whose stock was actually decremented
    pub fn decremented_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines
            .iter()
            .filter(|line| !self.shortfalls.contains(&line.product_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap()
    }

    fn expected_total(cart: &Cart) -> Money {
        Money::from_cents(
            cart.items()
                .iter()
                .map(|i| i.price.cents() * i64::from(i.quantity))
                .sum(),
        )
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(2500).to_string(), "$25.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-150).to_string(), "-$1.50");
    }

    #[test]
    fn money_arithmetic_never_wraps() {
        let huge = Money::from_cents(i64::MAX / 2);
        assert_eq!(huge.times(u32::MAX), Money::from_cents(i64::MAX));
        assert_eq!(huge + huge + huge, Money::from_cents(i64::MAX));
        assert_eq!(huge.checked_times(3), None);
        assert_eq!(huge.checked_add(huge), Some(Money::from_cents(i64::MAX - 1)));
        assert_eq!(Money::from_cents(1000).checked_times(3), Some(Money::from_cents(3000)));
    }

    #[test]
    fn add_merges_and_keeps_captured_price() {
        let product = ProductId::new();
        let mut cart = Cart::new(UserId::new("u1"), now());

        let first = cart.add(product, 1, Money::from_cents(1000)).unwrap();
        let second = cart.add(product, 2, Money::from_cents(1500)).unwrap();

        assert_eq!(first, second);
        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 3);
        assert_eq!(cart.total(), Money::from_cents(3000));
    }

    #[test]
    fn set_quantity_zero_removes() {
        let mut cart = Cart::new(UserId::new("u1"), now());
        let id = cart.add(ProductId::new(), 2, Money::from_cents(100)).unwrap();

        assert!(cart.set_quantity(id, 0));
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::ZERO);
        assert!(!cart.set_quantity(id, 1));
    }

    #[test]
    fn release_keeps_later_additions() {
        let a = ProductId::new();
        let b = ProductId::new();
        let mut cart = Cart::new(UserId::new("u1"), now());
        cart.add(a, 3, Money::from_cents(1000));
        cart.add(b, 1, Money::from_cents(500));

        cart.release(&[(a, 2), (b, 1)]);

        assert_eq!(cart.items().len(), 1);
        assert_eq!(cart.items()[0].quantity, 1);
        assert_eq!(cart.total(), Money::from_cents(1000));
    }

    #[test]
    fn from_parts_recomputes_total() {
        let items = vec![CartItem {
            id: CartItemId::new(),
            product_id: ProductId::new(),
            quantity: 4,
            price: Money::from_cents(250),
        }];
        let cart = Cart::from_parts(CartId::new(), UserId::new("u1"), items, 3, now());
        assert_eq!(cart.total(), Money::from_cents(1000));
        assert_eq!(cart.version, 3);
    }

    #[test]
    fn cancellable_statuses() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Processing.can_cancel());
        assert!(OrderStatus::NeedsReview.can_cancel());
        assert!(!OrderStatus::Shipped.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn status_names_round_trip_through_serde() {
        let json = serde_json::to_string(&OrderStatus::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
        assert_eq!(OrderStatus::parse("needs_review"), Some(OrderStatus::NeedsReview));
        assert_eq!(OrderStatus::parse("lost"), None);
    }

    #[test]
    fn order_uses_public_wire_names() {
        let order = Order {
            id: OrderId::new(),
            order_number: OrderNumber::new("ORD-20250101-ABC"),
            user_id: UserId::new("u1"),
            lines: vec![OrderLine::new(ProductId::new(), "Mug", Money::from_cents(1000), 2)],
            total: Money::from_cents(2000),
            discount: Money::ZERO,
            coupon_applied: None,
            shipping_address: ShippingAddress::default(),
            status: OrderStatus::Pending,
            payment_session_id: Some("cs_1".to_string()),
            shortfalls: Vec::new(),
            created_at: now(),
            updated_at: now(),
        };

        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["orderId"], "ORD-20250101-ABC");
        assert_eq!(value["totalPrice"], 2000);
        assert_eq!(value["products"][0]["subtotal"], 2000);
        assert_eq!(value["shippingAddress"]["zipCode"], "N/A");
        assert_eq!(value["status"], "pending");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, u32, i64),
        Set(usize, u32),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 1..20u32, 0..100_000i64).prop_map(|(p, q, c)| Op::Add(p, q, c)),
            (0..8usize, 0..20u32).prop_map(|(i, q)| Op::Set(i, q)),
            (0..8usize).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn total_is_always_sum_of_lines(ops in prop::collection::vec(op(), 0..40)) {
            let products: Vec<ProductId> = (0..4).map(|_| ProductId::new()).collect();
            let mut cart = Cart::new(UserId::new("u1"), now());

            for op in ops {
                match op {
                    Op::Add(p, q, c) => {
                        cart.add(products[p], q, Money::from_cents(c));
                    },
                    Op::Set(i, q) => {
                        if let Some(id) = cart.items().get(i).map(|item| item.id) {
                            cart.set_quantity(id, q);
                        }
                    },
                    Op::Remove(i) => {
                        if let Some(id) = cart.items().get(i).map(|item| item.id) {
                            cart.remove(id);
                        }
                    },
                }
                prop_assert_eq!(cart.total(), expected_total(&cart));
                prop_assert!(cart.items().iter().all(|i| i.quantity >= 1));
            }
        }
    }
}
