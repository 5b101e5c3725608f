//! Cart store: one mutable cart per user.
//!
//! Carts are created lazily on first read or write and are never deleted,
//! only emptied. Writes are optimistic: the repository rejects a save whose
//! version is stale, and [`CartService`] replays the whole operation against
//! the fresh cart.

use crate::inventory::InventoryLedger;
use crate::storage::StorageError;
use crate::types::{Cart, CartId, CartItemId, Money, Product, ProductId, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::environment::Clock;
use storefront_runtime::retry::{retry_with_predicate, RetryPolicy};
use thiserror::Error;

/// Cart operation failures. Display strings are the user-facing messages.
#[derive(Debug, Error)]
pub enum CartError {
    /// Missing product id or quantity below 1
    #[error("Invalid product or quantity")]
    InvalidProductOrQuantity,

    /// Product missing or inactive
    #[error("Product not found or unavailable")]
    ProductUnavailable,

    /// Stock below the requested quantity
    #[error("Insufficient stock")]
    InsufficientStock,

    /// Negative or missing quantity on update
    #[error("Invalid quantity")]
    InvalidQuantity,

    /// No line with this id in the user's cart
    #[error("Item not found in cart")]
    ItemNotFound,

    /// The user has no stored cart
    #[error("Cart not found")]
    CartNotFound,

    /// Optimistic retries exhausted
    #[error("Cart was modified concurrently, please retry")]
    Conflict,

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CartError {
    fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_conflict())
    }
}

/// Cart persistence.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Loads the stored cart of a user, exactly as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn find_by_user(&self, user: &UserId) -> Result<Option<Cart>, StorageError>;

    /// Loads a cart by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn find(&self, id: CartId) -> Result<Option<Cart>, StorageError>;

    /// Writes a cart if the stored version still equals `cart.version`
    /// (a cart with version 0 must not exist yet). Returns the stored cart
    /// with its bumped version.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionConflict`] when the stored version moved.
    async fn save(&self, cart: &Cart) -> Result<Cart, StorageError>;

    /// Empties a user's cart unconditionally. `None` when the user has no cart.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn clear(&self, user: &UserId) -> Result<Option<Cart>, StorageError>;
}

/// `POST /cart/items` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    /// Product to add
    pub product_id: Option<String>,
    /// Units to add (at least 1)
    pub quantity: Option<i64>,
}

/// `PUT /cart/items/:id` body.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateItemRequest {
    /// New quantity; 0 removes the line
    pub quantity: Option<i64>,
}

/// One line of the formatted cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    /// Cart line id
    pub id: CartItemId,
    /// Product id
    pub product_id: ProductId,
    /// Populated product record
    pub product: Product,
    /// Units
    pub quantity: u32,
    /// Captured unit price
    pub price: Money,
}

/// Formatted cart returned by every cart endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    /// Cart id
    pub id: CartId,
    /// Owner
    pub user_id: UserId,
    /// Lines whose product still exists
    pub items: Vec<CartLineView>,
    /// Cart total
    pub total: Money,
}

impl CartView {
    fn new(cart: &Cart, products: &HashMap<ProductId, Product>) -> Self {
        let items = cart
            .items()
            .iter()
            .filter_map(|item| {
                products.get(&item.product_id).map(|product| CartLineView {
                    id: item.id,
                    product_id: item.product_id,
                    product: product.clone(),
                    quantity: item.quantity,
                    price: item.price,
                })
            })
            .collect();

        Self {
            id: cart.id,
            user_id: cart.user_id.clone(),
            items,
            total: cart.total(),
        }
    }
}

/// Cart operations for the HTTP layer.
#[derive(Clone)]
pub struct CartService {
    carts: Arc<dyn CartRepository>,
    inventory: Arc<dyn InventoryLedger>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl CartService {
    /// Creates a service that replays an operation up to 3 times after a
    /// lost optimistic write.
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        inventory: Arc<dyn InventoryLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            carts,
            inventory,
            clock,
            retry: RetryPolicy::new()
                .with_max_attempts(4)
                .with_initial_delay(Duration::from_millis(5))
                .with_max_delay(Duration::from_millis(50)),
        }
    }

    /// Replaces the conflict retry policy
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reads the user's cart, creating it if needed.
    ///
    /// Lines whose product no longer exists are dropped and the pruned cart
    /// is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::Storage`] on backend failure.
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn get(&self, user: &UserId) -> Result<CartView, CartError> {
        self.with_conflict_retry(|| self.try_get(user)).await
    }

    /// Adds units of a product, merging with an existing line.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidProductOrQuantity`]: missing product or quantity below 1
    /// - [`CartError::ProductUnavailable`]: product missing or inactive
    /// - [`CartError::InsufficientStock`]: stock below the (merged) quantity
    #[tracing::instrument(skip(self, request), fields(user_id = %user))]
    pub async fn add_item(
        &self,
        user: &UserId,
        request: AddItemRequest,
    ) -> Result<CartView, CartError> {
        let (Some(product_id), Some(quantity)) = (request.product_id, request.quantity) else {
            return Err(CartError::InvalidProductOrQuantity);
        };
        if quantity < 1 {
            return Err(CartError::InvalidProductOrQuantity);
        }
        let quantity = u32::try_from(quantity).map_err(|_| CartError::InsufficientStock)?;
        let product_id = ProductId::parse(&product_id).map_err(|_| CartError::ProductUnavailable)?;

        let view = self
            .with_conflict_retry(|| self.try_add(user, product_id, quantity))
            .await?;
        metrics::counter!("storefront.cart.mutations", "op" => "add").increment(1);
        Ok(view)
    }

    /// Sets a line's quantity; 0 removes the line.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`]: missing or negative quantity
    /// - [`CartError::CartNotFound`] / [`CartError::ItemNotFound`]
    /// - [`CartError::InsufficientStock`]: product gone or stock below quantity
    #[tracing::instrument(skip(self, request), fields(user_id = %user))]
    pub async fn update_item(
        &self,
        user: &UserId,
        item_id: CartItemId,
        request: UpdateItemRequest,
    ) -> Result<CartView, CartError> {
        let quantity = match request.quantity {
            Some(q) if q >= 0 => u32::try_from(q).map_err(|_| CartError::InsufficientStock)?,
            _ => return Err(CartError::InvalidQuantity),
        };

        let view = self
            .with_conflict_retry(|| self.try_update(user, item_id, quantity))
            .await?;
        metrics::counter!("storefront.cart.mutations", "op" => "update").increment(1);
        Ok(view)
    }

    /// Removes a line.
    ///
    /// # Errors
    ///
    /// [`CartError::CartNotFound`] or [`CartError::ItemNotFound`].
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn remove_item(
        &self,
        user: &UserId,
        item_id: CartItemId,
    ) -> Result<CartView, CartError> {
        let view = self
            .with_conflict_retry(|| self.try_remove(user, item_id))
            .await?;
        metrics::counter!("storefront.cart.mutations", "op" => "remove").increment(1);
        Ok(view)
    }

    /// Empties the cart.
    ///
    /// # Errors
    ///
    /// [`CartError::CartNotFound`] when the user never had a cart.
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn clear(&self, user: &UserId) -> Result<(), CartError> {
        self.carts
            .clear(user)
            .await?
            .ok_or(CartError::CartNotFound)?;
        metrics::counter!("storefront.cart.mutations", "op" => "clear").increment(1);
        Ok(())
    }

    async fn try_get(&self, user: &UserId) -> Result<CartView, CartError> {
        let cart = match self.carts.find_by_user(user).await? {
            Some(cart) => cart,
            None => self.carts.save(&Cart::new(user.clone(), self.clock.now())).await?,
        };

        let products = self.catalog(&cart).await?;
        let mut pruned = cart.clone();
        let dropped = pruned.retain(|item| products.contains_key(&item.product_id));

        let cart = if dropped > 0 {
            tracing::info!(cart_id = %cart.id, dropped, "Pruning lines for deleted products");
            pruned.updated_at = self.clock.now();
            self.carts.save(&pruned).await?
        } else {
            cart
        };

        Ok(CartView::new(&cart, &products))
    }

    async fn try_add(
        &self,
        user: &UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<CartView, CartError> {
        let product = self
            .inventory
            .product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or(CartError::ProductUnavailable)?;

        if product.stock < quantity {
            return Err(CartError::InsufficientStock);
        }

        let mut cart = match self.carts.find_by_user(user).await? {
            Some(cart) => cart,
            None => Cart::new(user.clone(), self.clock.now()),
        };

        let merged = cart
            .item_for_product(product_id)
            .map_or(quantity, |item| item.quantity.saturating_add(quantity));
        if product.stock < merged {
            return Err(CartError::InsufficientStock);
        }

        cart.add(product_id, quantity, product.price);
        cart.updated_at = self.clock.now();
        let saved = self.carts.save(&cart).await?;
        self.view(&saved).await
    }

    async fn try_update(
        &self,
        user: &UserId,
        item_id: CartItemId,
        quantity: u32,
    ) -> Result<CartView, CartError> {
        let mut cart = self
            .carts
            .find_by_user(user)
            .await?
            .ok_or(CartError::CartNotFound)?;
        let item = cart.item(item_id).ok_or(CartError::ItemNotFound)?;

        if quantity > 0 {
            let in_stock = self
                .inventory
                .product(item.product_id)
                .await?
                .is_some_and(|product| product.stock >= quantity);
            if !in_stock {
                return Err(CartError::InsufficientStock);
            }
        }

        cart.set_quantity(item_id, quantity);
        cart.updated_at = self.clock.now();
        let saved = self.carts.save(&cart).await?;
        self.view(&saved).await
    }

    async fn try_remove(&self, user: &UserId, item_id: CartItemId) -> Result<CartView, CartError> {
        let mut cart = self
            .carts
            .find_by_user(user)
            .await?
            .ok_or(CartError::CartNotFound)?;

        if !cart.remove(item_id) {
            return Err(CartError::ItemNotFound);
        }

        cart.updated_at = self.clock.now();
        let saved = self.carts.save(&cart).await?;
        self.view(&saved).await
    }

    async fn view(&self, cart: &Cart) -> Result<CartView, CartError> {
        let products = self.catalog(cart).await?;
        Ok(CartView::new(cart, &products))
    }

    async fn catalog(&self, cart: &Cart) -> Result<HashMap<ProductId, Product>, StorageError> {
        let ids: Vec<ProductId> = cart.items().iter().map(|item| item.product_id).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let products = self.inventory.products(&ids).await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }

    async fn with_conflict_retry<T, F, Fut>(&self, operation: F) -> Result<T, CartError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CartError>>,
    {
        retry_with_predicate(&self.retry, operation, CartError::is_version_conflict)
            .await
            .map_err(|err| {
                if err.is_version_conflict() {
                    metrics::counter!("storefront.cart.conflicts_exhausted").increment(1);
                    CartError::Conflict
                } else {
                    err
                }
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::InMemoryShop;
    use storefront_testing::test_clock;

    fn product(name: &str, price: i64, stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            description: String::new(),
            images: vec![],
            price: Money::from_cents(price),
            stock,
            category: "misc".to_string(),
            is_active: true,
        }
    }

    fn setup() -> (Arc<InMemoryShop>, CartService) {
        let shop = Arc::new(InMemoryShop::new());
        let service = CartService::new(shop.clone(), shop.clone(), Arc::new(test_clock()));
        (shop, service)
    }

    fn add(product: &Product, quantity: i64) -> AddItemRequest {
        AddItemRequest {
            product_id: Some(product.id.to_string()),
            quantity: Some(quantity),
        }
    }

    #[tokio::test]
    async fn get_creates_an_empty_cart_once() {
        let (shop, service) = setup();
        let user = UserId::new("u1");

        let first = service.get(&user).await.unwrap();
        let second = service.get(&user).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.items.is_empty());
        assert_eq!(first.total, Money::ZERO);
        assert!(shop.find_by_user(&user).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn add_merges_lines_and_checks_merged_stock() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mug = product("Mug", 1000, 3);
        shop.insert_product(mug.clone());

        service.add_item(&user, add(&mug, 2)).await.unwrap();
        let err = service.add_item(&user, add(&mug, 2)).await.unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock));

        let view = service.add_item(&user, add(&mug, 1)).await.unwrap();
        assert_eq!(view.items.len(), 1);
        assert_eq!(view.items[0].quantity, 3);
        assert_eq!(view.total, Money::from_cents(3000));
    }

    #[tokio::test]
    async fn add_validates_input_and_product() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mut hidden = product("Hidden", 100, 10);
        hidden.is_active = false;
        shop.insert_product(hidden.clone());

        let err = service.add_item(&user, add(&hidden, 0)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid product or quantity");

        let missing = AddItemRequest {
            product_id: None,
            quantity: Some(1),
        };
        assert!(matches!(
            service.add_item(&user, missing).await,
            Err(CartError::InvalidProductOrQuantity)
        ));

        let err = service.add_item(&user, add(&hidden, 1)).await.unwrap_err();
        assert_eq!(err.to_string(), "Product not found or unavailable");
    }

    #[tokio::test]
    async fn update_and_remove_lines() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mug = product("Mug", 1000, 5);
        let pen = product("Pen", 250, 5);
        shop.insert_product(mug.clone());
        shop.insert_product(pen.clone());

        service.add_item(&user, add(&mug, 1)).await.unwrap();
        let view = service.add_item(&user, add(&pen, 2)).await.unwrap();
        let mug_line = view.items[0].id;
        let pen_line = view.items[1].id;

        let view = service
            .update_item(&user, mug_line, UpdateItemRequest { quantity: Some(4) })
            .await
            .unwrap();
        assert_eq!(view.total, Money::from_cents(4500));

        let err = service
            .update_item(&user, mug_line, UpdateItemRequest { quantity: Some(6) })
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::InsufficientStock));

        let err = service
            .update_item(&user, mug_line, UpdateItemRequest { quantity: Some(-1) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid quantity");

        let view = service
            .update_item(&user, pen_line, UpdateItemRequest { quantity: Some(0) })
            .await
            .unwrap();
        assert_eq!(view.items.len(), 1);

        let view = service.remove_item(&user, mug_line).await.unwrap();
        assert!(view.items.is_empty());
        assert_eq!(view.total, Money::ZERO);

        let err = service.remove_item(&user, mug_line).await.unwrap_err();
        assert_eq!(err.to_string(), "Item not found in cart");
    }

    #[tokio::test]
    async fn update_without_cart_is_not_found() {
        let (_shop, service) = setup();
        let err = service
            .update_item(
                &UserId::new("nobody"),
                CartItemId::new(),
                UpdateItemRequest { quantity: Some(1) },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::CartNotFound));
    }

    #[tokio::test]
    async fn get_prunes_deleted_products_and_persists() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mug = product("Mug", 1000, 5);
        let pen = product("Pen", 250, 5);
        shop.insert_product(mug.clone());
        shop.insert_product(pen.clone());
        service.add_item(&user, add(&mug, 1)).await.unwrap();
        service.add_item(&user, add(&pen, 2)).await.unwrap();

        shop.delete_product(pen.id);
        let view = service.get(&user).await.unwrap();

        assert_eq!(view.items.len(), 1);
        assert_eq!(view.total, Money::from_cents(1000));
        let stored = shop.find_by_user(&user).await.unwrap().unwrap();
        assert_eq!(stored.items().len(), 1);
        assert_eq!(stored.total(), Money::from_cents(1000));
    }

    #[tokio::test]
    async fn clear_empties_and_requires_a_cart() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mug = product("Mug", 1000, 5);
        shop.insert_product(mug.clone());

        assert!(matches!(
            service.clear(&user).await,
            Err(CartError::CartNotFound)
        ));

        service.add_item(&user, add(&mug, 2)).await.unwrap();
        service.clear(&user).await.unwrap();

        let stored = shop.find_by_user(&user).await.unwrap().unwrap();
        assert!(stored.is_empty());
        assert_eq!(stored.total(), Money::ZERO);
    }

    #[tokio::test]
    async fn concurrent_adds_are_all_applied() {
        let (shop, service) = setup();
        let user = UserId::new("u1");
        let mug = product("Mug", 100, 100);
        shop.insert_product(mug.clone());
        service.get(&user).await.unwrap();

        let service = service.with_retry_policy(
            RetryPolicy::new()
                .with_max_attempts(50)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let user = user.clone();
                let request = add(&mug, 1);
                tokio::spawn(async move { service.add_item(&user, request).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let view = service.get(&user).await.unwrap();
        assert_eq!(view.items[0].quantity, 8);
        assert_eq!(view.total, Money::from_cents(800));
    }
}
