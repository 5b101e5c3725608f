//! Checkout session initiation.
//!
//! Validates the stored cart, freezes it into a [`CheckoutSnapshot`], and asks
//! the payment processor for a hosted checkout session. Nothing is reserved:
//! stock is only checked here and decremented at fulfillment.

use crate::cart::CartRepository;
use crate::inventory::InventoryLedger;
use crate::payment::{CheckoutSessionRequest, PaymentError, PaymentProcessor, SessionLineItem};
use crate::storage::StorageError;
use crate::types::{CheckoutId, CheckoutSnapshot, Product, ProductId, UserId};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use storefront_core::environment::Clock;
use thiserror::Error;

/// Name used for cart lines whose product was deleted
pub const DELETED_PRODUCT: &str = "Product no longer exists";

/// Checkout failures. Display strings are the user-facing messages.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// No stored cart or no lines
    #[error("Cart is empty")]
    EmptyCart,

    /// A product has fewer units than the cart asks for
    #[error("Insufficient stock for {0}")]
    InsufficientStock(String),

    /// Deleted or inactive products, by name
    #[error(
        "Some products in your cart are no longer available: {}. Please remove them from your cart.",
        .0.join(", ")
    )]
    InvalidCartContents(Vec<String>),

    /// The processor could not create the session
    #[error("Error creating checkout session")]
    Processor(#[source] PaymentError),

    /// Backend failure
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Snapshot persistence.
#[async_trait]
pub trait CheckoutRepository: Send + Sync {
    /// Stores a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn save_snapshot(&self, snapshot: &CheckoutSnapshot) -> Result<(), StorageError>;

    /// Loads a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn snapshot(&self, id: CheckoutId) -> Result<Option<CheckoutSnapshot>, StorageError>;

    /// Records the processor session id on a snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    async fn attach_session(&self, id: CheckoutId, session_id: &str) -> Result<(), StorageError>;
}

/// `POST /checkout/create-session` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Processor session id
    pub session_id: String,
    /// Hosted payment page
    pub url: Option<String>,
}

/// Creates checkout sessions.
#[derive(Clone)]
pub struct CheckoutService {
    carts: Arc<dyn CartRepository>,
    inventory: Arc<dyn InventoryLedger>,
    checkouts: Arc<dyn CheckoutRepository>,
    processor: Arc<dyn PaymentProcessor>,
    clock: Arc<dyn Clock>,
    frontend_url: String,
}

impl CheckoutService {
    /// Creates the service. `frontend_url` is the base of the redirect URLs.
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartRepository>,
        inventory: Arc<dyn InventoryLedger>,
        checkouts: Arc<dyn CheckoutRepository>,
        processor: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            carts,
            inventory,
            checkouts,
            processor,
            clock,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Validates the user's cart and opens a processor session for it.
    ///
    /// The processor is only called once every line is purchasable. The
    /// snapshot is stored before the call, so the checkout id can double as
    /// the processor idempotency key.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::EmptyCart`]
    /// - [`CheckoutError::InsufficientStock`] naming the first short product
    /// - [`CheckoutError::InvalidCartContents`] naming deleted/inactive products
    /// - [`CheckoutError::Processor`] when the processor fails
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn create_session(&self, user: &UserId) -> Result<CheckoutSession, CheckoutError> {
        let cart = self
            .carts
            .find_by_user(user)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or_else(|| {
                metrics::counter!("storefront.checkout.rejected", "reason" => "empty_cart")
                    .increment(1);
                CheckoutError::EmptyCart
            })?;

        let ids: Vec<ProductId> = cart.items().iter().map(|item| item.product_id).collect();
        let products: HashMap<ProductId, Product> = self
            .inventory
            .products(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut unavailable = Vec::new();
        for item in cart.items() {
            let Some(product) = products.get(&item.product_id) else {
                unavailable.push(DELETED_PRODUCT.to_string());
                continue;
            };
            if !product.is_active {
                unavailable.push(product.name.clone());
                continue;
            }
            if product.stock < item.quantity {
                metrics::counter!("storefront.checkout.rejected", "reason" => "insufficient_stock")
                    .increment(1);
                return Err(CheckoutError::InsufficientStock(product.name.clone()));
            }
        }

        if !unavailable.is_empty() {
            metrics::counter!("storefront.checkout.rejected", "reason" => "unavailable_products")
                .increment(1);
            tracing::info!(?unavailable, "Cart holds unavailable products");
            return Err(CheckoutError::InvalidCartContents(unavailable));
        }

        let snapshot = CheckoutSnapshot::freeze(
            CheckoutId::new(),
            &cart,
            |id| products.get(&id).map(|p| p.name.clone()).unwrap_or_default(),
            self.clock.now(),
        );
        self.checkouts.save_snapshot(&snapshot).await?;

        let line_items = cart
            .items()
            .iter()
            .filter_map(|item| {
                products.get(&item.product_id).map(|product| SessionLineItem {
                    name: product.name.clone(),
                    description: product.description.clone(),
                    images: product
                        .images
                        .iter()
                        .filter(|url| !url.is_empty())
                        .cloned()
                        .collect(),
                    unit_amount: item.price,
                    quantity: item.quantity,
                })
            })
            .collect();

        let request = CheckoutSessionRequest {
            line_items,
            success_url: format!(
                "{}/orders?session_id={{CHECKOUT_SESSION_ID}}",
                self.frontend_url
            ),
            cancel_url: format!("{}/?canceled=true", self.frontend_url),
            metadata: BTreeMap::from([
                ("userId".to_string(), user.to_string()),
                ("cartId".to_string(), cart.id.to_string()),
                ("checkoutId".to_string(), snapshot.id.to_string()),
            ]),
            idempotency_key: snapshot.id.to_string(),
        };

        let session = self
            .processor
            .create_checkout_session(request)
            .await
            .map_err(CheckoutError::Processor)?;

        self.checkouts.attach_session(snapshot.id, &session.id).await?;

        metrics::counter!("storefront.checkout.sessions_created").increment(1);
        tracing::info!(
            checkout_id = %snapshot.id,
            session_id = %session.id,
            total = %snapshot.total,
            "Checkout session created"
        );

        Ok(CheckoutSession {
            session_id: session.id,
            url: session.url,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::payment::MockPaymentProcessor;
    use crate::storage::InMemoryShop;
    use crate::types::{Cart, Money};
    use storefront_testing::test_clock;

    struct Fixture {
        shop: Arc<InMemoryShop>,
        processor: Arc<MockPaymentProcessor>,
        service: CheckoutService,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let shop = Arc::new(InMemoryShop::new());
        let processor = MockPaymentProcessor::shared();
        let service = CheckoutService::new(
            shop.clone(),
            shop.clone(),
            shop.clone(),
            processor.clone(),
            Arc::new(test_clock()),
            "https://shop.example/",
        );
        Fixture {
            shop,
            processor,
            service,
            user: UserId::new("u1"),
        }
    }

    fn product(name: &str, price: i64, stock: u32) -> Product {
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            description: format!("{name} description"),
            images: vec![String::new(), format!("https://img.example/{name}.png")],
            price: Money::from_cents(price),
            stock,
            category: "misc".to_string(),
            is_active: true,
        }
    }

    async fn cart_with(f: &Fixture, lines: &[(&Product, u32)]) -> Cart {
        let mut cart = Cart::new(f.user.clone(), test_clock().now());
        for (product, quantity) in lines {
            cart.add(product.id, *quantity, product.price);
        }
        f.shop.save(&cart).await.unwrap()
    }

    #[tokio::test]
    async fn empty_cart_never_reaches_the_processor() {
        let f = fixture();

        let err = f.service.create_session(&f.user).await.unwrap_err();
        assert_eq!(err.to_string(), "Cart is empty");

        cart_with(&f, &[]).await;
        let err = f.service.create_session(&f.user).await.unwrap_err();
        assert!(matches!(err, CheckoutError::EmptyCart));

        assert_eq!(f.processor.calls(), 0);
    }

    #[tokio::test]
    async fn unavailable_products_are_named() {
        let f = fixture();
        let mut lamp = product("Lamp", 3000, 5);
        lamp.is_active = false;
        let gone = product("Gone", 100, 5);
        let mug = product("Mug", 1000, 5);
        f.shop.insert_product(lamp.clone());
        f.shop.insert_product(mug.clone());
        cart_with(&f, &[(&lamp, 1), (&gone, 1), (&mug, 1)]).await;

        let err = f.service.create_session(&f.user).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            concat!(
                "Some products in your cart are no longer available: ",
                "Lamp, Product no longer exists. Please remove them from your cart."
            )
        );
        assert_eq!(f.processor.calls(), 0);
    }

    #[tokio::test]
    async fn short_stock_fails_immediately() {
        let f = fixture();
        let mug = product("Mug", 1000, 1);
        f.shop.insert_product(mug.clone());
        cart_with(&f, &[(&mug, 2)]).await;

        let err = f.service.create_session(&f.user).await.unwrap_err();

        assert_eq!(err.to_string(), "Insufficient stock for Mug");
        assert_eq!(f.processor.calls(), 0);
    }

    #[tokio::test]
    async fn creates_a_session_and_freezes_the_cart() {
        let f = fixture();
        let a = product("A", 1000, 5);
        let b = product("B", 500, 5);
        f.shop.insert_product(a.clone());
        f.shop.insert_product(b.clone());
        let cart = cart_with(&f, &[(&a, 2), (&b, 1)]).await;

        let session = f.service.create_session(&f.user).await.unwrap();

        assert_eq!(session.session_id, "cs_mock_1");
        let requests = f.processor.requests();
        let request = &requests[0];
        assert_eq!(
            request.success_url,
            "https://shop.example/orders?session_id={CHECKOUT_SESSION_ID}"
        );
        assert_eq!(request.cancel_url, "https://shop.example/?canceled=true");
        assert_eq!(request.metadata["userId"], "u1");
        assert_eq!(request.metadata["cartId"], cart.id.to_string());
        assert_eq!(request.line_items[0].unit_amount, Money::from_cents(1000));
        assert_eq!(request.line_items[0].images, vec!["https://img.example/A.png"]);

        let checkout_id = CheckoutId::parse(&request.metadata["checkoutId"]).unwrap();
        assert_eq!(request.idempotency_key, checkout_id.to_string());
        let snapshot = f.shop.snapshot(checkout_id).await.unwrap().unwrap();
        assert_eq!(snapshot.session_id.as_deref(), Some("cs_mock_1"));
        assert_eq!(snapshot.total, Money::from_cents(2500));
        assert_eq!(snapshot.lines.len(), 2);
        assert_eq!(snapshot.lines[0].name, "A");

        // Checkout never touches the cart or stock
        let stored = f.shop.find_by_user(&f.user).await.unwrap().unwrap();
        assert_eq!(stored, cart);
        assert_eq!(f.shop.product(a.id).await.unwrap().unwrap().stock, 5);
    }

    #[tokio::test]
    async fn processor_failure_is_reported() {
        let f = fixture();
        let mug = product("Mug", 1000, 5);
        f.shop.insert_product(mug.clone());
        cart_with(&f, &[(&mug, 1)]).await;
        f.processor
            .fail_with(Some(PaymentError::Transport("connection reset".to_string())));

        let err = f.service.create_session(&f.user).await.unwrap_err();

        assert!(matches!(err, CheckoutError::Processor(PaymentError::Transport(_))));
    }
}
