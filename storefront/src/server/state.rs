//! Application state shared by all handlers.

use crate::auth::JwtKeys;
use crate::cart::{CartRepository, CartService};
use crate::checkout::{CheckoutRepository, CheckoutService};
use crate::config::Config;
use crate::fulfillment::{fulfillment_store, FulfillmentEnvironment, FulfillmentStore};
use crate::inventory::InventoryLedger;
use crate::orders::{OrderNumberGenerator, OrderRepository, OrderService};
use crate::payment::{PaymentProcessor, WebhookVerifier};
use crate::storage::HealthProbe;
use axum::extract::FromRef;
use std::sync::Arc;
use storefront_core::environment::Clock;

/// A storage backend implementing every repository.
pub trait ShopBackend:
    InventoryLedger
    + CartRepository
    + CheckoutRepository
    + OrderRepository
    + HealthProbe
    + 'static
{
}

impl<T> ShopBackend for T where
    T: InventoryLedger
        + CartRepository
        + CheckoutRepository
        + OrderRepository
        + HealthProbe
        + 'static
{
}

/// Application state, cloned (cheaply) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Cart operations
    pub carts: CartService,
    /// Checkout session creation
    pub checkout: CheckoutService,
    /// Order placement, reads, cancellation
    pub orders: OrderService,
    /// Webhook fulfillment
    pub fulfillment: Arc<FulfillmentStore>,
    /// Webhook signature verification
    pub webhooks: Arc<WebhookVerifier>,
    /// Bearer token keys
    pub keys: Arc<JwtKeys>,
    /// Storage liveness
    pub storage: Arc<dyn HealthProbe>,
}

impl AppState {
    /// Wires every service over one backend.
    #[must_use]
    pub fn new<B: ShopBackend>(
        backend: Arc<B>,
        processor: Arc<dyn PaymentProcessor>,
        clock: Arc<dyn Clock>,
        order_numbers: Arc<dyn OrderNumberGenerator>,
        config: &Config,
    ) -> Self {
        let carts = CartService::new(backend.clone(), backend.clone(), clock.clone());
        let checkout = CheckoutService::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            processor,
            clock.clone(),
            config.frontend_url.clone(),
        );
        let orders = OrderService::new(
            backend.clone(),
            backend.clone(),
            clock.clone(),
            order_numbers.clone(),
        );
        let fulfillment = fulfillment_store(FulfillmentEnvironment::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend.clone(),
            order_numbers,
            clock.clone(),
        ));
        let webhooks = WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            config.stripe.webhook_tolerance,
            clock,
        );

        Self {
            carts,
            checkout,
            orders,
            fulfillment: Arc::new(fulfillment),
            webhooks: Arc::new(webhooks),
            keys: Arc::new(JwtKeys::new(&config.auth.jwt_secret)),
            storage: backend,
        }
    }
}

impl FromRef<AppState> for Arc<JwtKeys> {
    fn from_ref(state: &AppState) -> Self {
        state.keys.clone()
    }
}
