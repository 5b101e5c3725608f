//! Dependencies of the fulfillment reducer.

use crate::cart::CartRepository;
use crate::checkout::CheckoutRepository;
use crate::inventory::InventoryLedger;
use crate::orders::{OrderNumberGenerator, OrderRepository};
use std::sync::Arc;
use storefront_core::environment::Clock;

/// Injected repositories for fulfillment.
///
/// Cloned into every fulfillment effect; all fields are shared handles.
#[derive(Clone)]
pub struct FulfillmentEnvironment {
    pub(crate) orders: Arc<dyn OrderRepository>,
    pub(crate) carts: Arc<dyn CartRepository>,
    pub(crate) checkouts: Arc<dyn CheckoutRepository>,
    pub(crate) inventory: Arc<dyn InventoryLedger>,
    pub(crate) order_numbers: Arc<dyn OrderNumberGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl FulfillmentEnvironment {
    /// Create a new environment.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        carts: Arc<dyn CartRepository>,
        checkouts: Arc<dyn CheckoutRepository>,
        inventory: Arc<dyn InventoryLedger>,
        order_numbers: Arc<dyn OrderNumberGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            carts,
            checkouts,
            inventory,
            order_numbers,
            clock,
        }
    }

    /// Clock for timestamps.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}
