//! Actions for the fulfillment reducer.

use crate::payment::PaymentConfirmation;
use crate::types::OrderNumber;
use uuid::Uuid;

/// Fulfillment commands and their results.
///
/// Every variant carries the `delivery` id of the webhook request that
/// caused it, so the handler waiting on the store can pick out its own
/// answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentAction {
    /// A verified, correlated payment confirmation arrived.
    ConfirmPayment {
        /// Webhook request id
        delivery: Uuid,
        /// The paid session
        confirmation: PaymentConfirmation,
    },

    /// An order was committed.
    Fulfilled {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
        /// New order
        order_number: OrderNumber,
    },

    /// The session was already fulfilled (in memory or by receipt).
    AlreadyFulfilled {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
        /// Order of the first fulfillment, when there is one
        order_number: Option<OrderNumber>,
    },

    /// Another delivery for this session is being fulfilled right now.
    InProgress {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
    },

    /// Nothing could be fulfilled (no cart, no resolvable products).
    NothingToFulfill {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
        /// Why
        reason: String,
    },

    /// The order was committed with stock shortfalls and needs review.
    ManualReviewRequired {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
        /// Order in `needs_review`
        order_number: OrderNumber,
    },

    /// A store failure rolled the attempt back.
    FulfillmentErrored {
        /// Webhook request id
        delivery: Uuid,
        /// Checkout session id
        session_id: String,
        /// Error description
        error: String,
    },
}

impl FulfillmentAction {
    /// Webhook request this action belongs to
    #[must_use]
    pub const fn delivery(&self) -> Uuid {
        match self {
            Self::ConfirmPayment { delivery, .. }
            | Self::Fulfilled { delivery, .. }
            | Self::AlreadyFulfilled { delivery, .. }
            | Self::InProgress { delivery, .. }
            | Self::NothingToFulfill { delivery, .. }
            | Self::ManualReviewRequired { delivery, .. }
            | Self::FulfillmentErrored { delivery, .. } => *delivery,
        }
    }

    /// Checkout session this action is about
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::ConfirmPayment { confirmation, .. } => &confirmation.session_id,
            Self::Fulfilled { session_id, .. }
            | Self::AlreadyFulfilled { session_id, .. }
            | Self::InProgress { session_id, .. }
            | Self::NothingToFulfill { session_id, .. }
            | Self::ManualReviewRequired { session_id, .. }
            | Self::FulfillmentErrored { session_id, .. } => session_id,
        }
    }

    /// True for every variant except the command
    #[must_use]
    pub const fn is_result(&self) -> bool {
        !matches!(self, Self::ConfirmPayment { .. })
    }

    /// True when this result answers `delivery`
    #[must_use]
    pub fn answers(&self, delivery: Uuid) -> bool {
        self.is_result() && self.delivery() == delivery
    }
}
