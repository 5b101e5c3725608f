//! Payment processor integration.
//!
//! - [`PaymentProcessor`]: the injected client that creates hosted checkout
//!   sessions ([`stripe::StripeClient`] in production)
//! - [`webhook`]: signature verification and parsing of processor events

use crate::types::Money;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub mod stripe;
pub mod webhook;

pub use stripe::StripeClient;
pub use webhook::{PaymentConfirmation, WebhookError, WebhookEvent, WebhookVerifier};

/// Currency of every line item
pub const CURRENCY: &str = "usd";

/// One purchasable line on the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    /// Product name
    pub name: String,
    /// Product description
    pub description: String,
    /// Non-empty image URLs
    pub images: Vec<String>,
    /// Unit price in cents
    pub unit_amount: Money,
    /// Units
    pub quantity: u32,
}

/// Everything needed to open a checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    /// Lines to charge
    pub line_items: Vec<SessionLineItem>,
    /// Where the processor sends the buyer after paying
    pub success_url: String,
    /// Where the processor sends the buyer after cancelling
    pub cancel_url: String,
    /// Correlation metadata echoed back in webhook events
    pub metadata: BTreeMap<String, String>,
    /// Makes retried creations return the same session
    pub idempotency_key: String,
}

/// Session created by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    /// Processor session id (the fulfillment correlation key)
    pub id: String,
    /// Hosted payment page
    pub url: Option<String>,
}

/// Processor failures.
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    /// Network failure or timeout
    #[error("payment processor unreachable: {0}")]
    Transport(String),

    /// Processor answered with an error status
    #[error("payment processor returned {status}: {message}")]
    Api {
        /// HTTP status
        status: u16,
        /// Processor error message
        message: String,
    },

    /// Processor answered with something we cannot read
    #[error("malformed payment processor response: {0}")]
    InvalidResponse(String),
}

impl PaymentError {
    /// Failures worth retrying: network errors, rate limiting, and 5xx
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Payment processor trait
///
/// Abstraction over hosted-checkout processors. Built once at startup and
/// shared as `Arc<dyn PaymentProcessor>`.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a hosted checkout session
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] when the processor cannot create the session.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedSession, PaymentError>;
}

/// Mock payment processor for development and tests
///
/// Records every request and answers with `cs_mock_<n>` sessions, or with a
/// configured failure.
#[derive(Debug, Default)]
pub struct MockPaymentProcessor {
    requests: Mutex<Vec<CheckoutSessionRequest>>,
    failure: Mutex<Option<PaymentError>>,
}

impl MockPaymentProcessor {
    /// Creates a new mock processor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Makes every following call fail with `error` (`None` restores success)
    pub fn fail_with(&self, error: Option<PaymentError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of requests received so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedSession, PaymentError> {
        let n = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|_| PaymentError::Transport("mock poisoned".to_string()))?;
            requests.push(request);
            requests.len()
        };

        if let Some(error) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }

        let id = format!("cs_mock_{n}");
        tracing::info!(session_id = %id, "Mock checkout session created");
        Ok(CreatedSession {
            url: Some(format!("https://checkout.example/pay/{id}")),
            id,
        })
    }
}
