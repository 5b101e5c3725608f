//! Processor webhook verification and parsing.
//!
//! # Signature scheme
//!
//! ```text
//! stripe-signature: t=1735689600,v1=5257a869...,v1=...
//! expected = hex(HMAC-SHA256(secret, "{t}.{raw body}"))
//! ```
//!
//! Any `v1` entry may match (secret rotation sends several). The comparison
//! is constant time and the timestamp must lie within the tolerance of the
//! injected clock.

use crate::types::{CartId, CheckoutId, Money, ShippingAddress, UserId, ADDRESS_FIELD_MISSING};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use storefront_core::environment::Clock;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default timestamp tolerance
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Webhook rejection reasons. All of them answer 400.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// No signature header
    #[error("No stripe-signature header value was provided")]
    MissingSignature,

    /// Header lacks a timestamp or a `v1` signature
    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,

    /// No `v1` entry matches
    #[error("No signatures found matching the expected signature for payload")]
    SignatureMismatch,

    /// Timestamp outside the tolerance window
    #[error("Timestamp outside the tolerance zone")]
    StaleTimestamp,

    /// Body is not a readable event
    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Verifies webhook signatures over the raw request body.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Creates a verifier for the endpoint secret
    #[must_use]
    pub fn new(secret: impl Into<String>, tolerance: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
            clock,
        }
    }

    /// Checks the signature header against the raw body.
    ///
    /// # Errors
    ///
    /// Returns the [`WebhookError`] describing why the delivery is not authentic.
    pub fn verify(&self, header: Option<&str>, payload: &[u8]) -> Result<(), WebhookError> {
        let header = header.ok_or(WebhookError::MissingSignature)?;

        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => {
                    if let Ok(bytes) = hex::decode(value) {
                        signatures.push(bytes);
                    }
                },
                _ => {},
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedHeader);
        }

        let mac = self.mac(timestamp, payload)?;
        if !signatures
            .iter()
            .any(|signature| mac.clone().verify_slice(signature).is_ok())
        {
            return Err(WebhookError::SignatureMismatch);
        }

        let age = self.clock.now().timestamp().abs_diff(timestamp);
        if age > self.tolerance.as_secs() {
            return Err(WebhookError::StaleTimestamp);
        }

        Ok(())
    }

    /// Builds a valid header value for `payload` signed at `timestamp`.
    ///
    /// Used by local tooling and tests to produce deliveries.
    #[must_use]
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        let signature = self
            .mac(timestamp, payload)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default();
        format!("t={timestamp},v1={signature}")
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::SignatureMismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

/// A paid checkout session, with its correlation metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Processor event id
    pub event_id: String,
    /// Processor checkout session id (the idempotency key)
    pub session_id: String,
    /// Buyer (`metadata.userId`)
    pub user_id: UserId,
    /// Cart checked out (`metadata.cartId`)
    pub cart_id: CartId,
    /// Frozen snapshot (`metadata.checkoutId`), absent for older sessions
    pub checkout_id: Option<CheckoutId>,
    /// Amount the processor charged
    pub amount_total: Option<Money>,
    /// Address collected on the payment page
    pub shipping_address: ShippingAddress,
}

/// What a verified delivery asks us to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Payment succeeded: fulfil the session
    PaymentConfirmed(PaymentConfirmation),

    /// Session completed but the money has not arrived yet
    AwaitingPayment {
        /// Processor event id
        event_id: String,
        /// Checkout session id
        session_id: String,
    },

    /// Payment event without usable `userId`/`cartId` metadata
    Uncorrelated {
        /// Processor event id
        event_id: String,
        /// Checkout session id
        session_id: String,
    },

    /// Any other event type
    Ignored {
        /// Processor event id
        event_id: String,
        /// Event type
        event_type: String,
    },
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    // Only checkout events are read past the type
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    #[serde(default)]
    object: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    payment_status: Option<String>,
    amount_total: Option<i64>,
    metadata: Option<HashMap<String, String>>,
    customer_details: Option<RawCustomer>,
}

#[derive(Deserialize)]
struct RawCustomer {
    address: Option<RawAddress>,
}

#[derive(Deserialize)]
struct RawAddress {
    line1: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

fn shipping_address(raw: Option<RawAddress>) -> ShippingAddress {
    let field = |value: Option<String>| {
        value
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| ADDRESS_FIELD_MISSING.to_string())
    };
    match raw {
        Some(a) => ShippingAddress {
            street: field(a.line1),
            city: field(a.city),
            state: field(a.state),
            zip_code: field(a.postal_code),
            country: field(a.country),
        },
        None => ShippingAddress::default(),
    }
}

/// Parses a verified body.
///
/// # Errors
///
/// Returns [`WebhookError::InvalidPayload`] when the body is not an event, or
/// when a checkout event does not carry a session.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, WebhookError> {
    let event: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    let paid_on_completion = match event.event_type.as_str() {
        "checkout.session.completed" => true,
        "checkout.session.async_payment_succeeded" => false,
        _ => {
            return Ok(WebhookEvent::Ignored {
                event_id: event.id,
                event_type: event.event_type,
            });
        },
    };

    let object = event.data.and_then(|data| data.object).ok_or_else(|| {
        WebhookError::InvalidPayload(format!("{} without data.object", event.event_type))
    })?;
    let session: RawSession = serde_json::from_value(object)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    if paid_on_completion
        && !matches!(
            session.payment_status.as_deref(),
            Some("paid" | "no_payment_required")
        )
    {
        return Ok(WebhookEvent::AwaitingPayment {
            event_id: event.id,
            session_id: session.id,
        });
    }

    let metadata = session.metadata.unwrap_or_default();
    let user_id = metadata.get("userId").filter(|v| !v.is_empty());
    let cart_id = metadata.get("cartId").and_then(|v| CartId::parse(v).ok());
    let (Some(user_id), Some(cart_id)) = (user_id, cart_id) else {
        return Ok(WebhookEvent::Uncorrelated {
            event_id: event.id,
            session_id: session.id,
        });
    };

    Ok(WebhookEvent::PaymentConfirmed(PaymentConfirmation {
        event_id: event.id,
        session_id: session.id,
        user_id: UserId::new(user_id.as_str()),
        cart_id,
        checkout_id: metadata
            .get("checkoutId")
            .and_then(|v| CheckoutId::parse(v).ok()),
        amount_total: session.amount_total.map(Money::from_cents),
        shipping_address: shipping_address(session.customer_details.and_then(|c| c.address)),
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use storefront_testing::{test_clock, FixedClock};

    const NOW: i64 = 1_735_689_600;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test", DEFAULT_TOLERANCE, Arc::new(test_clock()))
    }

    #[test]
    fn accepts_a_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = verifier().sign(body, NOW);
        assert_eq!(verifier().verify(Some(&header), body), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let body = b"{}";
        let good = verifier().sign(body, NOW);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t={NOW},v1={},v1={good_sig}", "00".repeat(32));
        assert_eq!(verifier().verify(Some(&header), body), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = verifier().sign(b"{\"amount\":1}", NOW);
        assert_eq!(
            verifier().verify(Some(&header), b"{\"amount\":2}"),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_other_secret() {
        let other = WebhookVerifier::new("whsec_other", DEFAULT_TOLERANCE, Arc::new(test_clock()));
        let header = other.sign(b"{}", NOW);
        assert_eq!(
            verifier().verify(Some(&header), b"{}"),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_missing_and_malformed_headers() {
        assert_eq!(verifier().verify(None, b"{}"), Err(WebhookError::MissingSignature));
        assert_eq!(
            verifier().verify(Some("garbage"), b"{}"),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verifier().verify(Some("t=abc,v1=00"), b"{}"),
            Err(WebhookError::MalformedHeader)
        );
        assert_eq!(
            verifier().verify(Some(&format!("t={NOW}")), b"{}"),
            Err(WebhookError::MalformedHeader)
        );
    }

    #[test]
    fn rejects_stale_timestamps() {
        let body = b"{}";
        let old = verifier().sign(body, NOW - 301);
        assert_eq!(verifier().verify(Some(&old), body), Err(WebhookError::StaleTimestamp));

        let recent = verifier().sign(body, NOW - 300);
        assert_eq!(verifier().verify(Some(&recent), body), Ok(()));

        let later = WebhookVerifier::new(
            "whsec_test",
            DEFAULT_TOLERANCE,
            Arc::new(FixedClock::at_unix(NOW + 3600)),
        );
        assert_eq!(later.verify(Some(&recent), body), Err(WebhookError::StaleTimestamp));
    }

    fn session_event(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn parses_a_paid_completion() {
        let cart_id = CartId::new();
        let checkout_id = CheckoutId::new();
        let body = session_event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "payment_status": "paid",
                "amount_total": 2500,
                "metadata": {
                    "userId": "u1",
                    "cartId": cart_id.to_string(),
                    "checkoutId": checkout_id.to_string()
                },
                "customer_details": {
                    "address": {
                        "line1": "1 Main St",
                        "city": "Springfield",
                        "state": null,
                        "postal_code": "12345",
                        "country": "US"
                    }
                }
            }),
        );

        let WebhookEvent::PaymentConfirmed(confirmation) = parse_event(&body).unwrap() else {
            panic!("expected a confirmation");
        };
        assert_eq!(confirmation.session_id, "cs_1");
        assert_eq!(confirmation.user_id, UserId::new("u1"));
        assert_eq!(confirmation.cart_id, cart_id);
        assert_eq!(confirmation.checkout_id, Some(checkout_id));
        assert_eq!(confirmation.amount_total, Some(Money::from_cents(2500)));
        assert_eq!(confirmation.shipping_address.street, "1 Main St");
        assert_eq!(confirmation.shipping_address.state, "N/A");
        assert_eq!(confirmation.shipping_address.zip_code, "12345");
    }

    #[test]
    fn unpaid_completion_waits_for_async_payment() {
        let body = session_event(
            "checkout.session.completed",
            json!({"id": "cs_1", "payment_status": "unpaid", "metadata": {}}),
        );
        assert!(matches!(
            parse_event(&body).unwrap(),
            WebhookEvent::AwaitingPayment { ref session_id, .. } if session_id == "cs_1"
        ));

        let body = session_event(
            "checkout.session.async_payment_succeeded",
            json!({
                "id": "cs_1",
                "payment_status": "paid",
                "metadata": {"userId": "u1", "cartId": CartId::new().to_string()}
            }),
        );
        assert!(matches!(parse_event(&body).unwrap(), WebhookEvent::PaymentConfirmed(_)));
    }

    #[test]
    fn missing_metadata_is_uncorrelated() {
        let body = session_event(
            "checkout.session.completed",
            json!({"id": "cs_1", "payment_status": "paid", "metadata": {"userId": "u1"}}),
        );
        assert!(matches!(parse_event(&body).unwrap(), WebhookEvent::Uncorrelated { .. }));
    }

    #[test]
    fn other_types_are_ignored() {
        let body = session_event("payment_intent.created", json!({"id": "pi_1"}));
        assert_eq!(
            parse_event(&body).unwrap(),
            WebhookEvent::Ignored {
                event_id: "evt_1".to_string(),
                event_type: "payment_intent.created".to_string()
            }
        );
    }

    #[test]
    fn unknown_types_need_no_data() {
        for body in [
            json!({"id": "evt_1", "type": "v2.core.event_destination.ping"}),
            json!({"id": "evt_1", "type": "v2.core.event_destination.ping", "data": {}}),
            json!({"id": "evt_1", "type": "v2.core.event_destination.ping", "data": null}),
        ] {
            let body = serde_json::to_vec(&body).unwrap();
            assert_eq!(
                parse_event(&body).unwrap(),
                WebhookEvent::Ignored {
                    event_id: "evt_1".to_string(),
                    event_type: "v2.core.event_destination.ping".to_string()
                }
            );
        }
    }

    #[test]
    fn checkout_events_require_a_session_object() {
        let body = serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {}
        }))
        .unwrap();
        assert!(matches!(parse_event(&body), Err(WebhookError::InvalidPayload(_))));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(parse_event(b"not json"), Err(WebhookError::InvalidPayload(_))));
        let body = session_event("checkout.session.completed", json!("nope"));
        assert!(matches!(parse_event(&body), Err(WebhookError::InvalidPayload(_))));
    }
}
