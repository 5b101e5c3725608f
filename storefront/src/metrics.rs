//! Business metrics for the storefront.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `storefront.checkout.sessions_created` - Checkout sessions opened at the processor
//! - `storefront.checkout.rejected{reason}` - Checkouts refused before reaching the processor
//! - `storefront.cart.mutations{op}` - Cart writes by operation
//! - `storefront.cart.conflicts_exhausted` - Cart writes that lost every optimistic retry
//! - `storefront.orders.placed{source}` - Orders committed (`direct` or `webhook`)
//! - `storefront.orders.cancelled` - Orders cancelled by their owner
//! - `storefront.fulfillment.outcomes{outcome}` - Webhook fulfillment results
//! - `storefront.fulfillment.webhooks_rejected` - Deliveries failing verification
//! - `storefront.stripe.errors` - Failed processor calls
//!
//! ## Histograms
//! - `storefront.fulfillment.duration_seconds` - Webhook receipt to answer
//! - `storefront.stripe.request_duration_seconds` - Processor API latency

use crate::fulfillment::FulfillmentAction;
use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

/// Registers metric descriptions. Call once at startup.
pub fn register_business_metrics() {
    describe_counter!(
        "storefront.checkout.sessions_created",
        "Checkout sessions created at the payment processor"
    );
    describe_counter!(
        "storefront.checkout.rejected",
        "Checkouts rejected before reaching the processor, by reason"
    );
    describe_counter!("storefront.cart.mutations", "Cart writes by operation");
    describe_counter!(
        "storefront.cart.conflicts_exhausted",
        "Cart writes that lost every optimistic retry"
    );
    describe_counter!("storefront.orders.placed", "Orders committed, by source");
    describe_counter!("storefront.orders.cancelled", "Orders cancelled");
    describe_counter!(
        "storefront.fulfillment.outcomes",
        "Fulfillment results (fulfilled, duplicate, in_progress, nothing, review, errored, timeout)"
    );
    describe_counter!(
        "storefront.fulfillment.webhooks_rejected",
        "Webhook deliveries failing signature or payload checks"
    );
    describe_histogram!(
        "storefront.fulfillment.duration_seconds",
        "Time from webhook receipt to answer"
    );
    describe_histogram!(
        "storefront.stripe.request_duration_seconds",
        "Payment processor API latency"
    );
    describe_counter!("storefront.stripe.errors", "Failed payment processor calls");

    tracing::info!("Business metrics registered");
}

/// Label for a fulfillment result action
#[must_use]
pub const fn outcome_label(action: &FulfillmentAction) -> &'static str {
    match action {
        FulfillmentAction::Fulfilled { .. } => "fulfilled",
        FulfillmentAction::AlreadyFulfilled { .. } => "duplicate",
        FulfillmentAction::InProgress { .. } => "in_progress",
        FulfillmentAction::NothingToFulfill { .. } => "nothing",
        FulfillmentAction::ManualReviewRequired { .. } => "review",
        FulfillmentAction::FulfillmentErrored { .. } | FulfillmentAction::ConfirmPayment { .. } => {
            "errored"
        },
    }
}

/// Records a webhook fulfillment outcome.
pub fn record_fulfillment(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("storefront.fulfillment.outcomes", "outcome" => outcome).increment(1);
    metrics::histogram!("storefront.fulfillment.duration_seconds").record(elapsed.as_secs_f64());
    if matches!(outcome, "fulfilled" | "review") {
        metrics::counter!("storefront.orders.placed", "source" => "webhook").increment(1);
    }
}

/// Records a delivery that failed verification.
pub fn record_webhook_rejected() {
    metrics::counter!("storefront.fulfillment.webhooks_rejected").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn outcome_labels() {
        let delivery = Uuid::new_v4();
        let fulfilled = FulfillmentAction::Fulfilled {
            delivery,
            session_id: "cs_1".to_string(),
            order_number: crate::types::OrderNumber::new("ORD-1"),
        };
        assert_eq!(outcome_label(&fulfilled), "fulfilled");

        let busy = FulfillmentAction::InProgress {
            delivery,
            session_id: "cs_1".to_string(),
        };
        assert_eq!(outcome_label(&busy), "in_progress");
    }
}
