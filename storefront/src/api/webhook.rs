//! `POST /api/v1/checkout/webhook`
//!
//! Unauthenticated; trust comes from the signature over the raw body.
//!
//! | Outcome | Status |
//! |---|---|
//! | bad signature or payload | 400 |
//! | ignored, awaiting payment, uncorrelated | 200 |
//! | fulfilled, duplicate, nothing to fulfil, needs review | 200 |
//! | same session being fulfilled by another delivery | 409 |
//! | store failure, timeout | 500 |
//!
//! Every 4xx/5xx makes the processor retry later; the durable receipt makes
//! that retry safe.

use crate::fulfillment::FulfillmentAction;
use crate::metrics::{outcome_label, record_fulfillment, record_webhook_rejected};
use crate::payment::webhook::{parse_event, SIGNATURE_HEADER};
use crate::payment::WebhookEvent;
use crate::server::AppState;
use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use std::time::{Duration, Instant};
use storefront_runtime::StoreError;
use storefront_web::{AppError, WebResult};
use uuid::Uuid;

/// How long a delivery waits for its fulfillment result
pub const FULFILLMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// `{"received": true}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    /// Always true
    pub received: bool,
}

const fn ack() -> Json<WebhookAck> {
    Json(WebhookAck { received: true })
}

/// Verifies, parses, and fulfils one processor delivery.
#[tracing::instrument(skip_all, fields(delivery = tracing::field::Empty))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebResult<Json<WebhookAck>> {
    let started = Instant::now();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let event = state
        .webhooks
        .verify(signature, &body)
        .and_then(|()| parse_event(&body))
        .map_err(|error| {
            tracing::warn!(%error, "Webhook rejected");
            record_webhook_rejected();
            AppError::from(error)
        })?;

    let confirmation = match event {
        WebhookEvent::PaymentConfirmed(confirmation) => confirmation,
        WebhookEvent::AwaitingPayment {
            event_id,
            session_id,
        } => {
            tracing::info!(%event_id, %session_id, "Checkout completed, payment not yet received");
            return Ok(ack());
        },
        WebhookEvent::Uncorrelated {
            event_id,
            session_id,
        } => {
            tracing::warn!(
                %event_id,
                %session_id,
                "Payment without userId/cartId metadata, acknowledged"
            );
            return Ok(ack());
        },
        WebhookEvent::Ignored {
            event_id,
            event_type,
        } => {
            tracing::info!(%event_id, %event_type, "Unhandled event type");
            return Ok(ack());
        },
    };

    let delivery = Uuid::new_v4();
    tracing::Span::current().record("delivery", tracing::field::display(delivery));
    let session_id = confirmation.session_id.clone();

    let answer = state
        .fulfillment
        .send_and_wait_for(
            FulfillmentAction::ConfirmPayment {
                delivery,
                confirmation,
            },
            move |action| action.answers(delivery),
            FULFILLMENT_TIMEOUT,
        )
        .await;

    let answer = match answer {
        Ok(answer) => answer,
        Err(StoreError::Timeout) => {
            record_fulfillment("timeout", started.elapsed());
            return Err(AppError::internal("Error processing payment")
                .with_source(anyhow::anyhow!("fulfillment of {session_id} timed out")));
        },
        Err(error) => {
            record_fulfillment("errored", started.elapsed());
            return Err(AppError::internal("Error processing payment").with_source(error));
        },
    };

    record_fulfillment(outcome_label(&answer), started.elapsed());
    match answer {
        FulfillmentAction::InProgress { .. } => Err(AppError::conflict(
            "Payment for this session is already being processed",
        )),
        FulfillmentAction::FulfillmentErrored { error, .. } => {
            Err(AppError::internal("Error processing payment").with_source(anyhow::anyhow!(error)))
        },
        _ => Ok(ack()),
    }
}
