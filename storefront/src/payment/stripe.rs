//! Stripe Checkout client.

use super::{CheckoutSessionRequest, CreatedSession, PaymentError, PaymentProcessor, CURRENCY};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use storefront_runtime::retry::{retry_with_predicate, RetryPolicy};

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Stripe API client
///
/// Built once at startup; cloning shares the connection pool.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeClient {
    /// Create a client against `api_base` with a 10 s request timeout
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Transport`] if the HTTP client cannot be built.
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy for transient failures
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn post_session(
        &self,
        request: &CheckoutSessionRequest,
    ) -> Result<CreatedSession, PaymentError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form_params(request))
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let session = response
                    .json::<SessionResponse>()
                    .await
                    .map_err(|e| PaymentError::InvalidResponse(e.to_string()))?;
                Ok(CreatedSession {
                    id: session.id,
                    url: session.url,
                })
            },
            status => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorEnvelope>(&body)
                    .ok()
                    .and_then(|e| e.error.message)
                    .unwrap_or(body);
                Err(PaymentError::Api {
                    status: status.as_u16(),
                    message,
                })
            },
        }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[tracing::instrument(skip(self, request), fields(idempotency_key = %request.idempotency_key))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CreatedSession, PaymentError> {
        let start = std::time::Instant::now();
        let result = retry_with_predicate(
            &self.retry,
            || self.post_session(&request),
            PaymentError::is_transient,
        )
        .await;

        metrics::histogram!("storefront.stripe.request_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(session) => tracing::info!(session_id = %session.id, "Checkout session created"),
            Err(error) => {
                metrics::counter!("storefront.stripe.errors").increment(1);
                tracing::error!(%error, "Checkout session creation failed");
            },
        }
        result
    }
}

/// Stripe's bracketed form encoding of a session request
fn form_params(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    for (i, item) in request.line_items.iter().enumerate() {
        let price = format!("line_items[{i}][price_data]");
        params.push((format!("{price}[currency]"), CURRENCY.to_string()));
        params.push((format!("{price}[unit_amount]"), item.unit_amount.cents().to_string()));
        params.push((format!("{price}[product_data][name]"), item.name.clone()));
        if !item.description.is_empty() {
            params.push((
                format!("{price}[product_data][description]"),
                item.description.clone(),
            ));
        }
        for (j, image) in item.images.iter().enumerate() {
            params.push((format!("{price}[product_data][images][{j}]"), image.clone()));
        }
        params.push((format!("line_items[{i}][quantity]"), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        params.push((format!("metadata[{key}]"), value.clone()));
    }

    params
}
