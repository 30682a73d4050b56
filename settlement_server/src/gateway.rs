//! A [`PaymentGateway`] that talks to the processor's REST API.
//!
//! Refunds are `POST {SETTLE_GATEWAY_URL}/refunds` with the [`RefundRequest`] as the JSON body. The request's
//! idempotency key is sent in the `Idempotency-Key` header, so a retried refund is never paid out twice.
use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
    StatusCode,
};
use serde::Deserialize;
use settlement_engine::traits::{GatewayError, PaymentGateway, RefundReceipt, RefundRequest};

use crate::{config::GatewayConfig, errors::ServerError};

#[derive(Clone)]
pub struct HttpPaymentGateway {
    base_url: String,
    client: Arc<Client>,
}

#[derive(Deserialize)]
struct RefundResponse {
    #[serde(alias = "id")]
    reference: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServerError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !config.api_key.is_empty() {
            let val = HeaderValue::from_str(&format!("Bearer {}", config.api_key.reveal()))
                .map_err(|e| ServerError::ConfigurationError(format!("Invalid gateway API key. {e}")))?;
            headers.insert(AUTHORIZATION, val);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServerError::InitializeError(e.to_string()))?;
        Ok(Self { base_url: config.url.trim_end_matches('/').to_string(), client: Arc::new(client) })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl PaymentGateway for HttpPaymentGateway {
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError> {
        if self.base_url.is_empty() {
            return Err(GatewayError::Unavailable("No payment gateway URL is configured".into()));
        }
        let url = self.url("/refunds");
        debug!("💸 Requesting refund {} of {} for order {}", request.idempotency_key, request.amount, request.order_id);
        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", request.idempotency_key.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Unavailable(e.to_string())
                }
            })?;
        let status = response.status();
        if status.is_success() {
            let body = response.json::<RefundResponse>().await.map_err(|e| {
                GatewayError::Unavailable(format!("Could not read the refund confirmation. {e}"))
            })?;
            trace!("💸 Refund {} confirmed as {}", request.idempotency_key, body.reference);
            return Ok(RefundReceipt { reference: body.reference });
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_failure(status, message))
    }
}

/// Server-side failures, rate limiting and in-flight idempotent requests may clear up on a retry. Any other client
/// error is final.
fn classify_failure(status: StatusCode, message: String) -> GatewayError {
    let message = format!("{status}: {message}");
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GatewayError::Timeout
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::CONFLICT {
        GatewayError::Unavailable(message)
    } else {
        GatewayError::Rejected(message)
    }
}
