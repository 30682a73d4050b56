use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::{Cents, OrderId};

/// A request to return money to the customer.
///
/// The gateway must treat requests with the same `idempotency_key` as the same refund, so it is always safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub idempotency_key: String,
    pub order_id: OrderId,
    pub capture_reference: String,
    pub amount: Cents,
    pub currency: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    /// The gateway's own reference for the refund
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("The payment gateway did not respond in time")]
    Timeout,
    #[error("The payment gateway is unavailable. {0}")]
    Unavailable(String),
    #[error("The payment gateway rejected the request. {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Timeouts and outages are worth retrying; rejections are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

/// The external payment processor. Only refunds are initiated from the settlement engine; captures arrive as
/// notifications.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Clone {
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError>;
}
