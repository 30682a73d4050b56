//! Bounded retries for optimistic-concurrency conflicts and payment gateway calls.
use std::future::Future;

use log::*;

use crate::{
    escrow::GatewayRetryPolicy,
    traits::{GatewayError, PaymentGateway, RefundReceipt, RefundRequest, SettlementError},
};

/// Runs `op` until it succeeds, fails with anything other than [`SettlementError::ConcurrentModification`], or has
/// been attempted `attempts` times. `op` must re-read whatever state it depends on each time it is called.
pub async fn with_conflict_retry<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, SettlementError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SettlementError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(SettlementError::ConcurrentModification(order_id)) if attempt < attempts => {
                debug!("💸 Lost a race on order {order_id} (attempt {attempt}/{attempts}). Retrying.");
                attempt += 1;
            },
            result => return result,
        }
    }
}

/// Asks the gateway for a refund, retrying timeouts and outages with exponential backoff. Every attempt carries the
/// same idempotency key, so the customer is refunded at most once however many attempts are made.
pub async fn refund_with_retry<G: PaymentGateway>(
    gateway: &G,
    request: &RefundRequest,
    policy: &GatewayRetryPolicy,
) -> Result<RefundReceipt, SettlementError> {
    let key = request.idempotency_key.clone();
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.backoff;
    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(policy.timeout, gateway.refund(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        };
        match result {
            Ok(receipt) => {
                debug!("💸 Refund {key} of {} confirmed as {}", request.amount, receipt.reference);
                return Ok(receipt);
            },
            Err(e) if !e.is_retryable() => {
                warn!("💸 Refund {key} was rejected: {e}");
                return Err(SettlementError::GatewayRejected { key, reason: e.to_string() });
            },
            Err(e) => {
                warn!("💸 Refund {key} attempt {attempt}/{attempts} failed: {e}");
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            },
        }
    }
    error!("💸 Refund {key} could not be confirmed after {attempts} attempts");
    Err(SettlementError::GatewayTimeout(key))
}
