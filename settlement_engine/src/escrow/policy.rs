use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use settlement_common::DEFAULT_CURRENCY_CODE;

use crate::{db_types::Cents, escrow::RemainderPolicy};

/// How refunds are pushed through the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRetryPolicy {
    pub max_attempts: u32,
    /// How long to wait for each attempt
    pub timeout: StdDuration,
    /// Delay before the first retry. Doubles on each further retry.
    pub backoff: StdDuration,
}

impl Default for GatewayRetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, timeout: StdDuration::from_secs(10), backoff: StdDuration::from_millis(250) }
    }
}

/// The tunables of the escrow flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowPolicy {
    /// The single settlement currency
    pub currency: String,
    /// How long funds stay held after shipment (or delivery) before they can be released
    pub hold_period: Duration,
    pub remainder_policy: RemainderPolicy,
    /// How far seller shares may drift from the subtotal, and the capture from the total, before a capture is rejected
    pub mismatch_tolerance: Cents,
    /// How many times an operation is re-planned after losing an optimistic concurrency race
    pub conflict_retries: u32,
    pub sweep_batch_size: i64,
    pub gateway: GatewayRetryPolicy,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            hold_period: Duration::days(7),
            remainder_policy: RemainderPolicy::default(),
            mismatch_tolerance: Cents::from(1),
            conflict_retries: 3,
            sweep_batch_size: 50,
            gateway: GatewayRetryPolicy::default(),
        }
    }
}

impl EscrowPolicy {
    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = currency.to_string();
        self
    }

    pub fn with_hold_period(mut self, hold_period: Duration) -> Self {
        self.hold_period = hold_period;
        self
    }

    pub fn with_remainder_policy(mut self, policy: RemainderPolicy) -> Self {
        self.remainder_policy = policy;
        self
    }

    pub fn with_mismatch_tolerance(mut self, tolerance: Cents) -> Self {
        self.mismatch_tolerance = tolerance;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub fn with_sweep_batch_size(mut self, size: i64) -> Self {
        self.sweep_batch_size = size;
        self
    }

    pub fn with_gateway_retries(mut self, gateway: GatewayRetryPolicy) -> Self {
        self.gateway = gateway;
        self
    }
}
