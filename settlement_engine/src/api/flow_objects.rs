use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{
        Allocation,
        Cents,
        EscrowTransaction,
        EventSource,
        IdempotencyKey,
        NewShipment,
        Order,
        OrderId,
        SellerId,
    },
    validation::ValidationErrors,
};

/// The payment gateway's notice that money was captured for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureNotification {
    pub order_id: OrderId,
    pub capture_reference: String,
    pub amount: Cents,
    pub currency: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

impl CaptureNotification {
    pub fn new(order_id: OrderId, capture_reference: &str, amount: Cents, currency: &str) -> Self {
        Self {
            order_id,
            capture_reference: capture_reference.to_string(),
            amount,
            currency: currency.to_string(),
            captured_at: None,
        }
    }

    pub fn validate(&self, settlement_currency: &str) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.order_id.as_str().trim().is_empty(), "order_id", "is required");
        errors.check(self.capture_reference.trim().is_empty(), "capture_reference", "is required");
        errors.check(!self.amount.is_positive(), "amount", "must be positive");
        errors.check(
            !self.currency.eq_ignore_ascii_case(settlement_currency),
            "currency",
            format!("only {settlement_currency} is supported"),
        );
        errors.into_result(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOutcome {
    pub escrow: EscrowTransaction,
    pub allocations: Vec<Allocation>,
    /// True if this capture had been processed before and nothing was changed
    pub replayed: bool,
}

/// A carrier's confirmation that a seller's part of an order shipped, or was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentConfirmation {
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub tracking_number: String,
    #[serde(default)]
    pub carrier: Option<String>,
    pub shipped_at: DateTime<Utc>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub destination_postal_code: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
}

impl ShipmentConfirmation {
    pub fn shipped<S: Into<SellerId>>(order_id: OrderId, seller_id: S, tracking_number: &str, at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            seller_id: seller_id.into(),
            tracking_number: tracking_number.to_string(),
            carrier: None,
            shipped_at: at,
            delivered: false,
            delivered_at: None,
            destination_postal_code: None,
            origin_country: None,
        }
    }

    pub fn delivered_at(mut self, at: DateTime<Utc>) -> Self {
        self.delivered = true;
        self.delivered_at = Some(at);
        self
    }

    pub fn with_carrier(mut self, carrier: &str) -> Self {
        self.carrier = Some(carrier.to_string());
        self
    }

    /// When delivery happened, if this is a delivery confirmation.
    pub fn delivery_time(&self) -> Option<DateTime<Utc>> {
        self.delivered.then(|| self.delivered_at.unwrap_or(self.shipped_at))
    }

    /// A carrier sends each tracking milestone at most once, so tracking number and milestone identify the event.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        let milestone = if self.delivered { "delivered" } else { "shipped" };
        IdempotencyKey::new(EventSource::CarrierShipment, format!("{}:{milestone}", self.tracking_number.trim()))
    }

    pub fn to_shipment(&self, allocation_id: i64) -> NewShipment {
        NewShipment {
            allocation_id,
            tracking_number: self.tracking_number.trim().to_string(),
            carrier: self.carrier.clone(),
            shipped_at: self.shipped_at,
            delivered_at: self.delivery_time(),
            destination_postal_code: self.destination_postal_code.clone(),
            origin_country: self.origin_country.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.order_id.as_str().trim().is_empty(), "order_id", "is required");
        errors.check(self.seller_id.as_str().trim().is_empty(), "seller_id", "is required");
        errors.check(self.tracking_number.trim().is_empty(), "tracking_number", "is required");
        errors.check(
            self.delivered_at.map_or(false, |d| d < self.shipped_at),
            "delivered_at",
            "must not be before shipped_at",
        );
        errors.into_result(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationOutcome {
    pub order: Order,
    /// The allocations refunded by this cancellation. Empty if nothing had been captured.
    pub refunded: Vec<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenDisputeRequest {
    pub allocation_id: i64,
    pub reason: String,
    pub opened_by: String,
}

impl OpenDisputeRequest {
    pub fn new(allocation_id: i64, reason: &str, opened_by: &str) -> Self {
        Self { allocation_id, reason: reason.to_string(), opened_by: opened_by.to_string() }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.reason.trim().is_empty(), "reason", "is required");
        errors.check(self.opened_by.trim().is_empty(), "opened_by", "is required");
        errors.into_result(())
    }
}
