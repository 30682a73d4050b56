//! Stand-ins for the external collaborators, for use in tests.
use std::sync::{Arc, Mutex};

use crate::{
    api::totals_objects::{CartItem, ShippingOption, TaxQuote},
    db_types::{Cents, Rate, ShippingAddress},
    traits::{
        GatewayError,
        PaymentGateway,
        RefundReceipt,
        RefundRequest,
        SettlementError,
        ShippingQuoteSource,
        TaxRateSource,
    },
};

/// A payment gateway that approves every refund and remembers what it was asked to do.
///
/// Requests with an idempotency key it has already seen are acknowledged without being recorded again, the way a
/// real gateway would treat a retry.
#[derive(Debug, Clone, Default)]
pub struct RecordingGateway {
    refunds: Arc<Mutex<Vec<RefundRequest>>>,
    failure: Arc<Mutex<Option<GatewayError>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent refund fails with `error` until [`Self::recover`] is called.
    pub fn fail_with(&self, error: GatewayError) {
        *self.failure.lock().expect("gateway lock poisoned") = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().expect("gateway lock poisoned") = None;
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.refunds.lock().expect("gateway lock poisoned").clone()
    }

    pub fn refunded_total(&self) -> Cents {
        self.refunds().iter().map(|r| r.amount).sum()
    }
}

impl PaymentGateway for RecordingGateway {
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError> {
        if let Some(e) = self.failure.lock().expect("gateway lock poisoned").clone() {
            return Err(e);
        }
        let mut refunds = self.refunds.lock().expect("gateway lock poisoned");
        if !refunds.iter().any(|r| r.idempotency_key == request.idempotency_key) {
            refunds.push(request.clone());
        }
        Ok(RefundReceipt { reference: format!("re_{}", request.idempotency_key.replace(':', "_")) })
    }
}

/// Offers the same shipping options for every cart.
#[derive(Debug, Clone, Default)]
pub struct FixedShippingQuotes {
    pub options: Vec<ShippingOption>,
}

impl FixedShippingQuotes {
    pub fn new(options: Vec<ShippingOption>) -> Self {
        Self { options }
    }

    /// A single `standard` option at `price`, five days out.
    pub fn standard(price: Cents) -> Self {
        Self::new(vec![ShippingOption {
            id: "standard".into(),
            name: "Standard Shipping".into(),
            description: "5 business days".into(),
            price,
            estimated_days: 5,
            carrier: None,
        }])
    }
}

impl ShippingQuoteSource for FixedShippingQuotes {
    async fn shipping_options(
        &self,
        _address: &ShippingAddress,
        _items: &[CartItem],
        _subtotal: Cents,
    ) -> Result<Vec<ShippingOption>, SettlementError> {
        Ok(self.options.clone())
    }
}

/// Charges the same tax rate everywhere.
#[derive(Debug, Clone)]
pub struct FlatTaxRate {
    pub rate: Rate,
}

impl FlatTaxRate {
    pub fn new(rate: Rate) -> Self {
        Self { rate }
    }
}

impl TaxRateSource for FlatTaxRate {
    async fn tax_rate(&self, _address: &ShippingAddress) -> Result<TaxQuote, SettlementError> {
        Ok(TaxQuote { rate: self.rate, jurisdiction: "Flat rate".into(), breakdown: vec![] })
    }
}
