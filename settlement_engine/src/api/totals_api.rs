use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    api::totals_objects::{AppliedCoupon, CalculateTotalsRequest, OrderCalculation},
    db_types::Cents,
    totals::{
        compute_tax,
        estimate_delivery_date,
        select_shipping,
        subtotal,
        total,
        validate_shipping_address,
        ShippingRateTable,
        StateTaxTable,
        TotalsPolicy,
    },
    traits::{CheckoutLookups, SettlementError, ShippingQuoteSource, TaxRateSource},
};

/// `TotalsApi` prices a cart. It is a pure read path: nothing is written, and the same inputs (at the same instant)
/// always produce the same breakdown.
///
/// Addresses and coupons come from `A`; shipping quotes and tax rates come from `Q` and `T`, which default to the
/// built-in tables.
pub struct TotalsApi<A, Q = ShippingRateTable, T = StateTaxTable> {
    lookups: A,
    shipping: Q,
    tax: T,
    policy: TotalsPolicy,
}

impl<A, Q, T> Debug for TotalsApi<A, Q, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TotalsApi ({})", self.policy.currency)
    }
}

impl<A> TotalsApi<A> {
    pub fn new(lookups: A, policy: TotalsPolicy) -> Self {
        Self { lookups, shipping: ShippingRateTable::default(), tax: StateTaxTable::default(), policy }
    }
}

impl<A, Q, T> TotalsApi<A, Q, T> {
    pub fn with_sources(lookups: A, shipping: Q, tax: T, policy: TotalsPolicy) -> Self {
        Self { lookups, shipping, tax, policy }
    }

    pub fn policy(&self) -> &TotalsPolicy {
        &self.policy
    }
}

impl<A, Q, T> TotalsApi<A, Q, T>
where
    A: CheckoutLookups,
    Q: ShippingQuoteSource,
    T: TaxRateSource,
{
    pub async fn calculate(&self, request: CalculateTotalsRequest) -> Result<OrderCalculation, SettlementError> {
        self.calculate_at(request, Utc::now()).await
    }

    /// Prices the cart as of `at`. `at` decides coupon validity and the delivery estimate.
    pub async fn calculate_at(
        &self,
        request: CalculateTotalsRequest,
        at: DateTime<Utc>,
    ) -> Result<OrderCalculation, SettlementError> {
        let mut errors = request.validate(&self.policy.currency).err().unwrap_or_default();
        let address = match request.shipping_address_id.trim() {
            "" => None,
            id => self.lookups.fetch_shipping_address(id).await?,
        };
        match &address {
            Some(address) => {
                if let Err(address_errors) = validate_shipping_address(address) {
                    errors.errors.extend(address_errors.errors);
                }
            },
            None if !request.shipping_address_id.trim().is_empty() => {
                let id = request.shipping_address_id.trim();
                errors.add("shipping_address_id", format!("address '{id}' was not found"));
            },
            None => {},
        }
        let address = match (errors.is_empty(), address) {
            (true, Some(address)) => address,
            _ => {
                debug!("🧮 Cart rejected. {errors}");
                return Err(errors.into());
            },
        };

        let subtotal = subtotal(&request.items)?;
        let options = self.shipping.shipping_options(&address, &request.items, subtotal).await?;
        let (shipping, shipping_warning) = select_shipping(&options, request.shipping_method.as_deref())?;
        let mut warnings = shipping_warning.into_iter().collect::<Vec<_>>();

        let quote = self.tax.tax_rate(&address).await?;
        let tax = compute_tax(quote, subtotal, shipping.price, self.policy.tax_shipping)?;

        let mut discount = Cents::default();
        let mut coupon = None;
        if let Some(code) = request.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            match self.lookups.fetch_coupon(code).await? {
                None => warnings.push(format!("Coupon code '{code}' is not valid")),
                Some(found) => match found.discount_for(subtotal, at) {
                    Ok(amount) => {
                        discount = amount;
                        coupon =
                            Some(AppliedCoupon { code: found.code, discount_type: found.discount_type, discount: amount });
                    },
                    Err(reason) => warnings.push(reason),
                },
            }
        }

        let total = total(subtotal, shipping.price, tax.amount, discount)?;
        let item_count = request.items.iter().fold(0i64, |n, i| n.saturating_add(i.quantity));
        let estimated_delivery = estimate_delivery_date(at.date_naive(), shipping.estimated_days);
        trace!(
            "🧮 Cart priced: {subtotal} + {} shipping + {} tax - {discount} = {total} ({} warnings)",
            shipping.price,
            tax.amount,
            warnings.len()
        );
        Ok(OrderCalculation {
            subtotal,
            shipping,
            shipping_options: options,
            estimated_delivery,
            tax,
            discount,
            coupon,
            total,
            currency: self.policy.currency.clone(),
            item_count,
            warnings,
        })
    }
}

