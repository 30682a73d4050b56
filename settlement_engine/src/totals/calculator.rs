use log::trace;
use settlement_common::DEFAULT_CURRENCY_CODE;

use crate::{
    api::totals_objects::{CartItem, ShippingOption, TaxQuote, TaxSummary},
    db_types::Cents,
    validation::ValidationErrors,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalsPolicy {
    /// The single settlement currency. Requests in any other currency are rejected.
    pub currency: String,
    /// Whether shipping is part of the taxable amount
    pub tax_shipping: bool,
}

impl Default for TotalsPolicy {
    fn default() -> Self {
        Self { currency: DEFAULT_CURRENCY_CODE.to_string(), tax_shipping: false }
    }
}

/// `Σ quantity * price`. Fails if the sum does not fit.
pub fn subtotal(items: &[CartItem]) -> Result<Cents, ValidationErrors> {
    items
        .iter()
        .try_fold(Cents::default(), |acc, item| item.line_total().and_then(|line| acc.checked_add(line)))
        .ok_or_else(|| ValidationErrors::single("items", "the cart total is too large"))
}

/// Picks the requested shipping method, or the cheapest option when none was requested (first listed wins a tie).
///
/// An unknown method falls back to the cheapest option and produces a warning. No options at all is a validation
/// error.
pub fn select_shipping(
    options: &[ShippingOption],
    requested: Option<&str>,
) -> Result<(ShippingOption, Option<String>), ValidationErrors> {
    let cheapest = options
        .iter()
        .enumerate()
        .min_by_key(|(i, o)| (o.price, *i))
        .map(|(_, o)| o.clone())
        .ok_or_else(|| ValidationErrors::single("shipping_method", "no shipping options are available"))?;
    match requested {
        None => Ok((cheapest, None)),
        Some(method) => match options.iter().find(|o| o.id.eq_ignore_ascii_case(method.trim())) {
            Some(option) => Ok((option.clone(), None)),
            None => {
                trace!("🧮 Shipping method '{method}' is not on offer. Falling back to {}", cheapest.id);
                let warning =
                    format!("Shipping method '{method}' is not available. {} was selected instead.", cheapest.name);
                Ok((cheapest, Some(warning)))
            },
        },
    }
}

/// Applies the quoted rate to the subtotal, and to shipping as well when `tax_shipping` is set.
pub fn compute_tax(
    quote: TaxQuote,
    subtotal: Cents,
    shipping: Cents,
    tax_shipping: bool,
) -> Result<TaxSummary, ValidationErrors> {
    let taxable_amount = if tax_shipping { subtotal.checked_add(shipping).ok_or_else(too_large)? } else { subtotal };
    let amount = quote.rate.apply(taxable_amount);
    Ok(TaxSummary {
        rate: quote.rate,
        taxable_amount,
        amount,
        jurisdiction: quote.jurisdiction,
        breakdown: quote.breakdown,
    })
}

/// `subtotal + shipping + tax - discount`, clamped at zero. Fails if an intermediate sum does not fit.
pub fn total(subtotal: Cents, shipping: Cents, tax: Cents, discount: Cents) -> Result<Cents, ValidationErrors> {
    subtotal
        .checked_add(shipping)
        .and_then(|t| t.checked_add(tax))
        .and_then(|t| t.checked_sub(discount))
        .map(|t| t.max(Cents::default()))
        .ok_or_else(too_large)
}

fn too_large() -> ValidationErrors {
    ValidationErrors::single("total", "the cart total is too large")
}
