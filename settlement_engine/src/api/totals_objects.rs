use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{CategoryId, Cents, DiscountType, Rate, SellerId},
    validation::ValidationErrors,
};

/// Items without a weight are assumed to weigh this much when quoting shipping.
pub const DEFAULT_ITEM_WEIGHT_GRAMS: i64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    #[serde(default)]
    pub seller_id: Option<SellerId>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub quantity: i64,
    pub price: Cents,
    #[serde(default)]
    pub weight_grams: Option<i64>,
}

impl CartItem {
    pub fn new(product_id: &str, quantity: i64, price: Cents) -> Self {
        Self {
            product_id: product_id.to_string(),
            variant_id: None,
            seller_id: None,
            category_id: None,
            quantity,
            price,
            weight_grams: None,
        }
    }

    pub fn sold_by<S: Into<SellerId>>(mut self, seller_id: S) -> Self {
        self.seller_id = Some(seller_id.into());
        self
    }

    pub fn with_weight(mut self, grams: i64) -> Self {
        self.weight_grams = Some(grams);
        self
    }

    pub fn line_total(&self) -> Option<Cents> {
        self.price.checked_mul(self.quantity)
    }

    pub fn total_weight_grams(&self) -> i64 {
        self.weight_grams.unwrap_or(DEFAULT_ITEM_WEIGHT_GRAMS).saturating_mul(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalculateTotalsRequest {
    pub items: Vec<CartItem>,
    pub shipping_address_id: String,
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl CalculateTotalsRequest {
    pub fn new<S: Into<String>>(items: Vec<CartItem>, shipping_address_id: S) -> Self {
        Self {
            items,
            shipping_address_id: shipping_address_id.into(),
            shipping_method: None,
            currency: None,
            coupon_code: None,
        }
    }

    pub fn with_shipping_method(mut self, method: &str) -> Self {
        self.shipping_method = Some(method.to_string());
        self
    }

    pub fn with_coupon(mut self, code: &str) -> Self {
        self.coupon_code = Some(code.to_string());
        self
    }

    pub fn with_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }

    /// Checks the request on its own terms. Every problem found is reported.
    pub fn validate(&self, settlement_currency: &str) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.items.is_empty(), "items", "at least one item is required");
        for (i, item) in self.items.iter().enumerate() {
            errors.check(item.product_id.trim().is_empty(), format!("items[{i}].product_id"), "is required");
            errors.check(item.quantity <= 0, format!("items[{i}].quantity"), "must be a positive integer");
            errors.check(item.price.is_negative(), format!("items[{i}].price"), "must not be negative");
            errors.check(item.line_total().is_none(), format!("items[{i}].price"), "line total is too large");
            errors.check(
                item.weight_grams.map_or(false, |w| w < 0),
                format!("items[{i}].weight_grams"),
                "must not be negative",
            );
        }
        errors.check(self.shipping_address_id.trim().is_empty(), "shipping_address_id", "is required");
        if let Some(currency) = &self.currency {
            errors.check(
                !currency.eq_ignore_ascii_case(settlement_currency),
                "currency",
                format!("only {settlement_currency} is supported"),
            );
        }
        errors.into_result(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    /// The method key, e.g. `standard`
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: Cents,
    /// Business days until delivery
    pub estimated_days: u32,
    pub carrier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxComponent {
    pub name: String,
    pub rate: Rate,
}

/// A combined tax rate for a destination, with its components when the source provides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxQuote {
    pub rate: Rate,
    pub jurisdiction: String,
    #[serde(default)]
    pub breakdown: Vec<TaxComponent>,
}

impl TaxQuote {
    pub fn exempt() -> Self {
        Self { rate: Rate::default(), jurisdiction: "No Tax".to_string(), breakdown: vec![] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxSummary {
    pub rate: Rate,
    pub taxable_amount: Cents,
    pub amount: Cents,
    pub jurisdiction: String,
    pub breakdown: Vec<TaxComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount: Cents,
}

/// The authoritative price of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCalculation {
    pub subtotal: Cents,
    pub shipping: ShippingOption,
    pub shipping_options: Vec<ShippingOption>,
    pub estimated_delivery: NaiveDate,
    pub tax: TaxSummary,
    pub discount: Cents,
    pub coupon: Option<AppliedCoupon>,
    pub total: Cents,
    pub currency: String,
    pub item_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
