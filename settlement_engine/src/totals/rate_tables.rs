//! Built-in shipping and tax tables.
//!
//! These are deliberately simple: a flat weight-banded shipping schedule and a table of US state sales tax rates
//! with an estimated local component. Deployments with a carrier-rate or tax service plug that in through
//! [`ShippingQuoteSource`] and [`TaxRateSource`] instead.
use std::{collections::HashMap, sync::OnceLock};

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

use crate::{
    api::totals_objects::{CartItem, ShippingOption, TaxComponent, TaxQuote},
    db_types::{Cents, Rate, ShippingAddress},
    traits::{SettlementError, ShippingQuoteSource, TaxRateSource},
    validation::ValidationErrors,
};

fn is_domestic(country: &str) -> bool {
    matches!(country.trim().to_ascii_uppercase().as_str(), "US" | "USA")
}

fn us_postal_code() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{5}(-\d{4})?$").ok()).as_ref()
}

/// US addresses need a state and a well-formed ZIP code. Other destinations only need a country.
pub fn validate_shipping_address(address: &ShippingAddress) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    errors.check(address.country.trim().is_empty(), "shipping_address.country", "is required");
    if is_domestic(&address.country) {
        errors.check(
            address.state.as_ref().map_or(true, |s| s.trim().is_empty()),
            "shipping_address.state",
            "is required for US addresses",
        );
        match address.postal_code.as_deref().map(str::trim) {
            None | Some("") => {
                errors.add("shipping_address.postal_code", "is required for US addresses");
            },
            Some(code) => {
                let valid = us_postal_code().map_or(true, |re| re.is_match(code));
                errors.check(!valid, "shipping_address.postal_code", format!("'{code}' is not a valid US ZIP code"));
            },
        }
    }
    errors.into_result(())
}

/// Counts `business_days` forward from `from`, skipping Saturdays and Sundays.
pub fn estimate_delivery_date(from: NaiveDate, business_days: u32) -> NaiveDate {
    let mut date = from;
    let mut remaining = business_days;
    while remaining > 0 {
        date += Duration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    date
}

//--------------------------------------   ShippingRateTable   ---------------------------------------------------------
/// Standard, express and (domestic only) overnight shipping, priced by total cart weight.
///
/// | weight       | standard | express | overnight |
/// |--------------|----------|---------|-----------|
/// | up to 2kg    | 9.99     | 19.99   | 29.99     |
/// | up to 5kg    | 14.99    | 29.99   | 44.99     |
/// | above 5kg    | 19.99    | 39.99   | 59.99     |
///
/// International destinations add 15.00 to standard and 25.00 to express. Standard shipping is free once the subtotal
/// reaches `free_shipping_threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingRateTable {
    pub free_shipping_threshold: Cents,
}

impl Default for ShippingRateTable {
    fn default() -> Self {
        Self { free_shipping_threshold: Cents::from(20_000) }
    }
}

fn weight_band(grams: i64, light: i64, medium: i64, heavy: i64) -> Cents {
    let price = match grams {
        g if g > 5_000 => heavy,
        g if g > 2_000 => medium,
        _ => light,
    };
    Cents::from(price)
}

impl ShippingRateTable {
    pub fn quote(&self, address: &ShippingAddress, items: &[CartItem], subtotal: Cents) -> Vec<ShippingOption> {
        let weight = items.iter().map(CartItem::total_weight_grams).fold(0i64, i64::saturating_add);
        let domestic = is_domestic(&address.country);
        let mut standard = weight_band(weight, 999, 1_499, 1_999);
        let mut express = weight_band(weight, 1_999, 2_999, 3_999);
        if !domestic {
            standard += Cents::from(1_500);
            express += Cents::from(2_500);
        }
        if subtotal >= self.free_shipping_threshold {
            standard = Cents::default();
        }
        let mut options = vec![
            ShippingOption {
                id: "standard".into(),
                name: "Standard Shipping".into(),
                description: if domestic { "5-7 business days" } else { "10-15 business days" }.into(),
                price: standard,
                estimated_days: if domestic { 7 } else { 15 },
                carrier: Some("USPS".into()),
            },
            ShippingOption {
                id: "express".into(),
                name: "Express Shipping".into(),
                description: if domestic { "2-3 business days" } else { "5-7 business days" }.into(),
                price: express,
                estimated_days: if domestic { 3 } else { 7 },
                carrier: Some("FedEx".into()),
            },
        ];
        if domestic {
            options.push(ShippingOption {
                id: "overnight".into(),
                name: "Overnight Delivery".into(),
                description: "Next business day".into(),
                price: weight_band(weight, 2_999, 4_499, 5_999),
                estimated_days: 1,
                carrier: Some("UPS".into()),
            });
        }
        options
    }
}

impl ShippingQuoteSource for ShippingRateTable {
    async fn shipping_options(
        &self,
        address: &ShippingAddress,
        items: &[CartItem],
        subtotal: Cents,
    ) -> Result<Vec<ShippingOption>, SettlementError> {
        Ok(self.quote(address, items, subtotal))
    }
}

//--------------------------------------     StateTaxTable     ---------------------------------------------------------
const STATE_RATES_PPM: [(&str, i64); 50] = [
    ("AL", 40_000),
    ("AK", 0),
    ("AZ", 56_000),
    ("AR", 65_000),
    ("CA", 72_500),
    ("CO", 29_000),
    ("CT", 63_500),
    ("DE", 0),
    ("FL", 60_000),
    ("GA", 40_000),
    ("HI", 40_000),
    ("ID", 60_000),
    ("IL", 62_500),
    ("IN", 70_000),
    ("IA", 60_000),
    ("KS", 65_000),
    ("KY", 60_000),
    ("LA", 44_500),
    ("ME", 55_000),
    ("MD", 60_000),
    ("MA", 62_500),
    ("MI", 60_000),
    ("MN", 68_750),
    ("MS", 70_000),
    ("MO", 42_250),
    ("MT", 0),
    ("NE", 55_000),
    ("NV", 68_500),
    ("NH", 0),
    ("NJ", 66_250),
    ("NM", 51_250),
    ("NY", 40_000),
    ("NC", 47_500),
    ("ND", 50_000),
    ("OH", 57_500),
    ("OK", 45_000),
    ("OR", 0),
    ("PA", 60_000),
    ("RI", 70_000),
    ("SC", 60_000),
    ("SD", 45_000),
    ("TN", 70_000),
    ("TX", 62_500),
    ("UT", 59_500),
    ("VT", 60_000),
    ("VA", 53_000),
    ("WA", 65_000),
    ("WV", 60_000),
    ("WI", 50_000),
    ("WY", 40_000),
];

/// US state sales tax plus an estimated local rate, split evenly between county and city. States without a sales
/// tax, and all destinations outside the US, are not taxed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTaxTable {
    state_rates: HashMap<String, Rate>,
    local_rate: Rate,
}

impl Default for StateTaxTable {
    fn default() -> Self {
        let state_rates = STATE_RATES_PPM.iter().map(|(s, ppm)| (s.to_string(), Rate::from_ppm(*ppm))).collect();
        Self { state_rates, local_rate: Rate::from_ppm(20_000) }
    }
}

impl StateTaxTable {
    pub fn with_local_rate(mut self, rate: Rate) -> Self {
        self.local_rate = rate;
        self
    }

    pub fn quote(&self, address: &ShippingAddress) -> TaxQuote {
        if !is_domestic(&address.country) {
            return TaxQuote::exempt();
        }
        let state = address.state.as_deref().unwrap_or_default().trim().to_ascii_uppercase();
        let state_rate = self.state_rates.get(&state).copied().unwrap_or_default();
        if state_rate.is_zero() {
            return TaxQuote::exempt();
        }
        let county = Rate::from_ppm(self.local_rate.ppm() / 2);
        let city = Rate::from_ppm(self.local_rate.ppm() - county.ppm());
        TaxQuote {
            rate: Rate::from_ppm(state_rate.ppm() + self.local_rate.ppm()),
            jurisdiction: format!("{state} State + Local Tax"),
            breakdown: vec![
                TaxComponent { name: "state".into(), rate: state_rate },
                TaxComponent { name: "county".into(), rate: county },
                TaxComponent { name: "city".into(), rate: city },
            ],
        }
    }
}

impl TaxRateSource for StateTaxTable {
    async fn tax_rate(&self, address: &ShippingAddress) -> Result<TaxQuote, SettlementError> {
        Ok(self.quote(address))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn address(country: &str, state: Option<&str>, zip: Option<&str>) -> ShippingAddress {
        ShippingAddress {
            id: "addr".into(),
            customer_id: "c1".into(),
            country: country.into(),
            state: state.map(String::from),
            postal_code: zip.map(String::from),
            city: None,
        }
    }

    #[test]
    fn domestic_shipping_quotes() {
        let table = ShippingRateTable::default();
        let items = vec![CartItem::new("a", 2, Cents::from(1_000))];
        let options = table.quote(&address("US", Some("CA"), Some("90210")), &items, Cents::from(2_000));
        let prices = options.iter().map(|o| (o.id.as_str(), o.price.value())).collect::<Vec<_>>();
        assert_eq!(prices, vec![("standard", 999), ("express", 1_999), ("overnight", 2_999)]);

        let heavy = vec![CartItem::new("a", 3, Cents::from(1_000)).with_weight(2_000)];
        let options = table.quote(&address("USA", Some("CA"), None), &heavy, Cents::from(20_000));
        let prices = options.iter().map(|o| o.price.value()).collect::<Vec<_>>();
        assert_eq!(prices, vec![0, 3_999, 5_999]);
    }

    #[test]
    fn international_shipping_has_no_overnight() {
        let table = ShippingRateTable::default();
        let items = vec![CartItem::new("a", 5, Cents::from(1_000))];
        let options = table.quote(&address("DE", None, None), &items, Cents::from(5_000));
        let prices = options.iter().map(|o| (o.id.as_str(), o.price.value())).collect::<Vec<_>>();
        assert_eq!(prices, vec![("standard", 2_999), ("express", 5_499)]);
    }

    #[test]
    fn state_tax_with_local_component() {
        let table = StateTaxTable::default();
        let quote = table.quote(&address("US", Some("ca"), Some("90210")));
        assert_eq!(quote.rate, Rate::from_ppm(92_500));
        assert_eq!(quote.jurisdiction, "CA State + Local Tax");
        assert_eq!(quote.breakdown.len(), 3);
        assert_eq!(table.quote(&address("US", Some("OR"), None)), TaxQuote::exempt());
        assert_eq!(table.quote(&address("FR", Some("CA"), None)), TaxQuote::exempt());
        assert_eq!(quote.rate.apply(Cents::from(10_000)), Cents::from(925));
    }

    #[test]
    fn us_addresses_need_state_and_zip() {
        assert!(validate_shipping_address(&address("US", Some("NY"), Some("10001-1234"))).is_ok());
        let err = validate_shipping_address(&address("US", None, Some("1234"))).unwrap_err();
        assert!(err.has_field("shipping_address.state"));
        assert!(err.has_field("shipping_address.postal_code"));
        assert!(validate_shipping_address(&address("GB", None, None)).is_ok());
        assert!(validate_shipping_address(&address(" ", None, None)).is_err());
    }

    #[test]
    fn delivery_dates_skip_weekends() {
        // 2024-03-01 is a Friday
        let friday = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(estimate_delivery_date(friday, 1), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(estimate_delivery_date(friday, 7), NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
        assert_eq!(estimate_delivery_date(friday, 0), friday);
    }
}
