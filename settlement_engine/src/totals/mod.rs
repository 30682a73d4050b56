//! Checkout pricing.
//!
//! [`calculator`] holds the arithmetic: subtotal, shipping selection, tax and the final total. [`rate_tables`]
//! provides the default shipping quote and sales tax implementations used when no external service is plugged in.
pub mod calculator;
pub mod rate_tables;

pub use calculator::{compute_tax, select_shipping, subtotal, total, TotalsPolicy};
pub use rate_tables::{estimate_delivery_date, validate_shipping_address, ShippingRateTable, StateTaxTable};
