use crate::{
    api::totals_objects::{CartItem, ShippingOption, TaxQuote},
    db_types::{Cents, Coupon, ShippingAddress},
    traits::SettlementError,
};

/// Resolves the customer's stored shipping addresses.
#[allow(async_fn_in_trait)]
pub trait AddressBook {
    async fn fetch_shipping_address(&self, address_id: &str) -> Result<Option<ShippingAddress>, SettlementError>;
}

/// Looks up coupon codes. Unknown codes are `Ok(None)`.
#[allow(async_fn_in_trait)]
pub trait CouponSource {
    async fn fetch_coupon(&self, code: &str) -> Result<Option<Coupon>, SettlementError>;
}

/// Quotes the shipping methods available for a cart going to a destination.
#[allow(async_fn_in_trait)]
pub trait ShippingQuoteSource {
    async fn shipping_options(
        &self,
        address: &ShippingAddress,
        items: &[CartItem],
        subtotal: Cents,
    ) -> Result<Vec<ShippingOption>, SettlementError>;
}

/// Provides the combined sales tax rate for a destination.
#[allow(async_fn_in_trait)]
pub trait TaxRateSource {
    async fn tax_rate(&self, address: &ShippingAddress) -> Result<TaxQuote, SettlementError>;
}

/// The stored-data lookups needed at checkout. Anything that is both an [`AddressBook`] and a [`CouponSource`] is one.
pub trait CheckoutLookups: AddressBook + CouponSource {}

impl<T: AddressBook + CouponSource> CheckoutLookups for T {}
