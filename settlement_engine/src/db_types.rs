//! Data types that are persisted by the settlement engine.
//!
//! All monetary amounts are [`Cents`] (integer minor units) and all percentages are [`Rate`]s. Identifiers that come
//! from outside the engine (order, seller, category ids) are opaque string newtypes.
use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use log::error;
use serde::{Deserialize, Serialize};
pub use settlement_common::{Cents, Rate};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::validation::ValidationErrors;

#[derive(Debug, Clone, Error)]
#[error("Invalid value: {0}")]
pub struct ConversionError(String);

macro_rules! string_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Generates `Display`, `FromStr` and the infallible `From<String>` for the status enums. The textual form is the
/// variant name, which is also how sqlx stores these enums.
macro_rules! status_strings {
    ($name:ident, default = $default:ident, [$($variant:ident),+ $(,)?]) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str(stringify!($variant)),)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $(stringify!($variant) => Ok(Self::$variant),)+
                    s => Err(ConversionError(format!("Invalid {}: {s}", stringify!($name)))),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                value.parse().unwrap_or_else(|_| {
                    error!(
                        "Invalid {}: {value}. But this conversion cannot fail. Defaulting to {}",
                        stringify!($name),
                        stringify!($default)
                    );
                    Self::$default
                })
            }
        }
    };
}

//--------------------------------------     Identifiers       ---------------------------------------------------------
string_id!(OrderId, "#");
string_id!(SellerId, "");
string_id!(CategoryId, "");

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// The order has been placed, but no payment has been captured yet.
    New,
    /// Payment was captured and the funds are held in escrow.
    Paid,
    /// Every seller allocation has been paid out or resolved with a payout.
    Completed,
    /// The order was cancelled before any payment was captured.
    Cancelled,
    /// The captured payment was returned to the customer in full.
    Refunded,
}

status_strings!(OrderStatusType, default = New, [New, Paid, Completed, Cancelled, Refunded]);

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub customer_id: String,
    pub subtotal: Cents,
    pub shipping: Cents,
    pub tax: Cents,
    pub discount: Cents,
    pub total: Cents,
    pub currency: String,
    pub status: OrderStatusType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      OrderItem        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub seller_id: SellerId,
    pub category_id: Option<CategoryId>,
    pub quantity: i64,
    pub unit_price: Cents,
    pub line_total: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,
    #[serde(default)]
    pub variant_id: Option<String>,
    pub seller_id: SellerId,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    pub quantity: i64,
    pub unit_price: Cents,
}

impl NewOrderItem {
    pub fn new<S: Into<SellerId>>(product_id: &str, seller_id: S, quantity: i64, unit_price: Cents) -> Self {
        Self {
            product_id: product_id.to_string(),
            variant_id: None,
            seller_id: seller_id.into(),
            category_id: None,
            quantity,
            unit_price,
        }
    }

    pub fn with_category<C: Into<CategoryId>>(mut self, category: C) -> Self {
        self.category_id = Some(category.into());
        self
    }

    /// `unit_price * quantity`, or `None` on overflow.
    pub fn line_total(&self) -> Option<Cents> {
        self.unit_price.checked_mul(self.quantity)
    }
}

//--------------------------------------       NewOrder        ---------------------------------------------------------
/// An order as handed over by the storefront once the customer has checked out. The subtotal and total are derived
/// from the items and the price components, so they can never disagree with the line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub customer_id: String,
    pub currency: String,
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub shipping: Cents,
    #[serde(default)]
    pub tax: Cents,
    #[serde(default)]
    pub discount: Cents,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new<S: Into<String>>(order_id: OrderId, customer_id: S, currency: &str, items: Vec<NewOrderItem>) -> Self {
        Self {
            order_id,
            customer_id: customer_id.into(),
            currency: currency.to_string(),
            items,
            shipping: Cents::default(),
            tax: Cents::default(),
            discount: Cents::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_charges(mut self, shipping: Cents, tax: Cents, discount: Cents) -> Self {
        self.shipping = shipping;
        self.tax = tax;
        self.discount = discount;
        self
    }

    /// The sum of the line totals, or `None` if a line or the sum does not fit.
    pub fn subtotal(&self) -> Option<Cents> {
        self.items.iter().try_fold(Cents::default(), |acc, item| item.line_total().and_then(|l| acc.checked_add(l)))
    }

    /// `subtotal + shipping + tax - discount`, never below zero. `None` on overflow.
    pub fn total(&self) -> Option<Cents> {
        self.subtotal()?
            .checked_add(self.shipping)?
            .checked_add(self.tax)?
            .checked_sub(self.discount)
            .map(|t| t.max(Cents::default()))
    }

    /// Checks the order on its own terms, reporting every problem found.
    pub fn validate(&self, settlement_currency: &str) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(self.order_id.as_str().trim().is_empty(), "order_id", "is required");
        errors.check(self.customer_id.trim().is_empty(), "customer_id", "is required");
        errors.check(
            !self.currency.eq_ignore_ascii_case(settlement_currency),
            "currency",
            format!("only {settlement_currency} is supported"),
        );
        errors.check(self.items.is_empty(), "items", "at least one item is required");
        for (i, item) in self.items.iter().enumerate() {
            errors.check(item.product_id.trim().is_empty(), format!("items[{i}].product_id"), "is required");
            errors.check(item.seller_id.as_str().trim().is_empty(), format!("items[{i}].seller_id"), "is required");
            errors.check(item.quantity <= 0, format!("items[{i}].quantity"), "must be a positive integer");
            errors.check(item.unit_price.is_negative(), format!("items[{i}].unit_price"), "must not be negative");
            errors.check(item.line_total().is_none(), format!("items[{i}].unit_price"), "line total is too large");
        }
        errors.check(self.shipping.is_negative(), "shipping", "must not be negative");
        errors.check(self.tax.is_negative(), "tax", "must not be negative");
        errors.check(self.discount.is_negative(), "discount", "must not be negative");
        if errors.is_empty() {
            errors.check(self.total().is_none(), "total", "the cart total is too large");
        }
        errors.into_result(())
    }
}

//--------------------------------------    CommissionRule     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommissionType {
    #[default]
    #[serde(alias = "percentage", alias = "Percentage")]
    Percentage,
}

status_strings!(CommissionType, default = Percentage, [Percentage]);

/// The precedence tier of a commission rule, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommissionScope {
    SellerCategory,
    Seller,
    Category,
    Global,
}

impl CommissionScope {
    pub const PRECEDENCE: [CommissionScope; 4] =
        [CommissionScope::SellerCategory, CommissionScope::Seller, CommissionScope::Category, CommissionScope::Global];

    pub fn of(seller_id: Option<&SellerId>, category_id: Option<&CategoryId>) -> Self {
        match (seller_id, category_id) {
            (Some(_), Some(_)) => Self::SellerCategory,
            (Some(_), None) => Self::Seller,
            (None, Some(_)) => Self::Category,
            (None, None) => Self::Global,
        }
    }
}

impl Display for CommissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SellerCategory => write!(f, "seller+category"),
            Self::Seller => write!(f, "seller"),
            Self::Category => write!(f, "category"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CommissionRule {
    pub id: i64,
    pub seller_id: Option<SellerId>,
    pub category_id: Option<CategoryId>,
    pub commission_type: CommissionType,
    pub rate: Rate,
    pub min_order_value: Option<Cents>,
    pub max_order_value: Option<Cents>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommissionRule {
    pub fn scope(&self) -> CommissionScope {
        CommissionScope::of(self.seller_id.as_ref(), self.category_id.as_ref())
    }

    /// True if the rule is switched on and `at` falls inside its (inclusive) validity window.
    pub fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from.map_or(true, |from| from <= at) && self.valid_until.map_or(true, |to| at <= to)
    }

    /// True if `value` lies inside the rule's (inclusive) order-value band.
    pub fn covers_value(&self, value: Cents) -> bool {
        self.min_order_value.map_or(true, |min| min <= value) && self.max_order_value.map_or(true, |max| value <= max)
    }

    pub fn applies_to(&self, seller_id: &SellerId, category_id: Option<&CategoryId>) -> bool {
        self.seller_id.as_ref().map_or(true, |s| s == seller_id)
            && self.category_id.as_ref().map_or(true, |c| Some(c) == category_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommissionRule {
    #[serde(default)]
    pub seller_id: Option<SellerId>,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    #[serde(default)]
    pub commission_type: CommissionType,
    pub commission_rate: Rate,
    #[serde(default)]
    pub min_order_value: Option<Cents>,
    #[serde(default)]
    pub max_order_value: Option<Cents>,
    #[serde(default)]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewCommissionRule {
    pub fn new(rate: Rate) -> Self {
        Self {
            seller_id: None,
            category_id: None,
            commission_type: CommissionType::Percentage,
            commission_rate: rate,
            min_order_value: None,
            max_order_value: None,
            valid_from: None,
            valid_until: None,
            notes: None,
        }
    }

    pub fn for_seller<S: Into<SellerId>>(mut self, seller_id: S) -> Self {
        self.seller_id = Some(seller_id.into());
        self
    }

    pub fn for_category<C: Into<CategoryId>>(mut self, category_id: C) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_order_value_band(mut self, min: Option<Cents>, max: Option<Cents>) -> Self {
        self.min_order_value = min;
        self.max_order_value = max;
        self
    }

    pub fn valid_between(mut self, from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn with_notes<S: Into<String>>(mut self, notes: S) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn scope(&self) -> CommissionScope {
        CommissionScope::of(self.seller_id.as_ref(), self.category_id.as_ref())
    }
}

/// Full replacement of a rule's mutable fields. `is_active` is left untouched when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRuleUpdate {
    #[serde(flatten)]
    pub rule: NewCommissionRule,
    #[serde(default)]
    pub is_active: Option<bool>,
}

//--------------------------------------  EscrowTransaction    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum EscrowStatusType {
    /// At least one allocation is still awaiting release, refund or dispute resolution.
    Open,
    /// Every allocation has reached a terminal state.
    Settled,
}

status_strings!(EscrowStatusType, default = Open, [Open, Settled]);

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: i64,
    pub order_id: OrderId,
    pub capture_reference: String,
    pub total_amount: Cents,
    pub currency: String,
    pub status: EscrowStatusType,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   AllocationStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
pub enum AllocationStatus {
    /// Funds are captured but the seller has not shipped yet.
    Pending,
    /// The seller has shipped. Funds wait out the hold period.
    Held,
    /// A dispute is open. Nothing moves until it is resolved.
    Frozen,
    /// Paid out to the seller (possibly partially, after a dispute settlement).
    Released,
    /// Returned to the customer in full.
    Refunded,
}

status_strings!(AllocationStatus, default = Pending, [Pending, Held, Frozen, Released, Refunded]);

impl AllocationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

//--------------------------------------      Allocation       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Allocation {
    pub id: i64,
    pub escrow_id: i64,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub category_id: Option<CategoryId>,
    /// The seller's share of the order subtotal that this allocation was apportioned from.
    pub contribution: Cents,
    /// The seller's share of the captured amount.
    pub amount: Cents,
    pub status: AllocationStatus,
    pub hold_until: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivery_confirmed_at: Option<DateTime<Utc>>,
    pub released_amount: Cents,
    pub refunded_amount: Cents,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    /// True if the hold period has elapsed at `now`.
    pub fn hold_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.hold_until.map_or(false, |until| until <= now)
    }
}

//--------------------------------------      Commission       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Commission {
    pub id: i64,
    pub allocation_id: i64,
    pub rule_id: i64,
    pub rate: Rate,
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------       Dispute         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum DisputeStatus {
    Open,
    Dismissed,
    Settled,
}

status_strings!(DisputeStatus, default = Open, [Open, Dismissed, Settled]);

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Dispute {
    pub id: i64,
    pub allocation_id: i64,
    pub reason: String,
    pub opened_by: String,
    pub status: DisputeStatus,
    pub release_amount: Option<Cents>,
    pub refund_amount: Option<Cents>,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.status == DisputeStatus::Open
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDispute {
    pub allocation_id: i64,
    pub reason: String,
    pub opened_by: String,
}

/// How an open dispute is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisputeResolution {
    /// The claim is rejected. The allocation returns to its hold.
    Dismiss,
    /// The allocation is split between the seller and the customer. The two parts must add up to the allocation.
    Settle { release_amount: Cents, refund_amount: Cents },
}

impl Display for DisputeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dismiss => write!(f, "dismissal"),
            Self::Settle { release_amount, refund_amount } => {
                write!(f, "settlement ({release_amount} released, {refund_amount} refunded)")
            },
        }
    }
}

//--------------------------------------    EscrowMovement     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum MovementKind {
    Release,
    Refund,
}

status_strings!(MovementKind, default = Release, [Release, Refund]);

/// A ledger entry recording money leaving escrow. There is at most one movement of each kind per allocation.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct EscrowMovement {
    pub id: i64,
    pub allocation_id: i64,
    pub kind: MovementKind,
    pub amount: Cents,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub kind: MovementKind,
    pub amount: Cents,
    pub reference: Option<String>,
}

//--------------------------------------       Shipment        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Shipment {
    pub id: i64,
    pub allocation_id: i64,
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub shipped_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub destination_postal_code: Option<String>,
    pub origin_country: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShipment {
    pub allocation_id: i64,
    pub tracking_number: String,
    pub carrier: Option<String>,
    pub shipped_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub destination_postal_code: Option<String>,
    pub origin_country: Option<String>,
}

//--------------------------------------     Idempotency       ---------------------------------------------------------
/// Where an externally-delivered event came from. Together with the event id it forms the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
pub enum EventSource {
    GatewayCapture,
    CarrierShipment,
    GatewayRefund,
}

status_strings!(EventSource, default = GatewayCapture, [GatewayCapture, CarrierShipment, GatewayRefund]);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub source: EventSource,
    pub event_id: String,
}

impl IdempotencyKey {
    pub fn new<S: Into<String>>(source: EventSource, event_id: S) -> Self {
        Self { source, event_id: event_id.into() }
    }

    /// The dedup key of a payment capture: the same capture reference for the same order is processed only once.
    pub fn capture(order_id: &OrderId, capture_reference: &str) -> Self {
        Self::new(EventSource::GatewayCapture, format!("{}:{capture_reference}", order_id.as_str()))
    }

    /// The dedup key of a refund. An allocation is refunded at most once, so the allocation id is enough. The same
    /// string is handed to the gateway as its idempotency key.
    pub fn refund(allocation_id: i64) -> Self {
        Self::new(EventSource::GatewayRefund, format!("refund:{allocation_id}"))
    }
}

impl Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.event_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub source: EventSource,
    pub event_id: String,
    pub reference: Option<String>,
    pub processed_at: DateTime<Utc>,
}

//--------------------------------------   ShippingAddress     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub id: String,
    pub customer_id: String,
    /// ISO 3166 alpha-2 (or alpha-3) country code
    pub country: String,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

//--------------------------------------        Coupon         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum DiscountType {
    /// `value` is a rate in parts per million of the subtotal
    Percentage,
    /// `value` is an amount in minor units
    Fixed,
}

status_strings!(DiscountType, default = Fixed, [Percentage, Fixed]);

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: i64,
    pub min_subtotal: Option<Cents>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Coupon {
    /// Works out the discount this coupon grants on `subtotal` at time `at`, or explains why it does not apply.
    ///
    /// The discount never exceeds the subtotal.
    pub fn discount_for(&self, subtotal: Cents, at: DateTime<Utc>) -> Result<Cents, String> {
        if !self.is_active {
            return Err(format!("Coupon code '{}' is no longer active", self.code));
        }
        if self.valid_from.map_or(false, |from| at < from) {
            return Err(format!("Coupon code '{}' is not valid yet", self.code));
        }
        if self.valid_until.map_or(false, |until| at > until) {
            return Err(format!("Coupon code '{}' has expired", self.code));
        }
        if let Some(min) = self.min_subtotal {
            if subtotal < min {
                return Err(format!("Coupon code '{}' requires a minimum subtotal of {min}", self.code));
            }
        }
        let discount = match self.discount_type {
            DiscountType::Percentage => Rate::from_ppm(self.value).apply(subtotal),
            DiscountType::Fixed => Cents::from(self.value),
        };
        Ok(discount.clamp(Cents::default(), subtotal.max(Cents::default())))
    }
}

//--------------------------------------     Seller shares     ---------------------------------------------------------
/// One seller's portion of an order, before the captured amount is apportioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerShare {
    pub seller_id: SellerId,
    /// The category that contributes the most to this seller's share. Ties go to the lowest category id.
    pub category_id: Option<CategoryId>,
    pub contribution: Cents,
}

impl SellerShare {
    pub fn new<S: Into<SellerId>>(seller_id: S, contribution: Cents) -> Self {
        Self { seller_id: seller_id.into(), category_id: None, contribution }
    }

    pub fn with_category<C: Into<CategoryId>>(mut self, category_id: C) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// Groups order items by seller, summing line totals. Sellers come out in ascending id order.
    pub fn from_items(items: &[OrderItem]) -> Vec<SellerShare> {
        let mut by_seller: BTreeMap<&SellerId, (Cents, BTreeMap<Option<&CategoryId>, Cents>)> = BTreeMap::new();
        for item in items {
            let entry = by_seller.entry(&item.seller_id).or_default();
            entry.0 += item.line_total;
            *entry.1.entry(item.category_id.as_ref()).or_default() += item.line_total;
        }
        by_seller
            .into_iter()
            .map(|(seller_id, (contribution, categories))| {
                let mut dominant: Option<(Option<&CategoryId>, Cents)> = None;
                for (category, amount) in categories {
                    if dominant.map_or(true, |(_, best)| amount > best) {
                        dominant = Some((category, amount));
                    }
                }
                SellerShare {
                    seller_id: seller_id.clone(),
                    category_id: dominant.and_then(|(c, _)| c.cloned()),
                    contribution,
                }
            })
            .collect()
    }
}

/// The time at which the hold on an allocation ends, given the moment the hold clock started.
pub fn hold_deadline(started: DateTime<Utc>, hold_period: Duration) -> DateTime<Utc> {
    started + hold_period
}

#[cfg(test)]
mod test {
    use super::*;

    fn item(seller: &str, category: Option<&str>, line_total: i64) -> OrderItem {
        OrderItem {
            id: 0,
            order_id: OrderId::from("o1"),
            product_id: "p".into(),
            variant_id: None,
            seller_id: SellerId::from(seller),
            category_id: category.map(CategoryId::from),
            quantity: 1,
            unit_price: Cents::from(line_total),
            line_total: Cents::from(line_total),
        }
    }

    #[test]
    fn seller_shares_pick_dominant_category() {
        let items = vec![
            item("bob", Some("books"), 500),
            item("alice", Some("toys"), 1000),
            item("alice", Some("games"), 2000),
            item("alice", Some("toys"), 1500),
            item("bob", Some("art"), 500),
        ];
        let shares = SellerShare::from_items(&items);
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].seller_id.as_str(), "alice");
        assert_eq!(shares[0].contribution, Cents::from(4500));
        assert_eq!(shares[0].category_id, Some(CategoryId::from("toys")));
        // tie between art and books goes to the lowest id
        assert_eq!(shares[1].category_id, Some(CategoryId::from("art")));
        assert_eq!(shares[1].contribution, Cents::from(1000));
    }

    #[test]
    fn new_order_totals() {
        let items =
            vec![NewOrderItem::new("p1", "s1", 2, Cents::from(5000)), NewOrderItem::new("p2", "s2", 1, Cents::from(5000))];
        let order = NewOrder::new(OrderId::from("o1"), "c1", "USD", items).with_charges(
            Cents::from(1000),
            Cents::from(1200),
            Cents::from(20000),
        );
        assert_eq!(order.subtotal(), Some(Cents::from(15000)));
        assert_eq!(order.total(), Some(Cents::default()));
        assert!(order.validate("USD").is_ok());
        let bad = NewOrder::new(OrderId::from("o2"), "", "EUR", vec![NewOrderItem::new("p1", "s1", 0, Cents::from(-1))]);
        let err = bad.validate("USD").unwrap_err();
        assert!(err.has_field("customer_id"));
        assert!(err.has_field("currency"));
        assert!(err.has_field("items[0].quantity"));
        assert!(err.has_field("items[0].unit_price"));
    }

    #[test]
    fn oversized_order_fails_validation() {
        let items = vec![
            NewOrderItem::new("p1", "s1", 1, Cents::from(i64::MAX - 100)),
            NewOrderItem::new("p2", "s2", 1, Cents::from(50)),
        ];
        let order = NewOrder::new(OrderId::from("o3"), "c1", "USD", items.clone());
        assert!(order.subtotal().is_some());
        let order = order.with_charges(Cents::from(999), Cents::default(), Cents::default());
        assert!(order.total().is_none());
        let err = order.validate("USD").unwrap_err();
        assert!(err.has_field("total"));
        assert!(err.to_string().contains("the cart total is too large"));

        let mut lines = items;
        lines.push(NewOrderItem::new("p3", "s3", 1, Cents::from(100)));
        let order = NewOrder::new(OrderId::from("o4"), "c1", "USD", lines);
        assert!(order.subtotal().is_none());
        assert!(order.validate("USD").is_err());
    }

    #[test]
    fn coupon_discounts() {
        let now = Utc::now();
        let mut coupon = Coupon {
            code: "TENOFF".into(),
            discount_type: DiscountType::Percentage,
            value: 100_000,
            min_subtotal: Some(Cents::from(5000)),
            valid_from: None,
            valid_until: Some(now + Duration::days(1)),
            is_active: true,
        };
        assert_eq!(coupon.discount_for(Cents::from(15000), now), Ok(Cents::from(1500)));
        assert!(coupon.discount_for(Cents::from(4000), now).is_err());
        assert!(coupon.discount_for(Cents::from(15000), now + Duration::days(2)).is_err());
        coupon.discount_type = DiscountType::Fixed;
        coupon.value = 99_999;
        assert_eq!(coupon.discount_for(Cents::from(15000), now), Ok(Cents::from(15000)));
    }

    #[test]
    fn status_round_trip() {
        assert_eq!("Frozen".parse::<AllocationStatus>().unwrap(), AllocationStatus::Frozen);
        assert_eq!(AllocationStatus::from("Bogus".to_string()), AllocationStatus::Pending);
        assert!(AllocationStatus::Refunded.is_terminal());
        assert!(!AllocationStatus::Frozen.is_terminal());
    }
}
