//! # Backend contracts
//!
//! This module provides the interfaces that define the contracts of the settlement engine's *backends* and
//! collaborators.
//!
//! * [`SettlementDatabase`] defines the highest level of behaviour for storage backends: orders, escrow creation and
//!   atomic allocation transitions.
//! * [`CommissionRules`] stores commission rules.
//! * [`EscrowQueries`] provides read-only reporting over escrow state.
//! * [`AddressBook`], [`CouponSource`], [`ShippingQuoteSource`] and [`TaxRateSource`] are the lookups needed to price a
//!   cart at checkout.
//! * [`PaymentGateway`] is the external processor through which refunds are issued.
mod checkout_lookups;
mod commission_rules;
mod escrow_queries;
mod payment_gateway;
mod settlement_database;

pub mod data_objects;

pub use checkout_lookups::{AddressBook, CheckoutLookups, CouponSource, ShippingQuoteSource, TaxRateSource};
pub use commission_rules::CommissionRules;
pub use data_objects::{
    AllocationChange,
    AllocationDetails,
    AllocationQueryFilter,
    CommissionQueryFilter,
    CommissionRecord,
    CommissionState,
    CommissionStatistics,
    CommissionTally,
    DisputeWrite,
    EscrowDetails,
    EscrowStatistics,
    InsertEscrowResult,
    NewAllocation,
    NewCommission,
    NewEscrow,
    Page,
    Pagination,
    RuleQueryFilter,
    SellerCommissionSummary,
    SellerEscrowSummary,
    StatusTotal,
    SweepFailure,
    SweepResult,
    TransitionBatch,
    TransitionOutcome,
};
pub use escrow_queries::EscrowQueries;
pub use payment_gateway::{GatewayError, PaymentGateway, RefundReceipt, RefundRequest};
pub use settlement_database::{SettlementDatabase, SettlementError};
