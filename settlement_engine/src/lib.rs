//! Marketplace Settlement Engine
//!
//! The settlement engine prices multi-vendor carts, captures payments into escrow, splits each capture across the
//! sellers on the order, takes commission, and pays sellers out once their goods have shipped and the hold period has
//! passed. Disputes freeze a seller's funds until they are resolved.
//!
//! The library is divided into these main sections:
//! 1. Pure rules: checkout [`mod@totals`], [`mod@commission`] resolution, and escrow [`mod@escrow`] allocation and
//!    lifecycle planning. None of these touch the database.
//! 2. Backend contracts ([`mod@traits`]) and the SQLite backend. You should never need to access the database
//!    directly. The exception is the data types, which are defined in [`mod@db_types`] and are public.
//! 3. The public API ([`mod@api`]), which combines the rules with a backend and the external collaborators (payment
//!    gateway, address book, coupons, shipping and tax quotes).
//!
//! The engine also emits events after each committed state change (see [`mod@events`]), so that notifications can be
//! hooked in without touching the settlement flow.
pub mod api;
pub mod commission;
pub mod db_types;
pub mod escrow;
pub mod events;
pub mod totals;
pub mod traits;
pub mod validation;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(all(feature = "sqlite", any(feature = "test_utils", test)))]
pub mod test_utils;

pub use api::{
    commission_api::CommissionApi,
    dispute_api::DisputeApi,
    escrow_flow_api::EscrowFlowApi,
    escrow_query_api::EscrowQueryApi,
    totals_api::TotalsApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{SettlementDatabase, SettlementError};
