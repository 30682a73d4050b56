//! # Settlement engine public API
//!
//! The `api` module exposes the programmatic API for the settlement engine. It is modular, so that clients can pick
//! the functionality they need.
//!
//! * [`totals_api`] prices a cart at checkout. It is a pure read path.
//! * [`commission_api`] manages commission rules and resolves the rule that governs a sale.
//! * [`escrow_flow_api`] is the primary API for moving money: payment captures, shipment confirmations, releases, the
//!   scheduled release sweep and cancellations.
//! * [`dispute_api`] opens and resolves disputes.
//! * [`escrow_query_api`] provides read-only views for sellers and operators.
//!
//! The other submodules hold the request and response types, and retry helpers.
//!
//! # API usage
//!
//! Every API is created by supplying a backend that implements the traits it needs.
//!
//! ```rust,ignore
//! use settlement_engine::{EscrowQueryApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url("sqlite://data/settlement.db", 25).await?;
//! let api = EscrowQueryApi::new(db);
//! let summary = api.seller_summary(&"seller-1".into()).await?;
//! ```
pub mod commission_api;
pub mod dispute_api;
pub mod escrow_flow_api;
pub mod escrow_query_api;
pub mod flow_objects;
pub mod retry;
pub mod totals_api;
pub mod totals_objects;
