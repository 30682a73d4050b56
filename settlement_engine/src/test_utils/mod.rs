//! Helpers for tests of the settlement engine and the crates that use it.
mod collaborators;
pub mod prepare_env;

pub use collaborators::{FixedShippingQuotes, FlatTaxRate, RecordingGateway};
pub use prepare_env::{prepare_test_env, random_db_url};
