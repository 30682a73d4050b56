//! SQLite backend for the settlement engine.
//!
//! [`SqliteDatabase`] implements every backend trait in [`crate::traits`]. The free functions in [`db`] do the actual
//! SQL work against a `&mut SqliteConnection`, so they can be composed inside a single transaction.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
