//! Escrow allocation and lifecycle rules.
//!
//! [`allocation`] apportions a captured payment across the sellers on an order. [`lifecycle`] decides how an
//! allocation moves between `Pending`, `Held`, `Frozen`, `Released` and `Refunded` in response to shipments,
//! releases, cancellations and disputes. Both are pure: they compute what should change and leave applying it to
//! the database backend.
pub mod allocation;
pub mod lifecycle;
mod policy;

pub use allocation::{check_capture, split_capture, RemainderPolicy, SplitLine};
pub use lifecycle::{plan_transition, LifecycleEvent};
pub use policy::{EscrowPolicy, GatewayRetryPolicy};
