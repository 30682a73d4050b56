//! Commission rule resolution.
//!
//! Rules are matched from most to least specific: seller+category, then seller, then category, then the global
//! default. Within a tier only rules that are active, inside their validity window and whose order-value band covers
//! the order value are eligible. The first tier with an eligible rule wins.
mod resolver;
mod rule_validation;

pub use resolver::{commission_amount, resolve_rule, ResolvedCommission};
pub use rule_validation::{find_overlap, validate_rule, MAX_NOTES_LENGTH};
