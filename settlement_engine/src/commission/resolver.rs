use chrono::{DateTime, Utc};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{CategoryId, Cents, CommissionRule, CommissionScope, Rate, SellerId},
    traits::SettlementError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCommission {
    pub rule_id: i64,
    pub scope: CommissionScope,
    pub rate: Rate,
    pub order_value: Cents,
    pub amount: Cents,
}

impl ResolvedCommission {
    pub fn new(rule: &CommissionRule, order_value: Cents) -> Self {
        Self {
            rule_id: rule.id,
            scope: rule.scope(),
            rate: rule.rate,
            order_value,
            amount: commission_amount(rule.rate, order_value),
        }
    }
}

/// The commission on `value` at `rate`, rounded half-to-even to the minor unit.
pub fn commission_amount(rate: Rate, value: Cents) -> Cents {
    rate.apply(value)
}

/// Picks the rule that governs commission for a seller/category pair at time `at`.
///
/// `rules` may hold any mix of rules; those that do not apply to the pair are ignored. If two eligible rules share
/// the winning tier (which the overlap check on write should prevent), the most recently created one wins.
pub fn resolve_rule<'a>(
    rules: &'a [CommissionRule],
    seller_id: &SellerId,
    category_id: Option<&CategoryId>,
    order_value: Cents,
    at: DateTime<Utc>,
) -> Result<&'a CommissionRule, SettlementError> {
    let eligible = rules
        .iter()
        .filter(|r| r.applies_to(seller_id, category_id) && r.is_live_at(at) && r.covers_value(order_value))
        .collect::<Vec<_>>();
    for tier in CommissionScope::PRECEDENCE {
        if let Some(rule) = eligible.iter().copied().filter(|r| r.scope() == tier).max_by_key(|r| r.id) {
            trace!("🧾 Rule #{} ({tier}) governs seller {seller_id} at {}", rule.id, rule.rate);
            return Ok(rule);
        }
    }
    Err(SettlementError::NoCommissionRule {
        seller_id: seller_id.clone(),
        category: category_id.map(|c| c.to_string()).unwrap_or_else(|| "none".into()),
    })
}
