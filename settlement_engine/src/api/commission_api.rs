use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    commission::{resolve_rule, validate_rule, ResolvedCommission},
    db_types::{CategoryId, Cents, CommissionRule, CommissionRuleUpdate, CommissionScope, NewCommissionRule, Rate, SellerId},
    traits::{CommissionRules, RuleQueryFilter, SettlementError},
};

/// `CommissionApi` manages commission rules and answers "what rate applies here?".
pub struct CommissionApi<B> {
    db: B,
}

impl<B> Debug for CommissionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommissionApi")
    }
}

impl<B> CommissionApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> CommissionApi<B>
where B: CommissionRules
{
    /// Stores a new rule after validating it. A rule that overlaps an active rule of the same scope is refused with
    /// [`SettlementError::OverlappingRule`].
    pub async fn create_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule, SettlementError> {
        validate_rule(&rule)?;
        let rule = self.db.insert_commission_rule(rule).await?;
        info!("🧾 Commission rule #{} created: {} for the {} scope", rule.id, rule.rate, rule.scope());
        Ok(rule)
    }

    pub async fn update_rule(&self, id: i64, update: CommissionRuleUpdate) -> Result<CommissionRule, SettlementError> {
        validate_rule(&update.rule)?;
        let rule = self.db.update_commission_rule(id, update).await?;
        info!("🧾 Commission rule #{id} updated: {} (active: {})", rule.rate, rule.is_active);
        Ok(rule)
    }

    pub async fn fetch_rule(&self, id: i64) -> Result<CommissionRule, SettlementError> {
        self.db.fetch_commission_rule(id).await?.ok_or(SettlementError::RuleNotFound(id))
    }

    pub async fn list_rules(&self, filter: RuleQueryFilter) -> Result<Vec<CommissionRule>, SettlementError> {
        self.db.search_commission_rules(filter).await
    }

    /// Finds the rule that governs a sale by `seller_id` in `category_id` worth `order_value` at time `at`, and the
    /// commission it yields.
    pub async fn resolve(
        &self,
        seller_id: &SellerId,
        category_id: Option<&CategoryId>,
        order_value: Cents,
        at: DateTime<Utc>,
    ) -> Result<ResolvedCommission, SettlementError> {
        let rules = self.db.fetch_candidate_rules(seller_id.clone(), category_id.cloned()).await?;
        let rule = resolve_rule(&rules, seller_id, category_id, order_value, at)?;
        Ok(ResolvedCommission::new(rule, order_value))
    }

    /// Makes sure a global default exists. If an active global rule is already stored, it is left alone and `None`
    /// is returned.
    pub async fn ensure_default_rule(&self, rate: Rate) -> Result<Option<CommissionRule>, SettlementError> {
        let filter = RuleQueryFilter::default().with_scope(CommissionScope::Global).active_only();
        if !self.db.search_commission_rules(filter).await?.is_empty() {
            debug!("🧾 A global default commission rule already exists");
            return Ok(None);
        }
        let rule = NewCommissionRule::new(rate).with_notes("Global default");
        self.create_rule(rule).await.map(Some)
    }
}
