use crate::{
    db_types::{CategoryId, CommissionRule, CommissionRuleUpdate, NewCommissionRule, SellerId},
    traits::{data_objects::RuleQueryFilter, SettlementError},
};

/// Storage of commission rules.
///
/// Backends must refuse to store a rule that overlaps an active rule of the same scope (see
/// [`crate::commission::find_overlap`]), and must perform that check in the same transaction as the write.
#[allow(async_fn_in_trait)]
pub trait CommissionRules {
    async fn insert_commission_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule, SettlementError>;

    /// Replaces the mutable fields of rule `id`. The overlap check excludes the rule itself.
    async fn update_commission_rule(
        &self,
        id: i64,
        update: CommissionRuleUpdate,
    ) -> Result<CommissionRule, SettlementError>;

    async fn fetch_commission_rule(&self, id: i64) -> Result<Option<CommissionRule>, SettlementError>;

    async fn search_commission_rules(&self, filter: RuleQueryFilter) -> Result<Vec<CommissionRule>, SettlementError>;

    /// Every active rule that could apply to the seller/category pair: rules for this seller (with or without a
    /// category), rules for this category without a seller, and global rules.
    async fn fetch_candidate_rules(
        &self,
        seller_id: SellerId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<CommissionRule>, SettlementError>;
}
