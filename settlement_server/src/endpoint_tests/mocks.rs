use mockall::mock;
use settlement_engine::{
    db_types::{CategoryId, CommissionRule, CommissionRuleUpdate, NewCommissionRule, SellerId},
    traits::{
        CommissionRules,
        GatewayError,
        PaymentGateway,
        RefundReceipt,
        RefundRequest,
        RuleQueryFilter,
    },
    SettlementError,
};

mock! {
    pub CommissionStore {}
    impl CommissionRules for CommissionStore {
        async fn insert_commission_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule, SettlementError>;
        async fn update_commission_rule(&self, id: i64, update: CommissionRuleUpdate) -> Result<CommissionRule, SettlementError>;
        async fn fetch_commission_rule(&self, id: i64) -> Result<Option<CommissionRule>, SettlementError>;
        async fn search_commission_rules(&self, filter: RuleQueryFilter) -> Result<Vec<CommissionRule>, SettlementError>;
        async fn fetch_candidate_rules(&self, seller_id: SellerId, category_id: Option<CategoryId>) -> Result<Vec<CommissionRule>, SettlementError>;
    }
}

mock! {
    pub Gateway {}
    impl Clone for Gateway {
        fn clone(&self) -> Self;
    }
    impl PaymentGateway for Gateway {
        async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, GatewayError>;
    }
}
