use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use settlement_engine::db_types::{CategoryId, Cents, SellerId};

/// Query parameters for `GET /api/commission_rules/resolve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveCommissionParams {
    pub seller_id: SellerId,
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The value of the seller's share of the order
    pub amount: Cents,
    /// Resolve as of this time. Defaults to now.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

/// Optional body for `POST /api/allocations/{id}/release`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseParams {
    /// Release as of this time. Defaults to now.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderParams {
    pub reason: String,
}

/// Query parameters for `GET /api/commissions/statistics`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommissionWindowParams {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_params_from_query() {
        let params: ResolveCommissionParams =
            serde_json::from_str(r#"{"seller_id":"acme","amount":15000}"#).unwrap();
        assert_eq!(params.seller_id, SellerId::from("acme"));
        assert_eq!(params.amount, Cents::from(15_000));
        assert!(params.category_id.is_none());
        assert!(params.at.is_none());
    }
}
