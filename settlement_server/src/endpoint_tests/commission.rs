use actix_web::{http::StatusCode, test::TestRequest, web, web::ServiceConfig};
use chrono::{TimeZone, Utc};
use settlement_engine::{
    db_types::{CommissionRule, CommissionScope, CommissionType, Rate, SellerId},
    CommissionApi,
    SettlementError,
};

use super::{
    helpers::{error_message, get_request, post_request, send_request},
    mocks::MockCommissionStore,
};
use crate::routes::{
    CreateCommissionRuleRoute,
    FetchCommissionRuleRoute,
    ListCommissionRulesRoute,
    ResolveCommissionRoute,
    UpdateCommissionRuleRoute,
};

fn rule(id: i64, seller: Option<&str>, percent: f64) -> CommissionRule {
    let at = Utc.with_ymd_and_hms(2024, 10, 1, 9, 0, 0).unwrap();
    CommissionRule {
        id,
        seller_id: seller.map(SellerId::from),
        category_id: None,
        commission_type: CommissionType::Percentage,
        rate: Rate::from_percent(percent).unwrap(),
        min_order_value: None,
        max_order_value: None,
        valid_from: None,
        valid_until: None,
        is_active: true,
        notes: None,
        created_at: at,
        updated_at: at,
    }
}

fn configure_with(store: MockCommissionStore) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        cfg.service(ResolveCommissionRoute::<MockCommissionStore>::new())
            .service(CreateCommissionRuleRoute::<MockCommissionStore>::new())
            .service(ListCommissionRulesRoute::<MockCommissionStore>::new())
            .service(UpdateCommissionRuleRoute::<MockCommissionStore>::new())
            .service(FetchCommissionRuleRoute::<MockCommissionStore>::new())
            .app_data(web::Data::new(CommissionApi::new(store)));
    }
}

#[actix_web::test]
async fn resolve_picks_the_seller_override() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store
        .expect_fetch_candidate_rules()
        .withf(|seller, category| seller.as_str() == "acme" && category.is_none())
        .returning(|_, _| Ok(vec![rule(1, None, 10.0), rule(2, Some("acme"), 15.0)]));
    let (status, body) = get_request("/commission_rules/resolve?seller_id=acme&amount=10000", configure_with(store))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let resolved: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(resolved["rule_id"], 2);
    assert_eq!(resolved["amount"], 1500);
    assert_eq!(resolved["scope"], serde_json::json!(CommissionScope::Seller));
}

#[actix_web::test]
async fn resolve_without_any_rule_is_a_conflict() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store.expect_fetch_candidate_rules().returning(|_, _| Ok(vec![]));
    let (status, body) = get_request("/commission_rules/resolve?seller_id=acme&amount=10000", configure_with(store))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(error_message(&body).starts_with("No commission rule applies to seller acme"));
}

#[actix_web::test]
async fn create_rule_validates_the_rate() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store.expect_insert_commission_rule().never();
    let body = serde_json::json!({ "seller_id": "acme", "commission_rate": 120.0 });
    let (status, body) = post_request("/commission_rules", &body, configure_with(store)).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("commission_rate"));
}

#[actix_web::test]
async fn create_rule() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store
        .expect_insert_commission_rule()
        .withf(|r| r.seller_id == Some(SellerId::from("acme")) && r.commission_rate == Rate::from_ppm(80_000))
        .returning(|_| Ok(rule(7, Some("acme"), 8.0)));
    let body = serde_json::json!({ "seller_id": "acme", "commission_rate": 8.0 });
    let (status, body) = post_request("/commission_rules", &body, configure_with(store)).await.expect("Request failed");
    assert_eq!(status, StatusCode::CREATED);
    let created: CommissionRule = serde_json::from_str(&body).unwrap();
    assert_eq!(created.id, 7);
}

#[actix_web::test]
async fn overlapping_rule_is_a_conflict() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store.expect_insert_commission_rule().returning(|_| Err(SettlementError::OverlappingRule(1)));
    let body = serde_json::json!({ "commission_rate": 12.0 });
    let (status, _) = post_request("/commission_rules", &body, configure_with(store)).await.expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn missing_rule_is_not_found() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store.expect_fetch_commission_rule().returning(|_| Ok(None));
    let (status, body) = get_request("/commission_rules/42", configure_with(store)).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "The data was not found. The requested commission rule #42 does not exist");
}

#[actix_web::test]
async fn list_rules_passes_the_filter_through() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store
        .expect_search_commission_rules()
        .withf(|f| f.seller_id == Some(SellerId::from("acme")) && f.active_only)
        .returning(|_| Ok(vec![rule(2, Some("acme"), 15.0)]));
    let (status, body) = get_request("/commission_rules?seller_id=acme&active_only=true", configure_with(store))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let rules: Vec<CommissionRule> = serde_json::from_str(&body).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].rate, Rate::from_ppm(150_000));
}

#[actix_web::test]
async fn update_rule() {
    let _ = env_logger::try_init().ok();
    let mut store = MockCommissionStore::new();
    store
        .expect_update_commission_rule()
        .withf(|id, update| *id == 2 && update.is_active == Some(false))
        .returning(|_, _| {
            let mut r = rule(2, Some("acme"), 12.5);
            r.is_active = false;
            Ok(r)
        });
    let req = TestRequest::put()
        .uri("/commission_rules/2")
        .set_json(serde_json::json!({ "seller_id": "acme", "commission_rate": 12.5, "is_active": false }));
    let (status, body) = send_request(req, configure_with(store)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let updated: CommissionRule = serde_json::from_str(&body).unwrap();
    assert!(!updated.is_active);
}
