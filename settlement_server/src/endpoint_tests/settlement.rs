use actix_web::{http::StatusCode, web, web::ServiceConfig};
use settlement_engine::{
    api::flow_objects::{CancellationOutcome, CaptureNotification, CaptureOutcome},
    db_types::{
        AllocationStatus,
        Cents,
        NewCommissionRule,
        NewOrder,
        NewOrderItem,
        OrderId,
        Rate,
        SellerId,
        ShippingAddress,
    },
    escrow::EscrowPolicy,
    events::EventProducers,
    test_utils::{prepare_test_env, random_db_url},
    totals::TotalsPolicy,
    traits::{CommissionRules, GatewayError, RefundReceipt},
    EscrowFlowApi,
    EscrowQueryApi,
    SqliteDatabase,
    TotalsApi,
};

use super::{
    helpers::{error_message, get_request, post_request},
    mocks::MockGateway,
};
use crate::routes::{
    CalculateTotalsRoute,
    CancelOrderRoute,
    CaptureWebhookRoute,
    CommissionStatisticsRoute,
    EscrowForOrderRoute,
    ListAllocationsRoute,
    PlaceOrderRoute,
    SellerCommissionSummaryRoute,
    SellerCommissionsRoute,
};

fn order(id: &str) -> NewOrder {
    let items = vec![
        NewOrderItem::new("mug", "acme", 2, Cents::from(5000)),
        NewOrderItem::new("poster", "brightco", 1, Cents::from(5000)),
    ];
    NewOrder::new(OrderId::from(id), "alice", "USD", items).with_charges(
        Cents::from(1000),
        Cents::from(1200),
        Cents::from(0),
    )
}

async fn prepare_db() -> SqliteDatabase {
    let db = prepare_test_env(&random_db_url()).await;
    db.insert_commission_rule(NewCommissionRule::new(Rate::from_ppm(100_000)))
        .await
        .expect("Could not create the global commission rule");
    db
}

fn configure(db: SqliteDatabase, gateway: MockGateway) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let flow_api = EscrowFlowApi::new(db.clone(), gateway, EventProducers::default(), EscrowPolicy::default());
        cfg.service(PlaceOrderRoute::<SqliteDatabase, MockGateway>::new())
            .service(CaptureWebhookRoute::<SqliteDatabase, MockGateway>::new())
            .service(CancelOrderRoute::<SqliteDatabase, MockGateway>::new())
            .service(EscrowForOrderRoute::<SqliteDatabase>::new())
            .service(CalculateTotalsRoute::<SqliteDatabase>::new())
            .service(ListAllocationsRoute::<SqliteDatabase>::new())
            .service(SellerCommissionsRoute::<SqliteDatabase>::new())
            .service(SellerCommissionSummaryRoute::<SqliteDatabase>::new())
            .service(CommissionStatisticsRoute::<SqliteDatabase>::new())
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(EscrowQueryApi::new(db.clone())))
            .app_data(web::Data::new(TotalsApi::new(db, TotalsPolicy::default())));
    }
}

async fn place_and_capture(db: &SqliteDatabase, order_id: &str) -> CaptureOutcome {
    let (status, body) =
        post_request("/orders", &order(order_id), configure(db.clone(), MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    let capture = CaptureNotification::new(OrderId::from(order_id), "cap_001", Cents::from(17_200), "USD");
    let (status, body) =
        post_request("/capture", &capture, configure(db.clone(), MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    serde_json::from_str(&body).unwrap()
}

#[actix_web::test]
async fn capture_splits_across_sellers() {
    let db = prepare_db().await;
    let outcome = place_and_capture(&db, "ord-100").await;
    assert!(!outcome.replayed);
    assert_eq!(outcome.escrow.total_amount, Cents::from(17_200));
    let amount_for = |seller: &str| {
        outcome.allocations.iter().find(|a| a.seller_id == SellerId::from(seller)).map(|a| a.amount).unwrap()
    };
    // The leftover cent goes to the seller with the larger share
    assert_eq!(amount_for("acme"), Cents::from(11_467));
    assert_eq!(amount_for("brightco"), Cents::from(5_733));
    assert!(outcome.allocations.iter().all(|a| a.status == AllocationStatus::Pending));

    let (status, body) = get_request("/orders/ord-100/escrow", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let details: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(details["escrow"]["total_amount"], 17_200);
    assert_eq!(details["allocations"].as_array().map(Vec::len), Some(2));
}

#[actix_web::test]
async fn repeated_capture_is_replayed() {
    let db = prepare_db().await;
    let first = place_and_capture(&db, "ord-101").await;
    let capture = CaptureNotification::new(OrderId::from("ord-101"), "cap_001", Cents::from(17_200), "USD");
    let (status, body) =
        post_request("/capture", &capture, configure(db.clone(), MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let second: CaptureOutcome = serde_json::from_str(&body).unwrap();
    assert!(second.replayed);
    assert_eq!(second.escrow.id, first.escrow.id);
    assert_eq!(second.allocations.len(), 2);
}

#[actix_web::test]
async fn capture_for_unknown_order_is_not_found() {
    let db = prepare_db().await;
    let capture = CaptureNotification::new(OrderId::from("ord-nope"), "cap_001", Cents::from(17_200), "USD");
    let (status, body) = post_request("/capture", &capture, configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("ord-nope"));
}

#[actix_web::test]
async fn short_capture_is_a_conflict() {
    let db = prepare_db().await;
    let (status, _) =
        post_request("/orders", &order("ord-102"), configure(db.clone(), MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let capture = CaptureNotification::new(OrderId::from("ord-102"), "cap_001", Cents::from(15_000), "USD");
    let (status, _) = post_request("/capture", &capture, configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::CONFLICT);
}

#[actix_web::test]
async fn cancel_refunds_every_allocation() {
    let db = prepare_db().await;
    place_and_capture(&db, "ord-103").await;
    let mut gateway = MockGateway::new();
    gateway
        .expect_refund()
        .times(2)
        .returning(|req| Ok(RefundReceipt { reference: format!("re_{}", req.idempotency_key) }));
    let body = serde_json::json!({ "reason": "customer changed their mind" });
    let (status, body) = post_request("/orders/ord-103/cancel", &body, configure(db, gateway)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    let outcome: CancellationOutcome = serde_json::from_str(&body).unwrap();
    assert_eq!(outcome.refunded.len(), 2);
    assert!(outcome.refunded.iter().all(|a| a.status == AllocationStatus::Refunded));
    let refunded: Cents = outcome.refunded.iter().map(|a| a.refunded_amount).sum();
    assert_eq!(refunded, Cents::from(17_200));
}

#[actix_web::test]
async fn rejected_refund_is_a_bad_gateway() {
    let db = prepare_db().await;
    place_and_capture(&db, "ord-104").await;
    let mut gateway = MockGateway::new();
    gateway.expect_refund().times(1).returning(|_| Err(GatewayError::Rejected("card closed".into())));
    let body = serde_json::json!({ "reason": "out of stock" });
    let (status, body) =
        post_request("/orders/ord-104/cancel", &body, configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(error_message(&body).contains("card closed"));

    // Nothing was moved, so the escrow is still intact
    let (status, body) = get_request("/orders/ord-104/escrow", configure(db, MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let details: serde_json::Value = serde_json::from_str(&body).unwrap();
    let statuses = details["allocations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["allocation"]["status"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(statuses, vec!["Pending", "Pending"]);
}

#[actix_web::test]
async fn escrow_for_unknown_order_is_not_found() {
    let db = prepare_db().await;
    let (status, body) =
        get_request("/orders/ord-missing/escrow", configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(error_message(&body).contains("ord-missing"));
}

#[actix_web::test]
async fn totals_with_unknown_address_is_rejected() {
    let db = prepare_db().await;
    let body = serde_json::json!({
        "items": [{ "product_id": "mug", "seller_id": "acme", "quantity": 1, "price": 5000 }],
        "shipping_address_id": "addr-404"
    });
    let (status, body) = post_request("/totals", &body, configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("address 'addr-404' was not found"));
}

#[actix_web::test]
async fn oversized_order_is_rejected() {
    let db = prepare_db().await;
    let items = vec![
        NewOrderItem::new("yacht", "acme", 1, Cents::from(i64::MAX - 100)),
        NewOrderItem::new("poster", "brightco", 1, Cents::from(5000)),
    ];
    let order = NewOrder::new(OrderId::from("ord-105"), "alice", "USD", items);
    let (status, body) = post_request("/orders", &order, configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("the cart total is too large"));
}

#[actix_web::test]
async fn totals_for_a_near_limit_cart_are_rejected() {
    let db = prepare_db().await;
    let address = ShippingAddress {
        id: "addr-1".into(),
        customer_id: "alice".into(),
        country: "US".into(),
        state: Some("CA".into()),
        postal_code: Some("94103".into()),
        city: None,
    };
    db.save_shipping_address(&address).await.expect("Could not save the address");
    let body = serde_json::json!({
        "items": [{ "product_id": "yacht", "seller_id": "acme", "quantity": 1, "price": i64::MAX - 100 }],
        "shipping_address_id": "addr-1"
    });
    let (status, body) = post_request("/totals", &body, configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("the cart total is too large"));
}

#[actix_web::test]
async fn allocations_are_listed_by_seller_and_page() {
    let db = prepare_db().await;
    place_and_capture(&db, "ord-200").await;
    place_and_capture(&db, "ord-201").await;

    let (status, body) = get_request("/allocations?seller_id=acme", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["pagination"]["total"], 2);
    let sellers = page["data"].as_array().unwrap().iter().map(|a| a["seller_id"].clone()).collect::<Vec<_>>();
    assert_eq!(sellers, vec!["acme", "acme"]);

    let (_, body) = get_request("/allocations?limit=3&page=2", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["pagination"]["total"], 4);
    assert_eq!(page["pagination"]["total_pages"], 2);
    assert_eq!(page["data"].as_array().map(Vec::len), Some(1));

    let (_, body) = get_request("/allocations?status=Released", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["pagination"]["total"], 0);

    let (status, body) =
        get_request("/allocations?page=0", configure(db, MockGateway::new())).await.expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("page"));
}

#[actix_web::test]
async fn seller_commission_history_and_summary() {
    let db = prepare_db().await;
    place_and_capture(&db, "ord-202").await;

    let (status, body) = get_request("/sellers/acme/commissions", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["pagination"]["total"], 1);
    assert_eq!(page["data"][0]["order_id"], "ord-202");
    assert_eq!(page["data"][0]["allocation_amount"], 11_467);
    assert_eq!(page["data"][0]["amount"], 1_147);

    let (_, body) = get_request("/sellers/acme/commissions?state=Earned", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    let page: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(page["pagination"]["total"], 0);

    let (status, body) = get_request("/sellers/acme/commission_summary", configure(db, MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK);
    let summary: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(summary["seller_id"], "acme");
    assert_eq!(summary["total"]["amount"], 1_147);
    assert_eq!(summary["pending"]["count"], 1);
    assert_eq!(summary["earned"]["count"], 0);
}

#[actix_web::test]
async fn refunded_commissions_are_cancelled_in_the_statistics() {
    let db = prepare_db().await;
    place_and_capture(&db, "ord-203").await;
    let (status, body) = get_request("/commissions/statistics", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    assert_eq!(status, StatusCode::OK, "{body}");
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["total"]["count"], 2);
    assert_eq!(stats["total"]["amount"], 1_720);
    assert_eq!(stats["allocation_amount"], 17_200);
    assert_eq!(stats["pending"]["count"], 2);

    let mut gateway = MockGateway::new();
    gateway
        .expect_refund()
        .times(2)
        .returning(|req| Ok(RefundReceipt { reference: format!("re_{}", req.idempotency_key) }));
    let body = serde_json::json!({ "reason": "duplicate order" });
    let (status, _) =
        post_request("/orders/ord-203/cancel", &body, configure(db.clone(), gateway)).await.expect("Request failed");
    assert_eq!(status, StatusCode::OK);

    let (_, body) = get_request("/commissions/statistics", configure(db.clone(), MockGateway::new()))
        .await
        .expect("Request failed");
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["pending"]["count"], 0);
    assert_eq!(stats["cancelled"]["count"], 2);
    assert_eq!(stats["cancelled"]["amount"], 1_720);

    let (status, _) = get_request(
        "/commissions/statistics?since=2030-01-02T00:00:00Z&until=2030-01-01T00:00:00Z",
        configure(db, MockGateway::new()),
    )
    .await
    .expect("Request failed");
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
