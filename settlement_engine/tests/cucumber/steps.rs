use std::str::FromStr;

use chrono::{Duration, Utc};
use cucumber::{given, then, when};
use settlement_engine::{
    api::{
        flow_objects::{CaptureNotification, OpenDisputeRequest, ShipmentConfirmation},
        totals_objects::{CalculateTotalsRequest, CartItem},
    },
    db_types::{
        AllocationStatus,
        Cents,
        CategoryId,
        Coupon,
        DiscountType,
        DisputeResolution,
        MovementKind,
        NewCommissionRule,
        NewOrder,
        NewOrderItem,
        OrderId,
        OrderStatusType,
        Rate,
        SellerId,
        ShippingAddress,
    },
    traits::{SettlementDatabase, SettlementError},
};

use crate::cucumber::SettlementWorld;

fn cents(s: &str) -> Cents {
    Cents::from_str(s).unwrap_or_else(|e| panic!("Not a valid amount: {e}"))
}

fn rate(s: &str) -> Rate {
    Rate::from_str(s).unwrap_or_else(|e| panic!("Not a valid rate: {e}"))
}

//--------------------------------------     Commission rules     ------------------------------------------------------

#[given(expr = "a global commission rate of {word}")]
async fn global_rate(world: &mut SettlementWorld, percent: String) {
    let rule = NewCommissionRule::new(rate(&percent)).with_notes("Global default");
    world.system().commissions.create_rule(rule).await.expect("Error creating global rule");
}

#[given(expr = "seller {word} has a commission rate of {word}")]
async fn seller_rate(world: &mut SettlementWorld, seller: String, percent: String) {
    let rule = NewCommissionRule::new(rate(&percent)).for_seller(seller);
    world.system().commissions.create_rule(rule).await.expect("Error creating seller rule");
}

#[given(expr = "seller {word} has a commission rate of {word} in category {word}")]
async fn seller_category_rate(world: &mut SettlementWorld, seller: String, percent: String, category: String) {
    let rule = NewCommissionRule::new(rate(&percent)).for_seller(seller).for_category(category);
    world.system().commissions.create_rule(rule).await.expect("Error creating seller+category rule");
}

#[given(expr = "category {word} has a commission rate of {word}")]
async fn category_rate(world: &mut SettlementWorld, category: String, percent: String) {
    let rule = NewCommissionRule::new(rate(&percent)).for_category(category);
    world.system().commissions.create_rule(rule).await.expect("Error creating category rule");
}

#[given(expr = "seller {word} had a commission rate of {word} that expired yesterday")]
async fn expired_seller_rate(world: &mut SettlementWorld, seller: String, percent: String) {
    let now = Utc::now();
    let rule = NewCommissionRule::new(rate(&percent))
        .for_seller(seller)
        .valid_between(Some(now - Duration::days(30)), Some(now - Duration::days(1)));
    world.system().commissions.create_rule(rule).await.expect("Error creating expired rule");
}

#[when(expr = "I add a second global commission rate of {word}")]
async fn second_global_rate(world: &mut SettlementWorld, percent: String) {
    let rule = NewCommissionRule::new(rate(&percent));
    let result = world.system().commissions.create_rule(rule).await;
    world.record(result);
}

#[when(expr = "I resolve the commission for seller {word} on an order of {word}")]
async fn resolve_without_category(world: &mut SettlementWorld, seller: String, value: String) {
    let seller = SellerId::from(seller);
    let result = world.system().commissions.resolve(&seller, None, cents(&value), Utc::now()).await;
    world.last_resolution = world.record(result);
}

#[when(expr = "I resolve the commission for seller {word} in category {word} on an order of {word}")]
async fn resolve_with_category(world: &mut SettlementWorld, seller: String, category: String, value: String) {
    let seller = SellerId::from(seller);
    let category = CategoryId::from(category);
    let result = world.system().commissions.resolve(&seller, Some(&category), cents(&value), Utc::now()).await;
    world.last_resolution = world.record(result);
}

#[then(expr = "the resolved rate is {word} and the commission is {word}")]
async fn check_resolution(world: &mut SettlementWorld, percent: String, amount: String) {
    let resolved = world.last_resolution.as_ref().expect("No commission was resolved");
    assert_eq!(resolved.rate, rate(&percent), "Wrong rate resolved");
    assert_eq!(resolved.amount, cents(&amount), "Wrong commission amount");
}

#[then("no commission rule applies")]
async fn check_no_rule(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::NoCommissionRule { .. })),
        "Expected NoCommissionRule, got {:?}",
        world.last_error
    );
}

#[then("the rule is refused as overlapping")]
async fn check_overlap(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::OverlappingRule(_))),
        "Expected OverlappingRule, got {:?}",
        world.last_error
    );
}

//--------------------------------------          Orders          ------------------------------------------------------

#[given(expr = "the order includes {int} x {word} from seller {word} at {word}")]
async fn order_item(world: &mut SettlementWorld, quantity: i64, product: String, seller: String, price: String) {
    world.pending_items.push(NewOrderItem::new(&product, seller, quantity, cents(&price)));
}

#[given(expr = "the order includes {int} x {word} from seller {word} at {word} in category {word}")]
async fn order_item_in_category(
    world: &mut SettlementWorld,
    quantity: i64,
    product: String,
    seller: String,
    price: String,
    category: String,
) {
    let item = NewOrderItem::new(&product, seller, quantity, cents(&price)).with_category(category);
    world.pending_items.push(item);
}

#[given(expr = "customer {word} places order {word} with shipping {word} and tax {word}")]
async fn place_order(world: &mut SettlementWorld, customer: String, order_id: String, shipping: String, tax: String) {
    let items = std::mem::take(&mut world.pending_items);
    let order = NewOrder::new(OrderId::from(order_id), customer, "USD", items).with_charges(
        cents(&shipping),
        cents(&tax),
        Cents::default(),
    );
    world.system().flow.place_order(order).await.expect("Error placing order");
}

#[then(expr = "order {word} has status {word}")]
async fn check_order_status(world: &mut SettlementWorld, order_id: String, status: String) {
    let order = world.system().queries.fetch_order(&OrderId::from(order_id)).await.expect("Error fetching order");
    let expected = OrderStatusType::from_str(&status).expect("Not a valid order status");
    assert_eq!(order.status, expected);
}

#[then(expr = "order {word} has a total of {word}")]
async fn check_order_total(world: &mut SettlementWorld, order_id: String, total: String) {
    let order = world.system().queries.fetch_order(&OrderId::from(order_id)).await.expect("Error fetching order");
    assert_eq!(order.total, cents(&total));
}

//--------------------------------------         Captures         ------------------------------------------------------

#[when(expr = "the gateway captures {word} for order {word} with reference {word}")]
async fn capture(world: &mut SettlementWorld, amount: String, order_id: String, reference: String) {
    let notification = CaptureNotification::new(OrderId::from(order_id), &reference, cents(&amount), "USD");
    let result = world.system().flow.process_capture(notification).await;
    world.last_capture = world.record(result);
}

#[then("the capture was accepted")]
async fn check_capture_accepted(world: &mut SettlementWorld) {
    let outcome = world.last_capture.as_ref().unwrap_or_else(|| panic!("Capture failed: {:?}", world.last_error));
    assert!(!outcome.replayed, "The capture was a replay");
}

#[then("the capture was a replay")]
async fn check_capture_replayed(world: &mut SettlementWorld) {
    let outcome = world.last_capture.as_ref().unwrap_or_else(|| panic!("Capture failed: {:?}", world.last_error));
    assert!(outcome.replayed, "The capture was processed again");
}

#[then("the capture was rejected with an allocation mismatch")]
async fn check_capture_mismatch(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::AllocationMismatch { .. })),
        "Expected AllocationMismatch, got {:?}",
        world.last_error
    );
}

#[then(expr = "order {word} has {int} allocation(s)")]
async fn check_allocation_count(world: &mut SettlementWorld, order_id: String, count: usize) {
    let allocations =
        world.system().db.fetch_allocations_for_order(&OrderId::from(order_id)).await.expect("Error fetching");
    assert_eq!(allocations.len(), count);
}

#[then(expr = "the allocations for order {word} add up to {word}")]
async fn check_allocation_sum(world: &mut SettlementWorld, order_id: String, total: String) {
    let order_id = OrderId::from(order_id);
    let allocations = world.system().db.fetch_allocations_for_order(&order_id).await.expect("Error fetching");
    let sum: Cents = allocations.iter().map(|a| a.amount).sum();
    assert_eq!(sum, cents(&total));
    let escrow = world.system().queries.escrow_details(&order_id).await.expect("Error fetching escrow");
    assert_eq!(escrow.escrow.total_amount, sum);
}

#[then(expr = "seller {word} is allocated {word} on order {word}")]
async fn check_allocation_amount(world: &mut SettlementWorld, seller: String, amount: String, order_id: String) {
    let allocation = world.allocation(&order_id, &seller).await;
    assert_eq!(allocation.amount, cents(&amount), "Wrong allocation for seller {seller}");
}

#[then(expr = "seller {word} pays {word} commission on order {word}")]
async fn check_commission(world: &mut SettlementWorld, seller: String, amount: String, order_id: String) {
    let details = world.system().queries.escrow_details(&OrderId::from(order_id)).await.expect("Error fetching escrow");
    let allocation = details.allocation_for(&SellerId::from(seller.clone())).expect("Seller has no allocation");
    let commission = allocation.commission.as_ref().expect("No commission recorded");
    assert_eq!(commission.amount, cents(&amount), "Wrong commission for seller {seller}");
}

#[then(expr = "seller {word}'s allocation on order {word} is {word}")]
async fn check_allocation_status(world: &mut SettlementWorld, seller: String, order_id: String, status: String) {
    let allocation = world.allocation(&order_id, &seller).await;
    let expected = AllocationStatus::from_str(&status).expect("Not a valid allocation status");
    assert_eq!(allocation.status, expected, "Wrong status for seller {seller}");
}

//--------------------------------------  Shipping and releases   -----------------------------------------------------

#[when(expr = "seller {word} ships order {word} with tracking {word} {int} days ago")]
async fn ship(world: &mut SettlementWorld, seller: String, order_id: String, tracking: String, days: i64) {
    let at = Utc::now() - Duration::days(days);
    let confirmation = ShipmentConfirmation::shipped(OrderId::from(order_id), seller, &tracking, at).with_carrier("UPS");
    let result = world.system().flow.confirm_shipment(confirmation).await;
    world.record(result);
}

#[when(expr = "the carrier delivers tracking {word} from seller {word} on order {word} {int} days ago")]
async fn deliver(world: &mut SettlementWorld, tracking: String, seller: String, order_id: String, days: i64) {
    let at = Utc::now() - Duration::days(days);
    let confirmation =
        ShipmentConfirmation::shipped(OrderId::from(order_id), seller, &tracking, at - Duration::days(1)).delivered_at(at);
    let result = world.system().flow.confirm_shipment(confirmation).await;
    world.record(result);
}

#[when("the release sweep runs")]
async fn sweep(world: &mut SettlementWorld) {
    let result = world.system().flow.run_release_sweep(Utc::now()).await.expect("Error running the sweep");
    world.last_sweep = Some(result);
}

#[then(expr = "the sweep released {int} allocation(s)")]
async fn check_sweep(world: &mut SettlementWorld, count: usize) {
    let sweep = world.last_sweep.as_ref().expect("The sweep has not run");
    assert_eq!(sweep.successful(), count, "Sweep result: {sweep}");
    assert!(sweep.failed.is_empty(), "Sweep failures: {:?}", sweep.failed);
}

#[when(expr = "I release seller {word}'s allocation on order {word}")]
async fn release(world: &mut SettlementWorld, seller: String, order_id: String) {
    let allocation = world.allocation(&order_id, &seller).await;
    let result = world.system().flow.release_allocation(allocation.id, Utc::now()).await;
    world.record(result);
}

#[then("the release is refused as not yet due")]
async fn check_release_not_due(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::ReleaseNotDue { .. })),
        "Expected ReleaseNotDue, got {:?}",
        world.last_error
    );
}

#[then("the step fails with an invalid state transition")]
async fn check_invalid_transition(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::InvalidStateTransition { .. })),
        "Expected InvalidStateTransition, got {:?}",
        world.last_error
    );
}

#[when(expr = "order {word} is cancelled")]
async fn cancel(world: &mut SettlementWorld, order_id: String) {
    let result = world.system().flow.cancel_order(&OrderId::from(order_id), "Customer request").await;
    world.record(result);
}

#[then(expr = "the gateway has refunded {word}")]
async fn check_refunded(world: &mut SettlementWorld, amount: String) {
    assert_eq!(world.system().gateway.refunded_total(), cents(&amount));
}

#[then(expr = "seller {word} has {word} held and {word} available for payout")]
async fn check_summary(world: &mut SettlementWorld, seller: String, held: String, available: String) {
    let summary = world.system().queries.seller_summary(&SellerId::from(seller)).await.expect("Error fetching summary");
    assert_eq!(summary.held, cents(&held), "Wrong held amount");
    assert_eq!(summary.available, cents(&available), "Wrong available amount");
}

//--------------------------------------         Disputes         ------------------------------------------------------

#[when(expr = "the customer disputes seller {word}'s allocation on order {word} because {string}")]
async fn open_dispute(world: &mut SettlementWorld, seller: String, order_id: String, reason: String) {
    let allocation = world.allocation(&order_id, &seller).await;
    let request = OpenDisputeRequest::new(allocation.id, &reason, "customer");
    let result = world.system().disputes.open_dispute(request).await;
    if let Some(dispute) = world.record(result) {
        world.last_dispute = Some(dispute);
    }
}

#[then("the dispute is refused as a duplicate")]
async fn check_duplicate_dispute(world: &mut SettlementWorld) {
    assert!(
        matches!(world.last_error, Some(SettlementError::DuplicateDispute(_))),
        "Expected DuplicateDispute, got {:?}",
        world.last_error
    );
}

#[when(expr = "the dispute is settled with {word} released and {word} refunded")]
async fn settle_dispute(world: &mut SettlementWorld, released: String, refunded: String) {
    let dispute = world.last_dispute.as_ref().expect("No dispute has been opened");
    let resolution = DisputeResolution::Settle { release_amount: cents(&released), refund_amount: cents(&refunded) };
    let result = world.system().disputes.resolve_dispute(dispute.id, resolution, Utc::now()).await;
    world.record(result);
}

#[when("the dispute is dismissed")]
async fn dismiss_dispute(world: &mut SettlementWorld) {
    let dispute = world.last_dispute.as_ref().expect("No dispute has been opened");
    let result = world.system().disputes.resolve_dispute(dispute.id, DisputeResolution::Dismiss, Utc::now()).await;
    world.record(result);
}

#[then(expr = "seller {word}'s allocation on order {word} moved {word} to the seller and {word} to the customer")]
async fn check_movements(world: &mut SettlementWorld, seller: String, order_id: String, paid: String, refund: String) {
    let details = world.system().queries.escrow_details(&OrderId::from(order_id)).await.expect("Error fetching escrow");
    let allocation = details.allocation_for(&SellerId::from(seller)).expect("Seller has no allocation");
    let moved = |kind| allocation.movements.iter().filter(|m| m.kind == kind).map(|m| m.amount).sum::<Cents>();
    assert_eq!(moved(MovementKind::Release), cents(&paid));
    assert_eq!(moved(MovementKind::Refund), cents(&refund));
    assert_eq!(moved(MovementKind::Release) + moved(MovementKind::Refund), allocation.allocation.amount);
    assert_eq!(allocation.allocation.released_amount, cents(&paid));
    assert_eq!(allocation.allocation.refunded_amount, cents(&refund));
}

//--------------------------------------          Totals          ------------------------------------------------------

#[given(expr = "customer {word} ships to address {word} in {word} {word} {word}")]
async fn shipping_address(
    world: &mut SettlementWorld,
    customer: String,
    address_id: String,
    country: String,
    state: String,
    postal_code: String,
) {
    let address = ShippingAddress {
        id: address_id,
        customer_id: customer,
        country,
        state: Some(state),
        postal_code: Some(postal_code),
        city: None,
    };
    world.system().db.save_shipping_address(&address).await.expect("Error saving address");
}

#[given(expr = "coupon {word} takes {word} off orders of at least {word}")]
async fn fixed_coupon(world: &mut SettlementWorld, code: String, amount: String, minimum: String) {
    let coupon = Coupon {
        code,
        discount_type: DiscountType::Fixed,
        value: cents(&amount).value(),
        min_subtotal: Some(cents(&minimum)),
        valid_from: None,
        valid_until: None,
        is_active: true,
    };
    world.system().db.save_coupon(&coupon).await.expect("Error saving coupon");
}

#[given(expr = "coupon {word} took {word} off but expired yesterday")]
async fn expired_coupon(world: &mut SettlementWorld, code: String, percent: String) {
    let now = Utc::now();
    let coupon = Coupon {
        code,
        discount_type: DiscountType::Percentage,
        value: rate(&percent).ppm(),
        min_subtotal: None,
        valid_from: Some(now - Duration::days(30)),
        valid_until: Some(now - Duration::days(1)),
        is_active: true,
    };
    world.system().db.save_coupon(&coupon).await.expect("Error saving coupon");
}

#[given(expr = "the cart holds {int} x {word} from seller {word} at {word}")]
async fn cart_item(world: &mut SettlementWorld, quantity: i64, product: String, seller: String, price: String) {
    world.cart.push(CartItem::new(&product, quantity, cents(&price)).sold_by(seller));
}

async fn price_cart(world: &mut SettlementWorld, request: CalculateTotalsRequest) {
    let result = world.system().totals.calculate(request).await;
    world.last_totals = world.record(result);
}

#[when(expr = "I price the cart for address {word}")]
async fn price(world: &mut SettlementWorld, address_id: String) {
    let request = CalculateTotalsRequest::new(world.cart.clone(), address_id);
    price_cart(world, request).await;
}

#[when(expr = "I price the cart for address {word} with {word} shipping")]
async fn price_with_method(world: &mut SettlementWorld, address_id: String, method: String) {
    let request = CalculateTotalsRequest::new(world.cart.clone(), address_id).with_shipping_method(&method);
    price_cart(world, request).await;
}

#[when(expr = "I price the cart for address {word} with coupon {word}")]
async fn price_with_coupon(world: &mut SettlementWorld, address_id: String, code: String) {
    let request = CalculateTotalsRequest::new(world.cart.clone(), address_id).with_coupon(&code);
    price_cart(world, request).await;
}

#[then(expr = "the subtotal is {word}, shipping is {word}, tax is {word} and the total is {word}")]
async fn check_totals(world: &mut SettlementWorld, subtotal: String, shipping: String, tax: String, total: String) {
    let totals = world.last_totals.as_ref().unwrap_or_else(|| panic!("Pricing failed: {:?}", world.last_error));
    assert_eq!(totals.subtotal, cents(&subtotal), "Wrong subtotal");
    assert_eq!(totals.shipping.price, cents(&shipping), "Wrong shipping");
    assert_eq!(totals.tax.amount, cents(&tax), "Wrong tax");
    assert_eq!(totals.total, cents(&total), "Wrong total");
}

#[then(expr = "the discount is {word}")]
async fn check_discount(world: &mut SettlementWorld, discount: String) {
    let totals = world.last_totals.as_ref().unwrap_or_else(|| panic!("Pricing failed: {:?}", world.last_error));
    assert_eq!(totals.discount, cents(&discount));
}

#[then(expr = "there is a warning mentioning {string}")]
async fn check_warning(world: &mut SettlementWorld, text: String) {
    let totals = world.last_totals.as_ref().unwrap_or_else(|| panic!("Pricing failed: {:?}", world.last_error));
    assert!(totals.warnings.iter().any(|w| w.contains(&text)), "No warning mentions '{text}': {:?}", totals.warnings);
}

#[then(expr = "pricing fails with a problem in {string}")]
async fn check_pricing_error(world: &mut SettlementWorld, field: String) {
    match &world.last_error {
        Some(SettlementError::ValidationError(errors)) => {
            assert!(errors.errors.iter().any(|e| e.field == field), "No error for '{field}': {errors}");
        },
        other => panic!("Expected a validation error, got {other:?}"),
    }
}
