//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every handler here is async, and all database and gateway calls are
//! awaited, so a slow refund never stalls a worker.
//!
//! Routes are grouped by scope in [`crate::server`]:
//! * `/api/...` for the storefront and operator calls,
//! * `/webhook/...` for the HMAC-signed notifications from the payment gateway and carriers.
use actix_web::{get, web, HttpResponse, Responder};
use chrono::Utc;
use log::*;
use settlement_engine::{
    api::{
        flow_objects::{CaptureNotification, OpenDisputeRequest, ShipmentConfirmation},
        totals_objects::CalculateTotalsRequest,
    },
    db_types::{CommissionRuleUpdate, DisputeResolution, NewCommissionRule, NewOrder, OrderId, SellerId},
    traits::{
        AllocationQueryFilter,
        CheckoutLookups,
        CommissionQueryFilter,
        CommissionRules,
        EscrowQueries,
        PaymentGateway,
        RuleQueryFilter,
    },
    CommissionApi,
    DisputeApi,
    EscrowFlowApi,
    EscrowQueryApi,
    SettlementDatabase,
    TotalsApi,
};

use crate::{
    data_objects::{CancelOrderParams, CommissionWindowParams, ReleaseParams, ResolveCommissionParams},
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
//
// * `impl A, B` gives the route one type parameter per bound, in order.
// * `backend A, B` gives the route a single type parameter that must satisfy every bound.
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal backend $($bounds:path),+) => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Checkout  ----------------------------------------------------
route!(calculate_totals => Post "/totals" impl CheckoutLookups);
/// Route handler for the checkout totals endpoint
///
/// Prices a cart: subtotal, the available shipping options and the selected one, sales tax, coupon discount and the
/// grand total. Nothing is stored. Coupon problems come back as `warnings` on a successful response; malformed carts
/// and unknown addresses are a 400 with every problem listed.
pub async fn calculate_totals<A: CheckoutLookups>(
    body: web::Json<CalculateTotalsRequest>,
    api: web::Data<TotalsApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    debug!("💻️ POST totals for {} items to address {}", request.items.len(), request.shipping_address_id);
    let totals = api.calculate(request).await?;
    Ok(HttpResponse::Ok().json(totals))
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(place_order => Post "/orders" impl SettlementDatabase, PaymentGateway);
/// Route handler for storing a checked-out order
///
/// Called by the storefront once the customer has confirmed checkout. Re-posting an existing order id returns the
/// stored order unchanged.
pub async fn place_order<B: SettlementDatabase, G: PaymentGateway>(
    body: web::Json<NewOrder>,
    api: web::Data<EscrowFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let order = body.into_inner();
    debug!("💻️ POST order {} for customer {}", order.order_id, order.customer_id);
    let order = api.place_order(order).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(escrow_for_order => Get "/orders/{order_id}/escrow" backend SettlementDatabase, EscrowQueries);
/// The escrow for an order, with each seller's allocation, commission, disputes, shipments and fund movements.
pub async fn escrow_for_order<A: SettlementDatabase + EscrowQueries>(
    path: web::Path<OrderId>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    debug!("💻️ GET escrow for order {order_id}");
    let details = api.escrow_details(&order_id).await?;
    Ok(HttpResponse::Ok().json(details))
}

route!(cancel_order => Post "/orders/{order_id}/cancel" impl SettlementDatabase, PaymentGateway);
/// Route handler for cancelling an order
///
/// Before capture, the order is simply marked as cancelled. After capture, every allocation that has not been paid out
/// is refunded through the payment gateway. An allocation under dispute blocks the whole cancellation.
pub async fn cancel_order<B: SettlementDatabase, G: PaymentGateway>(
    path: web::Path<OrderId>,
    body: web::Json<CancelOrderParams>,
    api: web::Data<EscrowFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let order_id = path.into_inner();
    let params = body.into_inner();
    info!("💻️ POST cancel order {order_id}: {}", params.reason);
    let outcome = api.cancel_order(&order_id, &params.reason).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

//----------------------------------------------   Commission  ----------------------------------------------------
route!(create_commission_rule => Post "/commission_rules" impl CommissionRules);
pub async fn create_commission_rule<B: CommissionRules>(
    body: web::Json<NewCommissionRule>,
    api: web::Data<CommissionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let rule = body.into_inner();
    debug!("💻️ POST commission rule for scope {:?}", rule.scope());
    let rule = api.create_rule(rule).await?;
    Ok(HttpResponse::Created().json(rule))
}

route!(update_commission_rule => Put "/commission_rules/{id}" impl CommissionRules);
pub async fn update_commission_rule<B: CommissionRules>(
    path: web::Path<i64>,
    body: web::Json<CommissionRuleUpdate>,
    api: web::Data<CommissionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ PUT commission rule #{id}");
    let rule = api.update_rule(id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rule))
}

route!(fetch_commission_rule => Get "/commission_rules/{id}" impl CommissionRules);
pub async fn fetch_commission_rule<B: CommissionRules>(
    path: web::Path<i64>,
    api: web::Data<CommissionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ GET commission rule #{id}");
    let rule = api.fetch_rule(id).await?;
    Ok(HttpResponse::Ok().json(rule))
}

route!(list_commission_rules => Get "/commission_rules" impl CommissionRules);
/// Lists commission rules. Filter with the `seller_id`, `category_id`, `scope` and `active_only` query parameters.
pub async fn list_commission_rules<B: CommissionRules>(
    query: web::Query<RuleQueryFilter>,
    api: web::Data<CommissionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let filter = query.into_inner();
    debug!("💻️ GET commission rules matching {filter:?}");
    let rules = api.list_rules(filter).await?;
    Ok(HttpResponse::Ok().json(rules))
}

route!(resolve_commission => Get "/commission_rules/resolve" impl CommissionRules);
/// Which rule governs a sale, and the commission it yields. Answers the question an operator asks before changing
/// a seller's rate.
pub async fn resolve_commission<B: CommissionRules>(
    query: web::Query<ResolveCommissionParams>,
    api: web::Data<CommissionApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let params = query.into_inner();
    let at = params.at.unwrap_or_else(Utc::now);
    debug!("💻️ GET commission for seller {} on {}", params.seller_id, params.amount);
    let resolved = api.resolve(&params.seller_id, params.category_id.as_ref(), params.amount, at).await?;
    Ok(HttpResponse::Ok().json(resolved))
}

//----------------------------------------------   Allocations  ----------------------------------------------------
route!(release_allocation => Post "/allocations/{id}/release" impl SettlementDatabase, PaymentGateway);
/// Pays out an allocation ahead of the sweep. Delivery must have been confirmed and the hold must have elapsed.
pub async fn release_allocation<B: SettlementDatabase, G: PaymentGateway>(
    path: web::Path<i64>,
    body: Option<web::Json<ReleaseParams>>,
    api: web::Data<EscrowFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let now = body.and_then(|b| b.into_inner().at).unwrap_or_else(Utc::now);
    info!("💻️ POST release allocation #{id}");
    let allocation = api.release_allocation(id, now).await?;
    Ok(HttpResponse::Ok().json(allocation))
}

//----------------------------------------------   Disputes  ----------------------------------------------------
route!(open_dispute => Post "/disputes" impl SettlementDatabase, PaymentGateway);
pub async fn open_dispute<B: SettlementDatabase, G: PaymentGateway>(
    body: web::Json<OpenDisputeRequest>,
    api: web::Data<DisputeApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let request = body.into_inner();
    info!("💻️ POST dispute on allocation #{} by {}", request.allocation_id, request.opened_by);
    let dispute = api.open_dispute(request).await?;
    Ok(HttpResponse::Created().json(dispute))
}

route!(resolve_dispute => Post "/disputes/{id}/resolve" impl SettlementDatabase, PaymentGateway);
/// Closes a dispute with `{"outcome": "dismiss"}` or
/// `{"outcome": "settle", "release_amount": .., "refund_amount": ..}`.
pub async fn resolve_dispute<B: SettlementDatabase, G: PaymentGateway>(
    path: web::Path<i64>,
    body: web::Json<DisputeResolution>,
    api: web::Data<DisputeApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    let resolution = body.into_inner();
    info!("💻️ POST resolve dispute #{id} by {resolution}");
    let allocation = api.resolve_dispute(id, resolution, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(allocation))
}

route!(fetch_dispute => Get "/disputes/{id}" impl SettlementDatabase, PaymentGateway);
pub async fn fetch_dispute<B: SettlementDatabase, G: PaymentGateway>(
    path: web::Path<i64>,
    api: web::Data<DisputeApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let id = path.into_inner();
    debug!("💻️ GET dispute #{id}");
    let dispute = api.fetch_dispute(id).await?;
    Ok(HttpResponse::Ok().json(dispute))
}

//----------------------------------------------   Reporting  ----------------------------------------------------
route!(seller_escrow_summary => Get "/sellers/{seller_id}/escrow_summary" backend SettlementDatabase, EscrowQueries);
pub async fn seller_escrow_summary<A: SettlementDatabase + EscrowQueries>(
    path: web::Path<SellerId>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let seller_id = path.into_inner();
    debug!("💻️ GET escrow summary for seller {seller_id}");
    let summary = api.seller_summary(&seller_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

route!(escrow_statistics => Get "/escrow/statistics" backend SettlementDatabase, EscrowQueries);
pub async fn escrow_statistics<A: SettlementDatabase + EscrowQueries>(
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET escrow statistics");
    let stats = api.statistics().await?;
    Ok(HttpResponse::Ok().json(stats))
}

route!(list_allocations => Get "/allocations" backend SettlementDatabase, EscrowQueries);
/// Pages through allocations, newest first. Filter with the `seller_id` and `status` query parameters and page with
/// `page` and `limit`.
pub async fn list_allocations<A: SettlementDatabase + EscrowQueries>(
    query: web::Query<AllocationQueryFilter>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let filter = query.into_inner();
    debug!("💻️ GET allocations. {filter}");
    let page = api.allocations(filter).await?;
    Ok(HttpResponse::Ok().json(page))
}

route!(seller_commissions => Get "/sellers/{seller_id}/commissions" backend SettlementDatabase, EscrowQueries);
/// A seller's commission history. Filter with `state`, `since` and `until`, and page with `page` and `limit`.
pub async fn seller_commissions<A: SettlementDatabase + EscrowQueries>(
    path: web::Path<SellerId>,
    query: web::Query<CommissionQueryFilter>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let seller_id = path.into_inner();
    debug!("💻️ GET commissions for seller {seller_id}");
    let page = api.seller_commissions(&seller_id, query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(page))
}

route!(seller_commission_summary => Get "/sellers/{seller_id}/commission_summary" backend SettlementDatabase, EscrowQueries);
pub async fn seller_commission_summary<A: SettlementDatabase + EscrowQueries>(
    path: web::Path<SellerId>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let seller_id = path.into_inner();
    debug!("💻️ GET commission summary for seller {seller_id}");
    let summary = api.seller_commission_summary(&seller_id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

route!(commission_statistics => Get "/commissions/statistics" backend SettlementDatabase, EscrowQueries);
pub async fn commission_statistics<A: SettlementDatabase + EscrowQueries>(
    query: web::Query<CommissionWindowParams>,
    api: web::Data<EscrowQueryApi<A>>,
) -> Result<HttpResponse, ServerError> {
    let window = query.into_inner();
    debug!("💻️ GET commission statistics from {:?} to {:?}", window.since, window.until);
    let stats = api.commission_statistics(window.since, window.until).await?;
    Ok(HttpResponse::Ok().json(stats))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(capture_webhook => Post "/capture" impl SettlementDatabase, PaymentGateway);
/// Route handler for the payment gateway's capture notification
///
/// The capture is split across the order's sellers exactly once. A repeated notification gets the same escrow back,
/// with `replayed` set, and a 200 so that the gateway stops retrying.
pub async fn capture_webhook<B: SettlementDatabase, G: PaymentGateway>(
    body: web::Json<CaptureNotification>,
    api: web::Data<EscrowFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let capture = body.into_inner();
    info!("💻️ Capture {} of {} for order {}", capture.capture_reference, capture.amount, capture.order_id);
    let outcome = api.process_capture(capture).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

route!(shipment_webhook => Post "/shipment" impl SettlementDatabase, PaymentGateway);
/// Route handler for carrier shipment and delivery confirmations
pub async fn shipment_webhook<B: SettlementDatabase, G: PaymentGateway>(
    body: web::Json<ShipmentConfirmation>,
    api: web::Data<EscrowFlowApi<B, G>>,
) -> Result<HttpResponse, ServerError> {
    let confirmation = body.into_inner();
    info!(
        "💻️ Shipment {} for seller {} on order {} (delivered: {})",
        confirmation.tracking_number, confirmation.seller_id, confirmation.order_id, confirmation.delivered
    );
    let allocation = api.confirm_shipment(confirmation).await?;
    Ok(HttpResponse::Ok().json(allocation))
}
