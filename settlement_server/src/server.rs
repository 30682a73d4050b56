use std::time::Duration;

use actix_web::{
    dev::{Server, Service},
    error::{JsonPayloadError, PathError, QueryPayloadError},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    HttpRequest,
    HttpServer,
};
use futures::{future::ok, FutureExt};
use log::*;
use settlement_common::Rate;
use settlement_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    CommissionApi,
    DisputeApi,
    EscrowFlowApi,
    EscrowQueryApi,
    SqliteDatabase,
    TotalsApi,
};

use crate::{
    config::ServerConfig,
    errors::ServerError,
    gateway::HttpPaymentGateway,
    helpers::get_remote_ip,
    middleware::{HmacMiddlewareFactory, WEBHOOK_SIGNATURE_HEADER},
    release_worker::start_release_worker,
    routes::{
        health,
        CalculateTotalsRoute,
        CancelOrderRoute,
        CaptureWebhookRoute,
        CommissionStatisticsRoute,
        CreateCommissionRuleRoute,
        EscrowForOrderRoute,
        EscrowStatisticsRoute,
        FetchCommissionRuleRoute,
        FetchDisputeRoute,
        ListAllocationsRoute,
        ListCommissionRulesRoute,
        OpenDisputeRoute,
        PlaceOrderRoute,
        ReleaseAllocationRoute,
        ResolveCommissionRoute,
        ResolveDisputeRoute,
        SellerCommissionSummaryRoute,
        SellerCommissionsRoute,
        SellerEscrowSummaryRoute,
        ShipmentWebhookRoute,
        UpdateCommissionRuleRoute,
    },
};

const EVENT_BUFFER_SIZE: usize = 128;

type Db = SqliteDatabase;
type Gateway = HttpPaymentGateway;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let gateway = HttpPaymentGateway::new(&config.gateway)?;
    seed_default_commission_rule(&db, config.default_commission_rate).await?;
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, notification_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let sweeper = EscrowFlowApi::new(db.clone(), gateway.clone(), producers.clone(), config.escrow_policy());
    let _worker = start_release_worker(sweeper, config.sweep_interval);
    let srv = create_server_instance(config, db, gateway, producers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    gateway: HttpPaymentGateway,
    producers: EventProducers,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let policy = config.escrow_policy();
        let flow_api = EscrowFlowApi::new(db.clone(), gateway.clone(), producers.clone(), policy.clone());
        let dispute_api = DisputeApi::new(db.clone(), gateway.clone(), producers.clone(), policy);
        let commission_api = CommissionApi::new(db.clone());
        let query_api = EscrowQueryApi::new(db.clone());
        let totals_api = TotalsApi::new(db.clone(), config.totals_policy());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("settlement::access_log"))
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .app_data(web::QueryConfig::default().error_handler(query_error))
            .app_data(web::PathConfig::default().error_handler(path_error))
            .app_data(web::Data::new(flow_api))
            .app_data(web::Data::new(dispute_api))
            .app_data(web::Data::new(commission_api))
            .app_data(web::Data::new(query_api))
            .app_data(web::Data::new(totals_api));
        // `resolve` must be registered ahead of `{id}`, which would otherwise swallow it
        let api_scope = web::scope("/api")
            .service(CalculateTotalsRoute::<Db>::new())
            .service(PlaceOrderRoute::<Db, Gateway>::new())
            .service(EscrowForOrderRoute::<Db>::new())
            .service(CancelOrderRoute::<Db, Gateway>::new())
            .service(ResolveCommissionRoute::<Db>::new())
            .service(CreateCommissionRuleRoute::<Db>::new())
            .service(ListCommissionRulesRoute::<Db>::new())
            .service(UpdateCommissionRuleRoute::<Db>::new())
            .service(FetchCommissionRuleRoute::<Db>::new())
            .service(ReleaseAllocationRoute::<Db, Gateway>::new())
            .service(OpenDisputeRoute::<Db, Gateway>::new())
            .service(ResolveDisputeRoute::<Db, Gateway>::new())
            .service(FetchDisputeRoute::<Db, Gateway>::new())
            .service(SellerEscrowSummaryRoute::<Db>::new())
            .service(EscrowStatisticsRoute::<Db>::new())
            .service(ListAllocationsRoute::<Db>::new())
            .service(SellerCommissionsRoute::<Db>::new())
            .service(SellerCommissionSummaryRoute::<Db>::new())
            .service(CommissionStatisticsRoute::<Db>::new());
        let use_x_forwarded_for = config.use_x_forwarded_for;
        let use_forwarded = config.use_forwarded;
        let whitelist = config.webhooks.whitelist.clone();
        let webhook_scope = web::scope("/webhook")
            .wrap_fn(move |req, srv| {
                let peer_ip = get_remote_ip(req.request(), use_x_forwarded_for, use_forwarded);
                let allowed = match (peer_ip, &whitelist) {
                    (_, None) => true,
                    (Some(ip), Some(whitelist)) => {
                        trace!("💻️ Webhook call from {ip}");
                        whitelist.contains(&ip)
                    },
                    (None, Some(_)) => {
                        warn!("💻️ No IP address found for webhook call, denying access.");
                        false
                    },
                };
                if allowed {
                    srv.call(req)
                } else {
                    warn!("💻️ Webhook call from {peer_ip:?} is not whitelisted, denying access.");
                    ok(req.error_response(ServerError::ForbiddenPeer)).boxed_local()
                }
            })
            .wrap(HmacMiddlewareFactory::new(
                WEBHOOK_SIGNATURE_HEADER,
                config.webhooks.hmac_secret.clone(),
                config.webhooks.hmac_checks,
            ))
            .service(CaptureWebhookRoute::<Db, Gateway>::new())
            .service(ShipmentWebhookRoute::<Db, Gateway>::new());
        app.service(health).service(api_scope).service(webhook_scope)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Creates the global default commission rule if a default rate is configured and no global rule exists yet.
async fn seed_default_commission_rule(db: &SqliteDatabase, rate: Option<Rate>) -> Result<(), ServerError> {
    let Some(rate) = rate else {
        debug!("🧾 No default commission rate is configured");
        return Ok(());
    };
    let api = CommissionApi::new(db.clone());
    match api.ensure_default_rule(rate).await? {
        Some(rule) => info!("🧾 Created the global default commission rule #{} at {}", rule.id, rule.rate),
        None => info!("🧾 A global commission rule already exists. The configured default of {rate} was not applied."),
    }
    Ok(())
}

/// Logs every settlement event. Outbound notifications (seller emails, ledger exports) hook in here.
fn notification_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks
        .on_escrow_created(|ev| {
            Box::pin(async move {
                info!(
                    "📬 Escrow #{} created for order {}: {} across {} seller(s)",
                    ev.escrow.id,
                    ev.escrow.order_id,
                    ev.escrow.total_amount,
                    ev.allocations.len()
                );
            })
        })
        .on_allocation_status(|ev| {
            Box::pin(async move {
                info!(
                    "📬 Allocation #{} ({} on order {}) went from {} to {}",
                    ev.allocation.id, ev.allocation.seller_id, ev.order_id, ev.old_status, ev.allocation.status
                );
            })
        })
        .on_dispute_opened(|ev| {
            Box::pin(async move {
                info!("📬 Dispute #{} opened on allocation #{}: {}", ev.dispute.id, ev.allocation.id, ev.dispute.reason);
            })
        })
        .on_dispute_resolved(|ev| {
            Box::pin(async move {
                info!(
                    "📬 Dispute #{} closed. Allocation #{} is now {}",
                    ev.dispute.id, ev.allocation.id, ev.allocation.status
                );
            })
        });
    hooks
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("💻️ Rejecting request body. {err}");
    ServerError::InvalidRequestBody(err.to_string()).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    debug!("💻️ Rejecting query string. {err}");
    ServerError::InvalidRequestBody(err.to_string()).into()
}

fn path_error(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    debug!("💻️ Rejecting request path. {err}");
    ServerError::InvalidRequestPath(err.to_string()).into()
}
