use chrono::Duration;
use cucumber::World;
use log::*;
use settlement_engine::{
    api::{
        commission_api::CommissionApi,
        flow_objects::CaptureOutcome,
        totals_objects::{CartItem, OrderCalculation, ShippingOption},
    },
    commission::ResolvedCommission,
    db_types::{Allocation, Cents, Dispute, NewOrderItem, OrderId, Rate, SellerId},
    escrow::EscrowPolicy,
    events::EventProducers,
    test_utils::{prepare_test_env, random_db_url, FixedShippingQuotes, FlatTaxRate, RecordingGateway},
    totals::TotalsPolicy,
    traits::{SettlementDatabase, SettlementError, SweepResult},
    DisputeApi,
    EscrowFlowApi,
    EscrowQueryApi,
    SqliteDatabase,
    TotalsApi,
};

pub const HOLD_PERIOD_DAYS: i64 = 7;

#[derive(Default, Debug, World)]
pub struct SettlementWorld {
    pub system: Option<SettlementSystem>,
    pub pending_items: Vec<NewOrderItem>,
    pub cart: Vec<CartItem>,
    pub last_error: Option<SettlementError>,
    pub last_capture: Option<CaptureOutcome>,
    pub last_totals: Option<OrderCalculation>,
    pub last_resolution: Option<ResolvedCommission>,
    pub last_sweep: Option<SweepResult>,
    pub last_dispute: Option<Dispute>,
}

#[derive(Debug)]
pub struct SettlementSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub gateway: RecordingGateway,
    pub flow: EscrowFlowApi<SqliteDatabase, RecordingGateway>,
    pub disputes: DisputeApi<SqliteDatabase, RecordingGateway>,
    pub commissions: CommissionApi<SqliteDatabase>,
    pub queries: EscrowQueryApi<SqliteDatabase>,
    pub totals: TotalsApi<SqliteDatabase, FixedShippingQuotes, FlatTaxRate>,
}

impl SettlementWorld {
    pub fn system(&self) -> &SettlementSystem {
        self.system.as_ref().expect("Settlement system not initialised")
    }

    pub fn system_mut(&mut self) -> &mut SettlementSystem {
        self.system.as_mut().expect("Settlement system not initialised")
    }

    /// Stores the outcome of a step that is allowed to fail, so that a later step can check the error.
    pub fn record<T>(&mut self, result: Result<T, SettlementError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = None;
                Some(v)
            },
            Err(e) => {
                debug!("🥒 Step failed (as may be expected): {e}");
                self.last_error = Some(e);
                None
            },
        }
    }

    pub async fn allocation(&self, order_id: &str, seller_id: &str) -> Allocation {
        let order_id = OrderId::from(order_id);
        let seller_id = SellerId::from(seller_id);
        self.system()
            .db
            .fetch_allocation_for_seller(&order_id, &seller_id)
            .await
            .expect("Error fetching allocation")
            .unwrap_or_else(|| panic!("Seller {seller_id} has no allocation on order {order_id}"))
    }
}

impl SettlementSystem {
    pub async fn new() -> Self {
        let url = random_db_url();
        let db = prepare_test_env(&url).await;
        debug!("🥒 Created database: {url}");
        let gateway = RecordingGateway::new();
        let policy = EscrowPolicy::default().with_hold_period(Duration::days(HOLD_PERIOD_DAYS));
        let producers = EventProducers::default();
        let flow = EscrowFlowApi::new(db.clone(), gateway.clone(), producers.clone(), policy.clone());
        let disputes = DisputeApi::new(db.clone(), gateway.clone(), producers, policy);
        let commissions = CommissionApi::new(db.clone());
        let queries = EscrowQueryApi::new(db.clone());
        let shipping = FixedShippingQuotes::new(vec![
            shipping_option("standard", "Standard Shipping", Cents::from(1_000), 5),
            shipping_option("express", "Express Shipping", Cents::from(2_500), 2),
        ]);
        let tax = FlatTaxRate::new(Rate::from_ppm(80_000));
        let totals = TotalsApi::with_sources(db.clone(), shipping, tax, TotalsPolicy::default());
        Self { db_path: url, db, gateway, flow, disputes, commissions, queries, totals }
    }
}

fn shipping_option(id: &str, name: &str, price: Cents, days: u32) -> ShippingOption {
    ShippingOption {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{days} business days"),
        price,
        estimated_days: days,
        carrier: None,
    }
}
