//! `SqliteDatabase` is a concrete implementation of a settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate::Migrator, SqlitePool};

use super::db::{
    allocations,
    commission_rules,
    db_url,
    disputes,
    escrow,
    idempotency,
    lookups,
    new_pool,
    orders,
    queries,
};
use crate::{
    commission::find_overlap,
    db_types::{
        Allocation,
        CategoryId,
        CommissionRule,
        CommissionRuleUpdate,
        Coupon,
        Dispute,
        EscrowTransaction,
        IdempotencyKey,
        IdempotencyRecord,
        NewCommissionRule,
        NewOrder,
        Order,
        OrderId,
        OrderItem,
        OrderStatusType,
        SellerId,
        ShippingAddress,
    },
    traits::{
        AddressBook,
        AllocationDetails,
        AllocationQueryFilter,
        CommissionQueryFilter,
        CommissionRecord,
        CommissionRules,
        CommissionStatistics,
        CouponSource,
        DisputeWrite,
        EscrowDetails,
        EscrowQueries,
        EscrowStatistics,
        InsertEscrowResult,
        NewEscrow,
        Page,
        RuleQueryFilter,
        SellerCommissionSummary,
        SellerEscrowSummary,
        SettlementDatabase,
        SettlementError,
        TransitionBatch,
        TransitionOutcome,
    },
};

static MIGRATOR: Migrator = sqlx::migrate!("./src/sqlite/migrations");

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `SETTLE_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, SettlementError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    /// Connects to the database at `url`, creating the file if it does not exist.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SettlementError> {
        trace!("🗃️ Creating new database connection pool for {url}");
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    /// Brings the schema up to date.
    pub async fn migrate(&self) -> Result<(), SettlementError> {
        MIGRATOR.run(&self.pool).await?;
        debug!("🗃️ Migrations complete for {}", self.url);
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn save_shipping_address(&self, address: &ShippingAddress) -> Result<ShippingAddress, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(lookups::upsert_shipping_address(address, &mut conn).await?)
    }

    pub async fn save_coupon(&self, coupon: &Coupon) -> Result<Coupon, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(lookups::upsert_coupon(coupon, &mut conn).await?)
    }

    async fn allocation_details(&self, allocation: Allocation) -> Result<AllocationDetails, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let id = allocation.id;
        let commission = escrow::fetch_commission(id, &mut conn).await?;
        let disputes = disputes::fetch_disputes_for_allocation(id, &mut conn).await?;
        let shipments = allocations::fetch_shipments(id, &mut conn).await?;
        let movements = allocations::fetch_movements(id, &mut conn).await?;
        Ok(AllocationDetails { allocation, commission, disputes, shipments, movements })
    }
}

fn concurrent(order_id: &OrderId) -> SettlementError {
    SettlementError::ConcurrentModification(order_id.clone())
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementError> {
        let mut tx = self.pool.begin().await?;
        let result = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_order_id(order_id, &mut conn).await?)
    }

    async fn fetch_order_items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_items(order_id, &mut conn).await?)
    }

    async fn update_order_status(&self, order_id: &OrderId, status: OrderStatusType) -> Result<Order, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        orders::update_order_status(order_id, status, Utc::now(), &mut conn).await
    }

    async fn fetch_idempotency_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(idempotency::fetch_record(key, &mut conn).await?)
    }

    async fn create_escrow(&self, new_escrow: NewEscrow) -> Result<InsertEscrowResult, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let key = new_escrow.idempotency_key();
        let at = new_escrow.created_at;
        let recorded = idempotency::record_event(&key, Some(&new_escrow.capture_reference), at, &mut tx).await?;
        if !recorded {
            let existing = escrow::fetch_escrow_for_order(&new_escrow.order_id, &mut tx)
                .await?
                .ok_or_else(|| SettlementError::EscrowNotFound(new_escrow.order_id.clone()))?;
            debug!("🗃️ Capture {key} was already processed as escrow #{}", existing.id);
            return Ok(InsertEscrowResult::AlreadyProcessed(existing));
        }
        if let Some(existing) = escrow::fetch_escrow_for_order(&new_escrow.order_id, &mut tx).await? {
            warn!(
                "🗃️ Order {} already has escrow #{} from capture {}. Capture {} is refused.",
                new_escrow.order_id, existing.id, existing.capture_reference, new_escrow.capture_reference
            );
            return Err(SettlementError::AllocationMismatch {
                order_id: new_escrow.order_id.clone(),
                reason: format!("The order was already captured under reference {}", existing.capture_reference),
            });
        }
        let stored = escrow::insert_escrow(&new_escrow, &mut tx).await?;
        for allocation in &new_escrow.allocations {
            let row = allocations::insert_allocation(stored.id, &stored.order_id, allocation, at, &mut tx).await?;
            escrow::insert_commission(row.id, &allocation.commission, at, &mut tx).await?;
            trace!("🗃️ Allocation #{} of {} for seller {} stored", row.id, row.amount, row.seller_id);
        }
        orders::update_order_status(&stored.order_id, OrderStatusType::Paid, at, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Escrow #{} for order {} created with {} allocations",
            stored.id,
            stored.order_id,
            new_escrow.allocations.len()
        );
        Ok(InsertEscrowResult::Inserted(stored))
    }

    async fn fetch_escrow_for_order(&self, order_id: &OrderId) -> Result<Option<EscrowTransaction>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(escrow::fetch_escrow_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_escrow(&self, escrow_id: i64) -> Result<Option<EscrowTransaction>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(escrow::fetch_escrow(escrow_id, &mut conn).await?)
    }

    async fn fetch_allocation(&self, allocation_id: i64) -> Result<Option<Allocation>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_allocation(allocation_id, &mut conn).await?)
    }

    async fn fetch_allocations_for_order(&self, order_id: &OrderId) -> Result<Vec<Allocation>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_allocations_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_allocation_for_seller(
        &self,
        order_id: &OrderId,
        seller_id: &SellerId,
    ) -> Result<Option<Allocation>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_allocation_for_seller(order_id, seller_id, &mut conn).await?)
    }

    async fn fetch_allocations_due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Allocation>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(allocations::fetch_due_for_release(now, limit, &mut conn).await?)
    }

    async fn apply_transitions(&self, batch: TransitionBatch) -> Result<TransitionOutcome, SettlementError> {
        let TransitionBatch { order_id, escrow_id, expected_escrow_version, changes, events, shipment, dispute, at } =
            batch;
        let mut tx = self.pool.begin().await?;
        for key in &events {
            if !idempotency::record_event(key, None, at, &mut tx).await? {
                debug!("🗃️ Event {key} was already processed. Nothing to do.");
                return Err(SettlementError::DuplicateEvent(key.to_string()));
            }
        }
        let escrow = escrow::bump_version(escrow_id, expected_escrow_version, at, &mut tx)
            .await?
            .ok_or_else(|| concurrent(&order_id))?;
        // Disputes are written first, so that a release in the same batch sees the dispute already closed
        let dispute = match dispute {
            Some(DisputeWrite::Open(new_dispute)) => Some(disputes::insert_dispute(&new_dispute, at, &mut tx).await?),
            Some(DisputeWrite::Close { dispute_id, resolution }) => {
                let closed = disputes::close_dispute(dispute_id, &resolution, at, &mut tx)
                    .await?
                    .ok_or(SettlementError::DisputeAlreadyResolved(dispute_id))?;
                Some(closed)
            },
            None => None,
        };
        let mut updated = Vec::with_capacity(changes.len());
        for change in &changes {
            if change.releases_funds() && disputes::fetch_open_dispute(change.allocation_id, &mut tx).await?.is_some() {
                warn!("🗃️ Allocation #{} has an open dispute. The release is refused.", change.allocation_id);
                return Err(SettlementError::InvalidStateTransition {
                    allocation_id: change.allocation_id,
                    from: change.from,
                    action: "release while a dispute is open".into(),
                });
            }
            let allocation =
                allocations::apply_change(change, at, &mut tx).await?.ok_or_else(|| concurrent(&order_id))?;
            for movement in &change.movements {
                allocations::insert_movement(allocation.id, movement, at, &mut tx).await.map_err(|e| match e {
                    sqlx::Error::Database(ref de) if de.is_unique_violation() => {
                        SettlementError::AllocationAlreadySettled(allocation.id)
                    },
                    e => SettlementError::from(e),
                })?;
            }
            trace!("🗃️ Allocation #{} moved {} -> {}", allocation.id, change.from, allocation.status);
            updated.push(allocation);
        }
        if let Some(shipment) = &shipment {
            allocations::insert_shipment(shipment, at, &mut tx).await?;
        }
        let everything = allocations::fetch_allocations_for_escrow(escrow.id, &mut tx).await?;
        let all_terminal = !everything.is_empty() && everything.iter().all(|a| a.status.is_terminal());
        let (escrow, order_status) = if all_terminal {
            let status = if everything.iter().any(|a| a.released_amount.is_positive()) {
                OrderStatusType::Completed
            } else {
                OrderStatusType::Refunded
            };
            orders::update_order_status(&order_id, status, at, &mut tx).await?;
            let settled = escrow::mark_settled(escrow.id, at, &mut tx).await?;
            info!("🗃️ Escrow #{} is settled. Order {order_id} is {status}", settled.id);
            (settled, Some(status))
        } else {
            (escrow, None)
        };
        tx.commit().await?;
        Ok(TransitionOutcome { allocations: updated, escrow, dispute, order_status })
    }

    async fn fetch_dispute(&self, dispute_id: i64) -> Result<Option<Dispute>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(disputes::fetch_dispute(dispute_id, &mut conn).await?)
    }

    async fn fetch_open_dispute(&self, allocation_id: i64) -> Result<Option<Dispute>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(disputes::fetch_open_dispute(allocation_id, &mut conn).await?)
    }

    async fn fetch_disputes_for_allocation(&self, allocation_id: i64) -> Result<Vec<Dispute>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(disputes::fetch_disputes_for_allocation(allocation_id, &mut conn).await?)
    }

    async fn close(&mut self) -> Result<(), SettlementError> {
        self.pool.close().await;
        Ok(())
    }
}

impl CommissionRules for SqliteDatabase {
    async fn insert_commission_rule(&self, rule: NewCommissionRule) -> Result<CommissionRule, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let same_scope =
            commission_rules::fetch_active_rules_in_scope(rule.seller_id.as_ref(), rule.category_id.as_ref(), &mut tx)
                .await?;
        if let Some(existing) = find_overlap(&same_scope, &rule, None) {
            return Err(SettlementError::OverlappingRule(existing.id));
        }
        let stored = commission_rules::insert_rule(&rule, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Commission rule #{} ({}) stored at {}", stored.id, stored.scope(), stored.rate);
        Ok(stored)
    }

    async fn update_commission_rule(
        &self,
        id: i64,
        update: CommissionRuleUpdate,
    ) -> Result<CommissionRule, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let current = commission_rules::fetch_rule(id, &mut tx).await?.ok_or(SettlementError::RuleNotFound(id))?;
        let is_active = update.is_active.unwrap_or(current.is_active);
        let rule = update.rule;
        if is_active {
            let same_scope = commission_rules::fetch_active_rules_in_scope(
                rule.seller_id.as_ref(),
                rule.category_id.as_ref(),
                &mut tx,
            )
            .await?;
            if let Some(existing) = find_overlap(&same_scope, &rule, Some(id)) {
                return Err(SettlementError::OverlappingRule(existing.id));
            }
        }
        let stored = commission_rules::update_rule(id, &rule, is_active, Utc::now(), &mut tx)
            .await?
            .ok_or(SettlementError::RuleNotFound(id))?;
        tx.commit().await?;
        debug!("🗃️ Commission rule #{id} updated");
        Ok(stored)
    }

    async fn fetch_commission_rule(&self, id: i64) -> Result<Option<CommissionRule>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(commission_rules::fetch_rule(id, &mut conn).await?)
    }

    async fn search_commission_rules(&self, filter: RuleQueryFilter) -> Result<Vec<CommissionRule>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(commission_rules::search_rules(filter, &mut conn).await?)
    }

    async fn fetch_candidate_rules(
        &self,
        seller_id: SellerId,
        category_id: Option<CategoryId>,
    ) -> Result<Vec<CommissionRule>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(commission_rules::fetch_candidate_rules(&seller_id, category_id.as_ref(), &mut conn).await?)
    }
}

impl EscrowQueries for SqliteDatabase {
    async fn fetch_escrow_details(&self, order_id: &OrderId) -> Result<Option<EscrowDetails>, SettlementError> {
        let Some(escrow) = self.fetch_escrow_for_order(order_id).await? else {
            return Ok(None);
        };
        let mut details = Vec::new();
        for allocation in self.fetch_allocations_for_order(order_id).await? {
            details.push(self.allocation_details(allocation).await?);
        }
        Ok(Some(EscrowDetails { escrow, allocations: details }))
    }

    async fn seller_escrow_summary(&self, seller_id: &SellerId) -> Result<SellerEscrowSummary, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::seller_summary(seller_id, &mut conn).await?)
    }

    async fn escrow_statistics(&self) -> Result<EscrowStatistics, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::statistics(&mut conn).await?)
    }

    async fn search_allocations(&self, filter: AllocationQueryFilter) -> Result<Page<Allocation>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::search_allocations(filter, &mut conn).await?)
    }

    async fn search_commissions(
        &self,
        filter: CommissionQueryFilter,
    ) -> Result<Page<CommissionRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::search_commissions(filter, &mut conn).await?)
    }

    async fn seller_commission_summary(
        &self,
        seller_id: &SellerId,
    ) -> Result<SellerCommissionSummary, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::seller_commission_summary(seller_id, &mut conn).await?)
    }

    async fn commission_statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<CommissionStatistics, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(queries::commission_statistics(since, until, &mut conn).await?)
    }
}

impl AddressBook for SqliteDatabase {
    async fn fetch_shipping_address(&self, address_id: &str) -> Result<Option<ShippingAddress>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(lookups::fetch_shipping_address(address_id, &mut conn).await?)
    }
}

impl CouponSource for SqliteDatabase {
    async fn fetch_coupon(&self, code: &str) -> Result<Option<Coupon>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        Ok(lookups::fetch_coupon(code, &mut conn).await?)
    }
}
