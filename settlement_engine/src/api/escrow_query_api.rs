use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::debug;

use crate::{
    db_types::{Allocation, Order, OrderId, OrderItem, SellerId},
    traits::{
        AllocationQueryFilter,
        CommissionQueryFilter,
        CommissionRecord,
        CommissionStatistics,
        EscrowDetails,
        EscrowQueries,
        EscrowStatistics,
        Page,
        SellerCommissionSummary,
        SellerEscrowSummary,
        SettlementDatabase,
        SettlementError,
    },
    validation::ValidationErrors,
};

/// Read-only views over orders and escrow state for operators, sellers and admins.
pub struct EscrowQueryApi<B> {
    db: B,
}

impl<B> Debug for EscrowQueryApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EscrowQueryApi")
    }
}

impl<B> EscrowQueryApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> EscrowQueryApi<B>
where B: SettlementDatabase + EscrowQueries
{
    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, SettlementError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))
    }

    pub async fn order_items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, SettlementError> {
        self.db.fetch_order_items(order_id).await
    }

    /// The escrow for an order with its allocations, commissions, disputes, shipments and movements.
    pub async fn escrow_details(&self, order_id: &OrderId) -> Result<EscrowDetails, SettlementError> {
        self.db.fetch_escrow_details(order_id).await?.ok_or_else(|| SettlementError::EscrowNotFound(order_id.clone()))
    }

    pub async fn seller_summary(&self, seller_id: &SellerId) -> Result<SellerEscrowSummary, SettlementError> {
        self.db.seller_escrow_summary(seller_id).await
    }

    pub async fn statistics(&self) -> Result<EscrowStatistics, SettlementError> {
        self.db.escrow_statistics().await
    }

    /// Lists allocations across the marketplace, or for one seller when the filter names one.
    pub async fn allocations(&self, filter: AllocationQueryFilter) -> Result<Page<Allocation>, SettlementError> {
        filter.validate()?;
        debug!("💸 Listing allocations. {filter}");
        self.db.search_allocations(filter).await
    }

    /// A seller's commission history, newest first.
    pub async fn seller_commissions(
        &self,
        seller_id: &SellerId,
        filter: CommissionQueryFilter,
    ) -> Result<Page<CommissionRecord>, SettlementError> {
        let filter = filter.with_seller_id(seller_id.clone());
        filter.validate()?;
        debug!("🧾 Listing commissions. {filter}");
        self.db.search_commissions(filter).await
    }

    pub async fn seller_commission_summary(
        &self,
        seller_id: &SellerId,
    ) -> Result<SellerCommissionSummary, SettlementError> {
        self.db.seller_commission_summary(seller_id).await
    }

    pub async fn commission_statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<CommissionStatistics, SettlementError> {
        if let (Some(since), Some(until)) = (since, until) {
            let mut errors = ValidationErrors::new();
            errors.check(since > until, "since", "must not be after 'until'");
            errors.into_result(())?;
        }
        self.db.commission_statistics(since, until).await
    }
}
