use chrono::{DateTime, Utc};

use crate::{
    db_types::{Allocation, OrderId, SellerId},
    traits::{
        data_objects::{
            AllocationQueryFilter,
            CommissionQueryFilter,
            CommissionRecord,
            CommissionStatistics,
            EscrowDetails,
            EscrowStatistics,
            Page,
            SellerCommissionSummary,
            SellerEscrowSummary,
        },
        SettlementError,
    },
};

/// Read-only reporting over escrow state.
#[allow(async_fn_in_trait)]
pub trait EscrowQueries {
    /// The escrow for an order with every allocation, its commission, disputes, shipments and movements.
    async fn fetch_escrow_details(&self, order_id: &OrderId) -> Result<Option<EscrowDetails>, SettlementError>;

    async fn seller_escrow_summary(&self, seller_id: &SellerId) -> Result<SellerEscrowSummary, SettlementError>;

    async fn escrow_statistics(&self) -> Result<EscrowStatistics, SettlementError>;

    /// A page of allocations matching the filter, newest first.
    async fn search_allocations(&self, filter: AllocationQueryFilter) -> Result<Page<Allocation>, SettlementError>;

    /// A page of commissions matching the filter, newest first.
    async fn search_commissions(
        &self,
        filter: CommissionQueryFilter,
    ) -> Result<Page<CommissionRecord>, SettlementError>;

    async fn seller_commission_summary(&self, seller_id: &SellerId)
        -> Result<SellerCommissionSummary, SettlementError>;

    /// Commission totals over every commission created in `[since, until]`. Either bound may be left open.
    async fn commission_statistics(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<CommissionStatistics, SettlementError>;
}
