use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::{
    db_types::{
        Allocation,
        AllocationStatus,
        CategoryId,
        Cents,
        Commission,
        CommissionScope,
        Dispute,
        DisputeResolution,
        EscrowMovement,
        EscrowTransaction,
        IdempotencyKey,
        MovementKind,
        NewDispute,
        NewMovement,
        NewShipment,
        OrderId,
        OrderStatusType,
        Rate,
        SellerId,
        Shipment,
    },
    validation::ValidationErrors,
};

//--------------------------------------     Escrow creation     -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCommission {
    pub rule_id: i64,
    pub rate: Rate,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAllocation {
    pub seller_id: SellerId,
    pub category_id: Option<CategoryId>,
    pub contribution: Cents,
    pub amount: Cents,
    pub commission: NewCommission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEscrow {
    pub order_id: OrderId,
    pub capture_reference: String,
    pub total_amount: Cents,
    pub currency: String,
    pub allocations: Vec<NewAllocation>,
    pub created_at: DateTime<Utc>,
}

impl NewEscrow {
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::capture(&self.order_id, &self.capture_reference)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertEscrowResult {
    Inserted(EscrowTransaction),
    AlreadyProcessed(EscrowTransaction),
}

impl InsertEscrowResult {
    pub fn escrow(&self) -> &EscrowTransaction {
        match self {
            Self::Inserted(e) | Self::AlreadyProcessed(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

//--------------------------------------       Transitions       -------------------------------------------------------
/// A planned state change for a single allocation.
///
/// `expected_version` is the version the plan was computed from. The change only applies if the stored allocation
/// still carries that version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationChange {
    pub allocation_id: i64,
    pub expected_version: i64,
    pub from: AllocationStatus,
    pub to: AllocationStatus,
    pub hold_until: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivery_confirmed_at: Option<DateTime<Utc>>,
    pub movements: Vec<NewMovement>,
}

impl AllocationChange {
    pub fn moved(&self, kind: MovementKind) -> Cents {
        self.movements.iter().filter(|m| m.kind == kind).map(|m| m.amount).sum()
    }

    pub fn releases_funds(&self) -> bool {
        self.moved(MovementKind::Release).is_positive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeWrite {
    Open(NewDispute),
    Close { dispute_id: i64, resolution: DisputeResolution },
}

/// A set of allocation changes for one escrow that must be applied together, along with the records that explain
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionBatch {
    pub order_id: OrderId,
    pub escrow_id: i64,
    /// The escrow version the changes were planned against
    pub expected_escrow_version: i64,
    pub changes: Vec<AllocationChange>,
    pub events: Vec<IdempotencyKey>,
    pub shipment: Option<NewShipment>,
    pub dispute: Option<DisputeWrite>,
    pub at: DateTime<Utc>,
}

impl TransitionBatch {
    pub fn new(escrow: &EscrowTransaction, changes: Vec<AllocationChange>, at: DateTime<Utc>) -> Self {
        Self {
            order_id: escrow.order_id.clone(),
            escrow_id: escrow.id,
            expected_escrow_version: escrow.version,
            changes,
            events: vec![],
            shipment: None,
            dispute: None,
            at,
        }
    }

    pub fn with_event(mut self, key: IdempotencyKey) -> Self {
        self.events.push(key);
        self
    }

    pub fn with_shipment(mut self, shipment: NewShipment) -> Self {
        self.shipment = Some(shipment);
        self
    }

    pub fn with_dispute(mut self, dispute: DisputeWrite) -> Self {
        self.dispute = Some(dispute);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// The allocations touched by the batch, as they are after the change
    pub allocations: Vec<Allocation>,
    pub escrow: EscrowTransaction,
    pub dispute: Option<Dispute>,
    /// Set if this batch closed out the order
    pub order_status: Option<OrderStatusType>,
}

//--------------------------------------          Sweep          -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub allocation_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResult {
    pub processed: usize,
    pub released: Vec<Allocation>,
    pub failed: Vec<SweepFailure>,
}

impl SweepResult {
    pub fn successful(&self) -> usize {
        self.released.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}

impl Display for SweepResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} processed, {} released, {} failed", self.processed, self.successful(), self.failed.len())
    }
}

//--------------------------------------         Queries         -------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleQueryFilter {
    pub seller_id: Option<SellerId>,
    pub category_id: Option<CategoryId>,
    pub scope: Option<CommissionScope>,
    #[serde(default)]
    pub active_only: bool,
}

impl RuleQueryFilter {
    pub fn with_seller_id(mut self, seller_id: SellerId) -> Self {
        self.seller_id = Some(seller_id);
        self
    }

    pub fn with_category_id(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn with_scope(mut self, scope: CommissionScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.active_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDetails {
    pub allocation: Allocation,
    pub commission: Option<Commission>,
    pub disputes: Vec<Dispute>,
    pub shipments: Vec<Shipment>,
    pub movements: Vec<EscrowMovement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDetails {
    pub escrow: EscrowTransaction,
    pub allocations: Vec<AllocationDetails>,
}

impl EscrowDetails {
    pub fn allocation_for(&self, seller_id: &SellerId) -> Option<&AllocationDetails> {
        self.allocations.iter().find(|a| &a.allocation.seller_id == seller_id)
    }
}

/// Where a seller's money currently sits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerEscrowSummary {
    pub seller_id: SellerId,
    pub allocation_count: i64,
    pub pending: Cents,
    pub held: Cents,
    pub frozen: Cents,
    pub released: Cents,
    pub refunded: Cents,
    /// Commission on allocations that have paid out to the seller
    pub commission: Cents,
    /// `released - commission`, never negative
    pub available: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotal {
    pub status: AllocationStatus,
    pub count: i64,
    pub amount: Cents,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowStatistics {
    pub total_escrows: i64,
    pub open_escrows: i64,
    pub settled_escrows: i64,
    pub captured: Cents,
    pub allocations: Vec<StatusTotal>,
    pub total_commission: Cents,
    pub open_disputes: i64,
}

//--------------------------------------        Listings         -------------------------------------------------------
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

fn check_paging(page: Option<i64>, limit: Option<i64>, errors: &mut ValidationErrors) {
    errors.check(page.is_some_and(|p| p < 1), "page", "must be 1 or more");
    errors.check(
        limit.is_some_and(|l| !(1..=MAX_PAGE_SIZE).contains(&l)),
        "limit",
        format!("must be between 1 and {MAX_PAGE_SIZE}"),
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

/// One page of a listing, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self { data, pagination: Pagination { page, limit, total, total_pages } }
    }
}

/// Selects allocations by seller and status. Pages are 1-based and hold [`DEFAULT_PAGE_SIZE`] rows unless `limit` says
/// otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationQueryFilter {
    pub seller_id: Option<SellerId>,
    pub status: Option<AllocationStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl AllocationQueryFilter {
    pub fn with_seller_id(mut self, seller_id: SellerId) -> Self {
        self.seller_id = Some(seller_id);
        self
    }

    pub fn with_status(mut self, status: AllocationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_page(mut self, page: i64, limit: i64) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_paging(self.page, self.limit, &mut errors);
        errors.into_result(())
    }
}

impl Display for AllocationQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(seller_id) = &self.seller_id {
            write!(f, "seller: {seller_id}. ")?;
        }
        if let Some(status) = &self.status {
            write!(f, "status: {status}. ")?;
        }
        write!(f, "page {} of size {}", self.page(), self.limit())
    }
}

/// Where the commission on an allocation stands, following the allocation it was charged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommissionState {
    /// The allocation is still in escrow
    Pending,
    /// The allocation paid out, so the commission was collected
    Earned,
    /// The allocation was refunded in full and no commission is due
    Cancelled,
}

impl From<AllocationStatus> for CommissionState {
    fn from(status: AllocationStatus) -> Self {
        match status {
            AllocationStatus::Pending | AllocationStatus::Held | AllocationStatus::Frozen => Self::Pending,
            AllocationStatus::Released => Self::Earned,
            AllocationStatus::Refunded => Self::Cancelled,
        }
    }
}

impl CommissionState {
    /// The allocation statuses that put a commission in this state.
    pub fn allocation_statuses(&self) -> &'static [AllocationStatus] {
        match self {
            Self::Pending => &[AllocationStatus::Pending, AllocationStatus::Held, AllocationStatus::Frozen],
            Self::Earned => &[AllocationStatus::Released],
            Self::Cancelled => &[AllocationStatus::Refunded],
        }
    }
}

/// A commission with the allocation it was charged on.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: i64,
    pub allocation_id: i64,
    pub rule_id: i64,
    pub rate: Rate,
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
    pub order_id: OrderId,
    pub seller_id: SellerId,
    pub allocation_amount: Cents,
    pub allocation_status: AllocationStatus,
}

impl CommissionRecord {
    pub fn state(&self) -> CommissionState {
        self.allocation_status.into()
    }
}

/// Selects commissions by seller, state and creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommissionQueryFilter {
    pub seller_id: Option<SellerId>,
    pub state: Option<CommissionState>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl CommissionQueryFilter {
    pub fn with_seller_id(mut self, seller_id: SellerId) -> Self {
        self.seller_id = Some(seller_id);
        self
    }

    pub fn with_state(mut self, state: CommissionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_page(mut self, page: i64, limit: i64) -> Self {
        self.page = Some(page);
        self.limit = Some(limit);
        self
    }

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.limit())
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_paging(self.page, self.limit, &mut errors);
        if let (Some(since), Some(until)) = (self.since, self.until) {
            errors.check(since > until, "since", "must not be after 'until'");
        }
        errors.into_result(())
    }
}

impl Display for CommissionQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(seller_id) = &self.seller_id {
            write!(f, "seller: {seller_id}. ")?;
        }
        if let Some(state) = &self.state {
            write!(f, "state: {state:?}. ")?;
        }
        if let Some(since) = &self.since {
            write!(f, "since {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until {until}. ")?;
        }
        write!(f, "page {} of size {}", self.page(), self.limit())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTally {
    pub count: i64,
    pub amount: Cents,
}

impl CommissionTally {
    pub fn add(&mut self, count: i64, amount: Cents) {
        self.count += count;
        self.amount += amount;
    }
}

/// A seller's commission, split by where the underlying allocation stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerCommissionSummary {
    pub seller_id: SellerId,
    pub total: CommissionTally,
    pub pending: CommissionTally,
    pub earned: CommissionTally,
    pub cancelled: CommissionTally,
}

/// Marketplace-wide commission figures, optionally limited to commissions created in a time window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionStatistics {
    pub total: CommissionTally,
    /// The allocation amounts the commissions were charged on
    pub allocation_amount: Cents,
    pub pending: CommissionTally,
    pub earned: CommissionTally,
    pub cancelled: CommissionTally,
}

impl CommissionStatistics {
    pub fn tally_mut(&mut self, state: CommissionState) -> &mut CommissionTally {
        match state {
            CommissionState::Pending => &mut self.pending,
            CommissionState::Earned => &mut self.earned,
            CommissionState::Cancelled => &mut self.cancelled,
        }
    }
}

impl SellerCommissionSummary {
    pub fn tally_mut(&mut self, state: CommissionState) -> &mut CommissionTally {
        match state {
            CommissionState::Pending => &mut self.pending,
            CommissionState::Earned => &mut self.earned,
            CommissionState::Cancelled => &mut self.cancelled,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paging_defaults_and_bounds() {
        let filter = AllocationQueryFilter::default();
        assert_eq!((filter.page(), filter.limit(), filter.offset()), (1, DEFAULT_PAGE_SIZE, 0));
        let filter = AllocationQueryFilter::default().with_seller_id("acme".into()).with_page(3, 10);
        assert_eq!(filter.offset(), 20);
        assert_eq!(filter.to_string(), "seller: acme. page 3 of size 10");
        let err = AllocationQueryFilter::default().with_page(0, 500).validate().unwrap_err();
        assert!(err.has_field("page"));
        assert!(err.has_field("limit"));
    }

    #[test]
    fn page_counts_round_up() {
        let page = Page::new(vec![1, 2], 1, 2, 5);
        assert_eq!(page.pagination.total_pages, 3);
        let empty = Page::<i64>::new(vec![], 1, 20, 0);
        assert_eq!(empty.pagination.total_pages, 0);
    }

    #[test]
    fn commission_state_follows_the_allocation() {
        assert_eq!(CommissionState::from(AllocationStatus::Frozen), CommissionState::Pending);
        assert_eq!(CommissionState::from(AllocationStatus::Released), CommissionState::Earned);
        assert_eq!(CommissionState::from(AllocationStatus::Refunded), CommissionState::Cancelled);
        let filter = CommissionQueryFilter::default()
            .since(Utc::now())
            .until(Utc::now() - chrono::Duration::days(1));
        assert!(filter.validate().unwrap_err().has_field("since"));
    }

    #[test]
    fn empty_summaries() {
        let summary = SellerEscrowSummary::default();
        assert_eq!(summary.seller_id, SellerId::default());
        assert_eq!(summary.available, Cents::default());
        assert_eq!(SellerCommissionSummary::default().total, CommissionTally::default());
    }
}
