use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{
        Allocation,
        AllocationStatus,
        Dispute,
        EscrowTransaction,
        IdempotencyKey,
        IdempotencyRecord,
        NewOrder,
        Order,
        OrderId,
        OrderItem,
        OrderStatusType,
        SellerId,
    },
    traits::{
        data_objects::{InsertEscrowResult, NewEscrow, TransitionBatch, TransitionOutcome},
        CommissionRules,
    },
    validation::ValidationErrors,
};

/// This trait defines the highest level of behaviour for backends supporting the settlement engine.
///
/// This behaviour includes:
/// * Storing orders as they are placed
/// * Atomically creating escrow records (transaction, allocations and commissions) when payment is captured
/// * Applying allocation state transitions with optimistic concurrency control
/// * Recording idempotency keys for externally delivered events
///
/// Every method that changes more than one row does so in a single database transaction.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone + CommissionRules {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Takes a new order, and in a single atomic transaction, stores the order and its line items.
    /// This call is idempotent.
    /// Returns true if the order was inserted, or false if it already existed.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementError>;

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, SettlementError>;

    async fn fetch_order_items(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, SettlementError>;

    /// Sets the order status directly. Used for orders that have no escrow yet (e.g. cancellation before capture).
    async fn update_order_status(&self, order_id: &OrderId, status: OrderStatusType) -> Result<Order, SettlementError>;

    /// Returns the record for `key` if the event has already been processed.
    async fn fetch_idempotency_record(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyRecord>, SettlementError>;

    /// In a single atomic transaction:
    /// * records the capture's idempotency key. If it already exists, nothing further is done and the existing escrow
    ///   is returned as [`InsertEscrowResult::AlreadyProcessed`].
    /// * inserts the escrow transaction, one `Pending` allocation per seller and each allocation's commission.
    /// * marks the order as `Paid`.
    async fn create_escrow(&self, escrow: NewEscrow) -> Result<InsertEscrowResult, SettlementError>;

    async fn fetch_escrow_for_order(&self, order_id: &OrderId) -> Result<Option<EscrowTransaction>, SettlementError>;

    async fn fetch_escrow(&self, escrow_id: i64) -> Result<Option<EscrowTransaction>, SettlementError>;

    async fn fetch_allocation(&self, allocation_id: i64) -> Result<Option<Allocation>, SettlementError>;

    async fn fetch_allocations_for_order(&self, order_id: &OrderId) -> Result<Vec<Allocation>, SettlementError>;

    async fn fetch_allocation_for_seller(
        &self,
        order_id: &OrderId,
        seller_id: &SellerId,
    ) -> Result<Option<Allocation>, SettlementError>;

    /// `Held` allocations whose hold has elapsed at `now` and that have no open dispute, oldest deadline first.
    async fn fetch_allocations_due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Allocation>, SettlementError>;

    /// Applies every change in the batch in a single atomic transaction.
    ///
    /// Each change is a compare-and-swap on the allocation's version: if any allocation was modified since it was
    /// read, the whole batch is rolled back with [`SettlementError::ConcurrentModification`]. A change that releases
    /// funds is refused if the allocation has an open dispute. Once all allocations of the escrow are terminal, the
    /// escrow is marked `Settled` and the order `Completed` (or `Refunded` if nothing was released).
    ///
    /// If the batch carries an event key that was already recorded, the batch is rolled back with
    /// [`SettlementError::DuplicateEvent`].
    async fn apply_transitions(&self, batch: TransitionBatch) -> Result<TransitionOutcome, SettlementError>;

    async fn fetch_dispute(&self, dispute_id: i64) -> Result<Option<Dispute>, SettlementError>;

    async fn fetch_open_dispute(&self, allocation_id: i64) -> Result<Option<Dispute>, SettlementError>;

    async fn fetch_disputes_for_allocation(&self, allocation_id: i64) -> Result<Vec<Dispute>, SettlementError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), SettlementError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("{0}")]
    ValidationError(#[from] ValidationErrors),
    #[error("A lookup against an external collaborator failed. {0}")]
    LookupError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested allocation #{0} does not exist")]
    AllocationNotFound(i64),
    #[error("The requested dispute #{0} does not exist")]
    DisputeNotFound(i64),
    #[error("The requested commission rule #{0} does not exist")]
    RuleNotFound(i64),
    #[error("No escrow exists for order {0}")]
    EscrowNotFound(OrderId),
    #[error("Seller {seller_id} has no allocation on order {order_id}")]
    SellerNotOnOrder { order_id: OrderId, seller_id: SellerId },
    #[error("No commission rule applies to seller {seller_id} (category {category})")]
    NoCommissionRule { seller_id: SellerId, category: String },
    #[error("The rule would overlap with active commission rule #{0} for the same scope")]
    OverlappingRule(i64),
    #[error("Cannot allocate the capture for order {order_id}. {reason}")]
    AllocationMismatch { order_id: OrderId, reason: String },
    #[error("Allocation #{allocation_id} cannot go from {from} via {action}")]
    InvalidStateTransition { allocation_id: i64, from: AllocationStatus, action: String },
    #[error("Allocation #{allocation_id} is not due for release yet. {reason}")]
    ReleaseNotDue { allocation_id: i64, reason: String },
    #[error("Allocation #{0} already has an open dispute")]
    DuplicateDispute(i64),
    #[error("Allocation #{0} has already been settled")]
    AllocationAlreadySettled(i64),
    #[error("Dispute #{0} has already been resolved")]
    DisputeAlreadyResolved(i64),
    #[error("The escrow for order {0} was modified concurrently. Retry the operation.")]
    ConcurrentModification(OrderId),
    #[error("Event {0} has already been processed")]
    DuplicateEvent(String),
    #[error("The payment gateway did not confirm refund {0} in time")]
    GatewayTimeout(String),
    #[error("The payment gateway rejected refund {key}. {reason}")]
    GatewayRejected { key: String, reason: String },
}

impl SettlementError {
    /// True for failures that might succeed if the operation is repeated unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_) | Self::GatewayTimeout(_) | Self::DatabaseError(_))
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for SettlementError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        SettlementError::DatabaseError(format!("Migration failed. {e}"))
    }
}
