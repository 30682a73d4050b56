use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{Allocation, AllocationStatus, Dispute, EscrowTransaction, OrderId};

/// A capture was accepted and split into per-seller allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowCreatedEvent {
    pub escrow: EscrowTransaction,
    pub allocations: Vec<Allocation>,
}

impl EscrowCreatedEvent {
    pub fn new(escrow: EscrowTransaction, allocations: Vec<Allocation>) -> Self {
        Self { escrow, allocations }
    }
}

/// An allocation moved from one status to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStatusEvent {
    pub order_id: OrderId,
    pub old_status: AllocationStatus,
    pub allocation: Allocation,
    pub at: DateTime<Utc>,
}

impl AllocationStatusEvent {
    pub fn new(old_status: AllocationStatus, allocation: Allocation, at: DateTime<Utc>) -> Self {
        Self { order_id: allocation.order_id.clone(), old_status, allocation, at }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeOpenedEvent {
    pub dispute: Dispute,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolvedEvent {
    pub dispute: Dispute,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    EscrowCreated(EscrowCreatedEvent),
    AllocationStatus(AllocationStatusEvent),
    DisputeOpened(DisputeOpenedEvent),
    DisputeResolved(DisputeResolvedEvent),
}
