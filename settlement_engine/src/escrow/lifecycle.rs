//! The allocation state machine.
//!
//! ```text
//!   Pending ──ship──▶ Held ──hold elapsed / release──▶ Released
//!      │               │  ▲
//!      │ dispute       │  │ dismiss
//!      ▼               ▼  │
//!      └──────────▶  Frozen ──settle──▶ Released | Refunded
//!   Pending | Held ──cancel──▶ Refunded
//! ```
//!
//! `Released` and `Refunded` are terminal. A `Frozen` allocation can only leave via dispute resolution.
use std::fmt::Display;

use chrono::{DateTime, Duration, Utc};

use crate::{
    db_types::{hold_deadline, Allocation, AllocationStatus, Cents, MovementKind, NewMovement},
    traits::{AllocationChange, SettlementError},
    validation::ValidationErrors,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The seller confirmed the shipment. Starts the hold clock.
    Shipped { at: DateTime<Utc> },
    /// The carrier confirmed delivery. Restarts the hold clock.
    Delivered { at: DateTime<Utc> },
    /// An explicit request to pay out. Requires confirmed delivery and an elapsed hold.
    Release { now: DateTime<Utc> },
    /// The scheduled sweep found the hold elapsed.
    ScheduledRelease { now: DateTime<Utc> },
    /// The order was cancelled. The allocation is refunded in full.
    Cancel,
    OpenDispute,
    DismissDispute { now: DateTime<Utc> },
    SettleDispute { release_amount: Cents, refund_amount: Cents },
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shipped { .. } => write!(f, "shipment confirmation"),
            Self::Delivered { .. } => write!(f, "delivery confirmation"),
            Self::Release { .. } => write!(f, "release"),
            Self::ScheduledRelease { .. } => write!(f, "scheduled release"),
            Self::Cancel => write!(f, "cancellation"),
            Self::OpenDispute => write!(f, "dispute"),
            Self::DismissDispute { .. } => write!(f, "dispute dismissal"),
            Self::SettleDispute { .. } => write!(f, "dispute settlement"),
        }
    }
}

fn unchanged(allocation: &Allocation) -> AllocationChange {
    AllocationChange {
        allocation_id: allocation.id,
        expected_version: allocation.version,
        from: allocation.status,
        to: allocation.status,
        hold_until: allocation.hold_until,
        shipped_at: allocation.shipped_at,
        delivery_confirmed_at: allocation.delivery_confirmed_at,
        movements: vec![],
    }
}

fn movement(kind: MovementKind, amount: Cents) -> NewMovement {
    NewMovement { kind, amount, reference: None }
}

fn invalid(allocation: &Allocation, event: &LifecycleEvent) -> SettlementError {
    SettlementError::InvalidStateTransition {
        allocation_id: allocation.id,
        from: allocation.status,
        action: event.to_string(),
    }
}

fn not_due<S: Into<String>>(allocation: &Allocation, reason: S) -> SettlementError {
    SettlementError::ReleaseNotDue { allocation_id: allocation.id, reason: reason.into() }
}

/// Works out how `allocation` changes in response to `event`.
///
/// Returns `Ok(None)` if the event is valid but changes nothing (e.g. a repeated shipment confirmation), and an error
/// if the event is not allowed from the allocation's current state.
pub fn plan_transition(
    allocation: &Allocation,
    event: &LifecycleEvent,
    hold_period: Duration,
) -> Result<Option<AllocationChange>, SettlementError> {
    use AllocationStatus::*;
    let status = allocation.status;
    if status.is_terminal() {
        return match event {
            LifecycleEvent::Shipped { .. } | LifecycleEvent::Delivered { .. } => Err(invalid(allocation, event)),
            _ => Err(SettlementError::AllocationAlreadySettled(allocation.id)),
        };
    }
    let mut change = unchanged(allocation);
    match (status, event) {
        (Pending, LifecycleEvent::Shipped { at }) => {
            change.to = Held;
            change.shipped_at = Some(*at);
            change.hold_until = Some(hold_deadline(*at, hold_period));
        },
        (Frozen, LifecycleEvent::Shipped { at }) if allocation.shipped_at.is_none() => {
            change.shipped_at = Some(*at);
            change.hold_until = Some(hold_deadline(*at, hold_period));
        },
        (Held | Frozen, LifecycleEvent::Shipped { .. }) => return Ok(None),
        (_, LifecycleEvent::Delivered { .. }) if allocation.delivery_confirmed_at.is_some() => return Ok(None),
        (Pending | Held | Frozen, LifecycleEvent::Delivered { at }) => {
            if status != Frozen {
                change.to = Held;
            }
            change.shipped_at = allocation.shipped_at.or(Some(*at));
            change.delivery_confirmed_at = Some(*at);
            change.hold_until = Some(hold_deadline(*at, hold_period));
        },
        (Held, LifecycleEvent::Release { now }) => {
            if allocation.delivery_confirmed_at.is_none() {
                return Err(not_due(allocation, "Delivery has not been confirmed."));
            }
            if !allocation.hold_elapsed(*now) {
                let until = allocation.hold_until.map(|t| t.to_rfc3339()).unwrap_or_else(|| "unknown".into());
                return Err(not_due(allocation, format!("The hold runs until {until}.")));
            }
            change.to = Released;
            change.movements.push(movement(MovementKind::Release, allocation.amount));
        },
        (Held, LifecycleEvent::ScheduledRelease { now }) => {
            if !allocation.hold_elapsed(*now) {
                return Err(not_due(allocation, "The hold has not elapsed."));
            }
            change.to = Released;
            change.movements.push(movement(MovementKind::Release, allocation.amount));
        },
        (Pending | Held, LifecycleEvent::Cancel) => {
            change.to = Refunded;
            change.movements.push(movement(MovementKind::Refund, allocation.amount));
        },
        (Pending | Held, LifecycleEvent::OpenDispute) => {
            change.to = Frozen;
        },
        (Frozen, LifecycleEvent::OpenDispute) => return Err(SettlementError::DuplicateDispute(allocation.id)),
        (Frozen, LifecycleEvent::DismissDispute { now }) => {
            change.to = Held;
            change.hold_until = allocation.hold_until.or(Some(hold_deadline(*now, hold_period)));
        },
        (Frozen, LifecycleEvent::SettleDispute { release_amount, refund_amount }) => {
            let mut errors = ValidationErrors::new();
            errors.check(release_amount.is_negative(), "release_amount", "must not be negative");
            errors.check(refund_amount.is_negative(), "refund_amount", "must not be negative");
            errors.check(
                *release_amount + *refund_amount != allocation.amount,
                "refund_amount",
                format!("release and refund must add up to the allocation amount of {}", allocation.amount),
            );
            errors.into_result(())?;
            change.to = if release_amount.is_positive() { Released } else { Refunded };
            if release_amount.is_positive() {
                change.movements.push(movement(MovementKind::Release, *release_amount));
            }
            if refund_amount.is_positive() {
                change.movements.push(movement(MovementKind::Refund, *refund_amount));
            }
        },
        _ => return Err(invalid(allocation, event)),
    }
    // zero-value allocations move no money
    change.movements.retain(|m| m.amount.is_positive());
    Ok(Some(change))
}
