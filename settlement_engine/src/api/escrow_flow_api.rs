use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    api::{
        flow_objects::{CancellationOutcome, CaptureNotification, CaptureOutcome, ShipmentConfirmation},
        retry::{refund_with_retry, with_conflict_retry},
    },
    commission::{commission_amount, resolve_rule},
    db_types::{
        Allocation,
        AllocationStatus,
        EscrowTransaction,
        IdempotencyKey,
        MovementKind,
        NewOrder,
        Order,
        OrderId,
        OrderStatusType,
        SellerShare,
    },
    escrow::{check_capture, plan_transition, split_capture, EscrowPolicy, LifecycleEvent},
    events::{EscrowCreatedEvent, EventProducers},
    traits::{
        InsertEscrowResult,
        NewAllocation,
        NewCommission,
        NewEscrow,
        PaymentGateway,
        RefundRequest,
        SettlementDatabase,
        SettlementError,
        SweepFailure,
        SweepResult,
        TransitionBatch,
    },
};

/// `EscrowFlowApi` moves money through escrow: it turns payment captures into per-seller allocations, walks those
/// allocations through shipment, hold and release, and unwinds them when an order is cancelled.
///
/// Every state change is planned from a fresh read and applied as a single compare-and-swap batch. Batches that lose a
/// race are re-planned up to [`EscrowPolicy::conflict_retries`] times.
pub struct EscrowFlowApi<B, G> {
    db: B,
    gateway: G,
    producers: EventProducers,
    policy: EscrowPolicy,
}

impl<B, G> Debug for EscrowFlowApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EscrowFlowApi")
    }
}

impl<B, G> EscrowFlowApi<B, G> {
    pub fn new(db: B, gateway: G, producers: EventProducers, policy: EscrowPolicy) -> Self {
        Self { db, gateway, producers, policy }
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }

    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }
}

impl<B, G> EscrowFlowApi<B, G>
where
    B: SettlementDatabase,
    G: PaymentGateway,
{
    /// Stores a priced order so that a later capture can be allocated against it. Placing the same order twice
    /// returns the stored order unchanged.
    pub async fn place_order(&self, order: NewOrder) -> Result<Order, SettlementError> {
        order.validate(&self.policy.currency)?;
        let (order, inserted) = self.db.insert_order(order).await?;
        if inserted {
            info!("💸 Order {} placed by customer {} for {}", order.order_id, order.customer_id, order.total);
        } else {
            debug!("💸 Order {} was already placed", order.order_id);
        }
        Ok(order)
    }

    /// Handles a capture notification from the payment gateway.
    ///
    /// The captured amount is split across the sellers on the order in proportion to their contributions, and each
    /// seller's commission is resolved and recorded. Escrow, allocations, commissions and the order's `Paid` status
    /// are all written in one transaction.
    ///
    /// The same capture (order id and capture reference) is only ever processed once. A repeat returns the existing
    /// escrow with `replayed` set.
    pub async fn process_capture(&self, capture: CaptureNotification) -> Result<CaptureOutcome, SettlementError> {
        capture.validate(&self.policy.currency)?;
        let key = IdempotencyKey::capture(&capture.order_id, &capture.capture_reference);
        if self.db.fetch_idempotency_record(&key).await?.is_some() {
            debug!("💸 Capture {key} has already been processed. Returning the existing escrow.");
            return self.existing_escrow(&capture.order_id, true).await;
        }
        let order = self.fetch_order(&capture.order_id).await?;
        if matches!(order.status, OrderStatusType::Cancelled | OrderStatusType::Refunded) {
            warn!("💸 Capture {key} arrived for order {}, which is {}", order.order_id, order.status);
            return Err(SettlementError::AllocationMismatch {
                order_id: order.order_id.clone(),
                reason: format!("The order is {}", order.status),
            });
        }
        let items = self.db.fetch_order_items(&order.order_id).await?;
        let shares = SellerShare::from_items(&items);
        check_capture(&order, &shares, capture.amount, self.policy.mismatch_tolerance)?;
        let lines = split_capture(&order.order_id, capture.amount, &shares, self.policy.remainder_policy)?;
        let at = capture.captured_at.unwrap_or_else(Utc::now);
        let mut allocations = Vec::with_capacity(lines.len());
        for line in lines {
            let rules = self.db.fetch_candidate_rules(line.seller_id.clone(), line.category_id.clone()).await?;
            let rule = resolve_rule(&rules, &line.seller_id, line.category_id.as_ref(), line.contribution, at)?;
            let commission =
                NewCommission { rule_id: rule.id, rate: rule.rate, amount: commission_amount(rule.rate, line.amount) };
            trace!(
                "💸 Seller {} receives {} of {} with {} commission (rule #{})",
                line.seller_id,
                line.amount,
                capture.amount,
                commission.amount,
                rule.id
            );
            allocations.push(NewAllocation {
                seller_id: line.seller_id,
                category_id: line.category_id,
                contribution: line.contribution,
                amount: line.amount,
                commission,
            });
        }
        let escrow = NewEscrow {
            order_id: order.order_id.clone(),
            capture_reference: capture.capture_reference.clone(),
            total_amount: capture.amount,
            currency: order.currency.clone(),
            allocations,
            created_at: at,
        };
        match self.db.create_escrow(escrow).await? {
            InsertEscrowResult::Inserted(escrow) => {
                let allocations = self.db.fetch_allocations_for_order(&escrow.order_id).await?;
                info!(
                    "💸 Escrow #{} holds {} for order {} across {} sellers",
                    escrow.id,
                    escrow.total_amount,
                    escrow.order_id,
                    allocations.len()
                );
                self.producers.escrow_created(EscrowCreatedEvent::new(escrow.clone(), allocations.clone())).await;
                Ok(CaptureOutcome { escrow, allocations, replayed: false })
            },
            InsertEscrowResult::AlreadyProcessed(escrow) => {
                debug!("💸 Capture {key} was processed concurrently as escrow #{}", escrow.id);
                self.existing_escrow(&escrow.order_id, true).await
            },
        }
    }

    async fn existing_escrow(&self, order_id: &OrderId, replayed: bool) -> Result<CaptureOutcome, SettlementError> {
        let escrow = self.escrow_for(order_id).await?;
        let allocations = self.db.fetch_allocations_for_order(order_id).await?;
        Ok(CaptureOutcome { escrow, allocations, replayed })
    }

    async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, SettlementError> {
        self.db.fetch_order(order_id).await?.ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))
    }

    async fn escrow_for(&self, order_id: &OrderId) -> Result<EscrowTransaction, SettlementError> {
        self.db.fetch_escrow_for_order(order_id).await?.ok_or_else(|| SettlementError::EscrowNotFound(order_id.clone()))
    }

    /// Handles a carrier's shipment or delivery confirmation for one seller's part of an order. The allocation moves
    /// to `Held` and its hold clock starts (or restarts, on delivery).
    ///
    /// Each tracking milestone is processed once. Repeats return the allocation as it stands.
    pub async fn confirm_shipment(&self, confirmation: ShipmentConfirmation) -> Result<Allocation, SettlementError> {
        confirmation.validate()?;
        let confirmation = &confirmation;
        with_conflict_retry(self.policy.conflict_retries, move || self.try_confirm_shipment(confirmation)).await
    }

    async fn try_confirm_shipment(&self, confirmation: &ShipmentConfirmation) -> Result<Allocation, SettlementError> {
        let key = confirmation.idempotency_key();
        let escrow = self.escrow_for(&confirmation.order_id).await?;
        let allocation = self
            .db
            .fetch_allocation_for_seller(&confirmation.order_id, &confirmation.seller_id)
            .await?
            .ok_or_else(|| SettlementError::SellerNotOnOrder {
                order_id: confirmation.order_id.clone(),
                seller_id: confirmation.seller_id.clone(),
            })?;
        if self.db.fetch_idempotency_record(&key).await?.is_some() {
            debug!("💸 Carrier event {key} has already been processed");
            return Ok(allocation);
        }
        let event = match confirmation.delivery_time() {
            Some(at) => LifecycleEvent::Delivered { at },
            None => LifecycleEvent::Shipped { at: confirmation.shipped_at },
        };
        let change = plan_transition(&allocation, &event, self.policy.hold_period)?;
        let at = Utc::now();
        let batch = TransitionBatch::new(&escrow, change.into_iter().collect(), at)
            .with_event(key.clone())
            .with_shipment(confirmation.to_shipment(allocation.id));
        match self.db.apply_transitions(batch).await {
            Ok(outcome) => {
                self.producers.allocation_transitions(&[allocation.clone()], &outcome.allocations, at).await;
                let updated = outcome.allocations.into_iter().next().unwrap_or(allocation);
                info!(
                    "💸 {} for allocation #{} (order {}) recorded. It is {} until {}",
                    event,
                    updated.id,
                    updated.order_id,
                    updated.status,
                    updated.hold_until.map(|t| t.to_rfc3339()).unwrap_or_else(|| "further notice".into())
                );
                Ok(updated)
            },
            Err(SettlementError::DuplicateEvent(_)) => {
                debug!("💸 Carrier event {key} was processed concurrently");
                let id = allocation.id;
                self.db.fetch_allocation(id).await?.ok_or(SettlementError::AllocationNotFound(id))
            },
            Err(e) => Err(e),
        }
    }

    /// Pays out an allocation on request. Delivery must have been confirmed and the hold period must have elapsed.
    pub async fn release_allocation(
        &self,
        allocation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Allocation, SettlementError> {
        let event = LifecycleEvent::Release { now };
        let event = &event;
        let allocation =
            with_conflict_retry(self.policy.conflict_retries, move || self.try_transition(allocation_id, event, now))
                .await?;
        info!(
            "💸 Allocation #{allocation_id} released {} to seller {}",
            allocation.released_amount, allocation.seller_id
        );
        Ok(allocation)
    }

    /// Releases every `Held` allocation whose hold has elapsed at `now` and that has no open dispute, up to the
    /// configured batch size. Each allocation is released in its own transaction, so one failure does not hold up
    /// the rest.
    pub async fn run_release_sweep(&self, now: DateTime<Utc>) -> Result<SweepResult, SettlementError> {
        let due = self.db.fetch_allocations_due_for_release(now, self.policy.sweep_batch_size).await?;
        let mut result = SweepResult { processed: due.len(), ..Default::default() };
        let event = LifecycleEvent::ScheduledRelease { now };
        let event = &event;
        for allocation in due {
            let id = allocation.id;
            match with_conflict_retry(self.policy.conflict_retries, move || self.try_transition(id, event, now)).await {
                Ok(released) => result.released.push(released),
                Err(e) => {
                    warn!("🕰️ Allocation #{id} could not be released: {e}");
                    result.failed.push(SweepFailure { allocation_id: id, reason: e.to_string() });
                },
            }
        }
        if result.is_empty() {
            trace!("🕰️ No allocations are due for release");
        } else {
            info!("🕰️ Release sweep complete: {result}");
        }
        Ok(result)
    }

    async fn try_transition(
        &self,
        allocation_id: i64,
        event: &LifecycleEvent,
        at: DateTime<Utc>,
    ) -> Result<Allocation, SettlementError> {
        let allocation =
            self.db.fetch_allocation(allocation_id).await?.ok_or(SettlementError::AllocationNotFound(allocation_id))?;
        let escrow = self
            .db
            .fetch_escrow(allocation.escrow_id)
            .await?
            .ok_or_else(|| SettlementError::EscrowNotFound(allocation.order_id.clone()))?;
        let Some(change) = plan_transition(&allocation, event, self.policy.hold_period)? else {
            return Ok(allocation);
        };
        let outcome = self.db.apply_transitions(TransitionBatch::new(&escrow, vec![change], at)).await?;
        self.producers.allocation_transitions(&[allocation.clone()], &outcome.allocations, at).await;
        Ok(outcome.allocations.into_iter().next().unwrap_or(allocation))
    }

    /// Cancels an order.
    ///
    /// * An order that was never captured is simply marked `Cancelled`.
    /// * Otherwise every allocation that has not already been paid out or refunded is refunded through the payment
    ///   gateway, and all of them are moved to `Refunded` together. If any allocation is under dispute, nothing is
    ///   refunded and the cancellation fails.
    /// * Cancelling an order that is already cancelled or refunded changes nothing.
    pub async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<CancellationOutcome, SettlementError> {
        with_conflict_retry(self.policy.conflict_retries, move || self.try_cancel_order(order_id, reason)).await
    }

    async fn try_cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<CancellationOutcome, SettlementError> {
        let order = self.fetch_order(order_id).await?;
        if matches!(order.status, OrderStatusType::Cancelled | OrderStatusType::Refunded) {
            debug!("💸 Order {order_id} is already {}. Nothing to cancel.", order.status);
            return Ok(CancellationOutcome { order, refunded: vec![] });
        }
        let Some(escrow) = self.db.fetch_escrow_for_order(order_id).await? else {
            let order = self.db.update_order_status(order_id, OrderStatusType::Cancelled).await?;
            info!("💸 Order {order_id} was cancelled before capture. {reason}");
            return Ok(CancellationOutcome { order, refunded: vec![] });
        };
        let allocations = self.db.fetch_allocations_for_order(order_id).await?;
        if let Some(frozen) = allocations.iter().find(|a| a.status == AllocationStatus::Frozen) {
            warn!("💸 Order {order_id} cannot be cancelled while allocation #{} is under dispute", frozen.id);
            return Err(SettlementError::InvalidStateTransition {
                allocation_id: frozen.id,
                from: frozen.status,
                action: "cancellation".into(),
            });
        }
        let open = allocations.iter().filter(|a| !a.status.is_terminal()).collect::<Vec<_>>();
        if open.is_empty() {
            let settled = allocations.first().map(|a| a.id).unwrap_or_default();
            return Err(SettlementError::AllocationAlreadySettled(settled));
        }
        let mut changes = Vec::with_capacity(open.len());
        let mut keys = Vec::with_capacity(open.len());
        for allocation in &open {
            let planned = plan_transition(allocation, &LifecycleEvent::Cancel, self.policy.hold_period)?;
            let Some(mut change) = planned else {
                continue;
            };
            let key = IdempotencyKey::refund(allocation.id);
            let amount = change.moved(MovementKind::Refund);
            if amount.is_positive() {
                let request = RefundRequest {
                    idempotency_key: key.event_id.clone(),
                    order_id: order_id.clone(),
                    capture_reference: escrow.capture_reference.clone(),
                    amount,
                    currency: escrow.currency.clone(),
                    reason: reason.to_string(),
                };
                let receipt = refund_with_retry(&self.gateway, &request, &self.policy.gateway).await?;
                for movement in change.movements.iter_mut().filter(|m| m.kind == MovementKind::Refund) {
                    movement.reference = Some(receipt.reference.clone());
                }
            }
            keys.push(key);
            changes.push(change);
        }
        let at = Utc::now();
        let batch = keys.into_iter().fold(TransitionBatch::new(&escrow, changes, at), |b, k| b.with_event(k));
        let outcome = match self.db.apply_transitions(batch).await {
            Ok(outcome) => outcome,
            Err(SettlementError::DuplicateEvent(key)) => {
                debug!("💸 Refund {key} for order {order_id} was recorded concurrently");
                let order = self.fetch_order(order_id).await?;
                let refunded = self
                    .db
                    .fetch_allocations_for_order(order_id)
                    .await?
                    .into_iter()
                    .filter(|a| a.status == AllocationStatus::Refunded)
                    .collect();
                return Ok(CancellationOutcome { order, refunded });
            },
            Err(e) => return Err(e),
        };
        self.producers.allocation_transitions(&allocations, &outcome.allocations, at).await;
        let order = self.fetch_order(order_id).await?;
        info!(
            "💸 Order {order_id} cancelled. {} allocations refunded, order is {}. {reason}",
            outcome.allocations.len(),
            order.status
        );
        Ok(CancellationOutcome { order, refunded: outcome.allocations })
    }
}
