use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    api::{
        flow_objects::OpenDisputeRequest,
        retry::{refund_with_retry, with_conflict_retry},
    },
    db_types::{Allocation, Dispute, DisputeResolution, EscrowTransaction, IdempotencyKey, MovementKind, NewDispute},
    escrow::{plan_transition, EscrowPolicy, LifecycleEvent},
    events::{DisputeOpenedEvent, DisputeResolvedEvent, EventProducers},
    traits::{DisputeWrite, PaymentGateway, RefundRequest, SettlementDatabase, SettlementError, TransitionBatch},
};

/// `DisputeApi` freezes allocations while a buyer's claim is investigated, and unfreezes them according to the outcome.
pub struct DisputeApi<B, G> {
    db: B,
    gateway: G,
    producers: EventProducers,
    policy: EscrowPolicy,
}

impl<B, G> Debug for DisputeApi<B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DisputeApi")
    }
}

impl<B, G> DisputeApi<B, G> {
    pub fn new(db: B, gateway: G, producers: EventProducers, policy: EscrowPolicy) -> Self {
        Self { db, gateway, producers, policy }
    }
}

impl<B, G> DisputeApi<B, G>
where
    B: SettlementDatabase,
    G: PaymentGateway,
{
    /// Opens a dispute against an allocation and freezes it. A frozen allocation is skipped by the release sweep and
    /// cannot be released or cancelled until the dispute is resolved.
    pub async fn open_dispute(&self, request: OpenDisputeRequest) -> Result<Dispute, SettlementError> {
        request.validate()?;
        let request = &request;
        with_conflict_retry(self.policy.conflict_retries, move || self.try_open_dispute(request)).await
    }

    async fn try_open_dispute(&self, request: &OpenDisputeRequest) -> Result<Dispute, SettlementError> {
        let (allocation, escrow) = self.allocation_and_escrow(request.allocation_id).await?;
        let change = plan_transition(&allocation, &LifecycleEvent::OpenDispute, self.policy.hold_period)?;
        let at = Utc::now();
        let new_dispute = NewDispute {
            allocation_id: allocation.id,
            reason: request.reason.trim().to_string(),
            opened_by: request.opened_by.trim().to_string(),
        };
        let batch =
            TransitionBatch::new(&escrow, change.into_iter().collect(), at).with_dispute(DisputeWrite::Open(new_dispute));
        let outcome = self.db.apply_transitions(batch).await?;
        let dispute = outcome
            .dispute
            .ok_or_else(|| SettlementError::DatabaseError("The new dispute was not returned by the backend".into()))?;
        let frozen = outcome.allocations.first().cloned().unwrap_or_else(|| allocation.clone());
        warn!(
            "⚖️ Dispute #{} opened by {} on allocation #{} (order {}). {} is frozen.",
            dispute.id, dispute.opened_by, frozen.id, frozen.order_id, frozen.amount
        );
        self.producers.allocation_transitions(&[allocation], &outcome.allocations, at).await;
        self.producers.dispute_opened(DisputeOpenedEvent { dispute: dispute.clone(), allocation: frozen }).await;
        Ok(dispute)
    }

    /// Closes an open dispute.
    ///
    /// * [`DisputeResolution::Dismiss`] returns the allocation to `Held`. The original hold deadline is kept, or the
    ///   hold starts now if the seller had not shipped.
    /// * [`DisputeResolution::Settle`] pays `release_amount` to the seller and refunds `refund_amount` to the customer.
    ///   The two must add up to the allocation amount. The refund is confirmed by the payment gateway before anything is
    ///   written.
    pub async fn resolve_dispute(
        &self,
        dispute_id: i64,
        resolution: DisputeResolution,
        now: DateTime<Utc>,
    ) -> Result<Allocation, SettlementError> {
        let resolution = &resolution;
        with_conflict_retry(self.policy.conflict_retries, move || self.try_resolve_dispute(dispute_id, resolution, now))
            .await
    }

    async fn try_resolve_dispute(
        &self,
        dispute_id: i64,
        resolution: &DisputeResolution,
        now: DateTime<Utc>,
    ) -> Result<Allocation, SettlementError> {
        let dispute = self.db.fetch_dispute(dispute_id).await?.ok_or(SettlementError::DisputeNotFound(dispute_id))?;
        if !dispute.is_open() {
            return Err(SettlementError::DisputeAlreadyResolved(dispute_id));
        }
        let (allocation, escrow) = self.allocation_and_escrow(dispute.allocation_id).await?;
        let event = match *resolution {
            DisputeResolution::Dismiss => LifecycleEvent::DismissDispute { now },
            DisputeResolution::Settle { release_amount, refund_amount } => {
                LifecycleEvent::SettleDispute { release_amount, refund_amount }
            },
        };
        let mut change = plan_transition(&allocation, &event, self.policy.hold_period)?
            .ok_or(SettlementError::DisputeAlreadyResolved(dispute_id))?;
        let mut batch_events = vec![];
        let refund = change.moved(MovementKind::Refund);
        if refund.is_positive() {
            let key = IdempotencyKey::refund(allocation.id);
            let request = RefundRequest {
                idempotency_key: key.event_id.clone(),
                order_id: allocation.order_id.clone(),
                capture_reference: escrow.capture_reference.clone(),
                amount: refund,
                currency: escrow.currency.clone(),
                reason: format!("Dispute #{dispute_id}: {}", dispute.reason),
            };
            let receipt = refund_with_retry(&self.gateway, &request, &self.policy.gateway).await?;
            for movement in change.movements.iter_mut().filter(|m| m.kind == MovementKind::Refund) {
                movement.reference = Some(receipt.reference.clone());
            }
            batch_events.push(key);
        }
        let batch = batch_events
            .into_iter()
            .fold(TransitionBatch::new(&escrow, vec![change], now), |b, k| b.with_event(k))
            .with_dispute(DisputeWrite::Close { dispute_id, resolution: *resolution });
        let outcome = match self.db.apply_transitions(batch).await {
            Ok(outcome) => outcome,
            Err(SettlementError::DuplicateEvent(key)) => {
                debug!("⚖️ Refund {key} was already recorded. Dispute #{dispute_id} was resolved concurrently.");
                return Err(SettlementError::DisputeAlreadyResolved(dispute_id));
            },
            Err(e) => return Err(e),
        };
        let updated = outcome.allocations.first().cloned().unwrap_or_else(|| allocation.clone());
        info!(
            "⚖️ Dispute #{dispute_id} on allocation #{} closed by {resolution}. The allocation is now {}.",
            updated.id, updated.status
        );
        self.producers.allocation_transitions(&[allocation], &outcome.allocations, now).await;
        if let Some(dispute) = outcome.dispute {
            self.producers.dispute_resolved(DisputeResolvedEvent { dispute, allocation: updated.clone() }).await;
        }
        Ok(updated)
    }

    async fn allocation_and_escrow(
        &self,
        allocation_id: i64,
    ) -> Result<(Allocation, EscrowTransaction), SettlementError> {
        let allocation =
            self.db.fetch_allocation(allocation_id).await?.ok_or(SettlementError::AllocationNotFound(allocation_id))?;
        let escrow = self
            .db
            .fetch_escrow(allocation.escrow_id)
            .await?
            .ok_or_else(|| SettlementError::EscrowNotFound(allocation.order_id.clone()))?;
        Ok((allocation, escrow))
    }

    pub async fn fetch_dispute(&self, dispute_id: i64) -> Result<Dispute, SettlementError> {
        self.db.fetch_dispute(dispute_id).await?.ok_or(SettlementError::DisputeNotFound(dispute_id))
    }

    pub async fn disputes_for_allocation(&self, allocation_id: i64) -> Result<Vec<Dispute>, SettlementError> {
        self.db.fetch_disputes_for_allocation(allocation_id).await
    }
}
