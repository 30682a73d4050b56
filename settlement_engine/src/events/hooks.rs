use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    db_types::Allocation,
    events::{
        AllocationStatusEvent,
        DisputeOpenedEvent,
        DisputeResolvedEvent,
        EscrowCreatedEvent,
        EventHandler,
        EventProducer,
        Handler,
    },
};

type BoxedHook<E> = dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub escrow_created_producer: Vec<EventProducer<EscrowCreatedEvent>>,
    pub allocation_status_producer: Vec<EventProducer<AllocationStatusEvent>>,
    pub dispute_opened_producer: Vec<EventProducer<DisputeOpenedEvent>>,
    pub dispute_resolved_producer: Vec<EventProducer<DisputeResolvedEvent>>,
}

impl EventProducers {
    pub async fn escrow_created(&self, event: EscrowCreatedEvent) {
        for producer in &self.escrow_created_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn allocation_status_changed(&self, event: AllocationStatusEvent) {
        for producer in &self.allocation_status_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    /// Publishes an [`AllocationStatusEvent`] for every allocation in `after` whose status differs from its
    /// counterpart in `before`.
    pub async fn allocation_transitions(&self, before: &[Allocation], after: &[Allocation], at: DateTime<Utc>) {
        if self.allocation_status_producer.is_empty() {
            return;
        }
        for allocation in after {
            let old = before.iter().find(|a| a.id == allocation.id).map(|a| a.status);
            match old {
                Some(old_status) if old_status != allocation.status => {
                    self.allocation_status_changed(AllocationStatusEvent::new(old_status, allocation.clone(), at)).await;
                },
                _ => {},
            }
        }
    }

    pub async fn dispute_opened(&self, event: DisputeOpenedEvent) {
        for producer in &self.dispute_opened_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn dispute_resolved(&self, event: DisputeResolvedEvent) {
        for producer in &self.dispute_resolved_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_escrow_created: Option<EventHandler<EscrowCreatedEvent>>,
    pub on_allocation_status: Option<EventHandler<AllocationStatusEvent>>,
    pub on_dispute_opened: Option<EventHandler<DisputeOpenedEvent>>,
    pub on_dispute_resolved: Option<EventHandler<DisputeResolvedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_escrow_created: hooks.on_escrow_created.map(|f| EventHandler::new("escrow_created", buffer_size, f)),
            on_allocation_status: hooks
                .on_allocation_status
                .map(|f| EventHandler::new("allocation_status", buffer_size, f)),
            on_dispute_opened: hooks.on_dispute_opened.map(|f| EventHandler::new("dispute_opened", buffer_size, f)),
            on_dispute_resolved: hooks
                .on_dispute_resolved
                .map(|f| EventHandler::new("dispute_resolved", buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_escrow_created {
            result.escrow_created_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_allocation_status {
            result.allocation_status_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_dispute_opened {
            result.dispute_opened_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_dispute_resolved {
            result.dispute_resolved_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_escrow_created {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_allocation_status {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_dispute_opened {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_dispute_resolved {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_escrow_created: Option<Handler<EscrowCreatedEvent>>,
    pub on_allocation_status: Option<Handler<AllocationStatusEvent>>,
    pub on_dispute_opened: Option<Handler<DisputeOpenedEvent>>,
    pub on_dispute_resolved: Option<Handler<DisputeResolvedEvent>>,
}

impl EventHooks {
    pub fn on_escrow_created<F>(&mut self, f: F) -> &mut Self
    where F: Fn(EscrowCreatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_escrow_created = Some(Arc::new(f) as Arc<BoxedHook<EscrowCreatedEvent>>);
        self
    }

    pub fn on_allocation_status<F>(&mut self, f: F) -> &mut Self
    where F: Fn(AllocationStatusEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_allocation_status = Some(Arc::new(f) as Arc<BoxedHook<AllocationStatusEvent>>);
        self
    }

    pub fn on_dispute_opened<F>(&mut self, f: F) -> &mut Self
    where F: Fn(DisputeOpenedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_dispute_opened = Some(Arc::new(f) as Arc<BoxedHook<DisputeOpenedEvent>>);
        self
    }

    pub fn on_dispute_resolved<F>(&mut self, f: F) -> &mut Self
    where F: Fn(DisputeResolvedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync + 'static {
        self.on_dispute_resolved = Some(Arc::new(f) as Arc<BoxedHook<DisputeResolvedEvent>>);
        self
    }
}
