//! Settlement events.
//!
//! The APIs publish an event after each committed state change. Subscribers register hooks in [`EventHooks`] and the
//! matching producers are handed to the APIs via [`EventProducers`]. Events are never published for work that was
//! rolled back, and handlers cannot affect the outcome of the operation that produced them.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
