//! Connection lifecycle runtime.
//!
//! Ties the pieces together: a [`ConnectionRegistry`] spawns one
//! [`ConnectionCoordinator`] task per connection id; each coordinator
//! persists lifecycle events, supervises a [`WorkerPoolSupervisor`]
//! sized by the connection's client count, aggregates worker replies,
//! debounces command responses, and routes signals arriving on the
//! in-process [`PubSub`] bus out to its targets.

pub mod aggregator;
pub mod bootstrap;
pub mod coordinator;
pub mod flusher;
pub mod pubsub;
pub mod registry;
pub mod router;
pub mod validator;
pub mod worker;

pub use aggregator::{AggregateOutcome, AggregationSession};
pub use bootstrap::ConduitRuntime;
pub use coordinator::{ConnectionCoordinator, CoordinatorContext};
pub use flusher::PendingResponseFlusher;
pub use pubsub::{BusMessage, InProcessPubSub, PubSub, SubscriptionId};
pub use registry::ConnectionRegistry;
pub use router::route;
pub use validator::{CommandValidator, DefaultCommandValidator};
pub use worker::{
    MemberStatus, Worker, WorkerCommand, WorkerPoolSupervisor, WorkerReply, WorkerResponse,
    WorkerSpawner,
};
