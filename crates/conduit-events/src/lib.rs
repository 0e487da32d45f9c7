//! Event sourcing for connection lifecycles.
//!
//! A connection's configuration is persisted as an append-only log of
//! [`ConnectionEvent`]s. Replaying the log in order from sequence 0 (or
//! from the last [`Snapshot`]) deterministically reconstructs the current
//! [`conduit_core::Connection`] or its absence. The durable backend is
//! consumed through the [`EventStore`] trait; [`InMemoryEventStore`] is
//! the reference implementation.

pub mod event;
pub mod memory;
pub mod replay;
pub mod store;

pub use event::{ConnectionEvent, SequencedEvent, Snapshot};
pub use memory::InMemoryEventStore;
pub use replay::{apply, recover, RecoveredState};
pub use store::{EventStore, EventStoreError};
