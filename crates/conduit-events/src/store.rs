//! The [`EventStore`] trait — the seam to the durable backend.

use async_trait::async_trait;

use conduit_core::ConnectionId;

use crate::event::{ConnectionEvent, SequencedEvent, Snapshot};

/// Errors reported by an event store backend.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// The backend rejected or lost the operation.
    #[error("Event store backend error: {message}")]
    Backend {
        /// Underlying failure description.
        message: String,
    },
}

impl EventStoreError {
    /// Convenience constructor.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Append-only event log keyed by connection id, plus a snapshot store.
///
/// Exactly one coordinator writes per connection id at a time; that
/// single-owner guarantee is a precondition of the hosting runtime, not
/// enforced here.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event, returning it with its assigned sequence number.
    /// The first event of a connection gets sequence 1.
    async fn append(
        &self,
        id: &ConnectionId,
        event: ConnectionEvent,
    ) -> Result<SequencedEvent, EventStoreError>;

    /// All events with `sequence > from_sequence`, in order.
    async fn replay(
        &self,
        id: &ConnectionId,
        from_sequence: u64,
    ) -> Result<Vec<SequencedEvent>, EventStoreError>;

    /// The most recent snapshot, if one was saved.
    async fn load_snapshot(&self, id: &ConnectionId)
        -> Result<Option<Snapshot>, EventStoreError>;

    /// Persist a snapshot, replacing any previous one.
    async fn save_snapshot(
        &self,
        id: &ConnectionId,
        snapshot: Snapshot,
    ) -> Result<(), EventStoreError>;

    /// Sequence number of the last appended event, 0 when empty.
    async fn latest_sequence(&self, id: &ConnectionId) -> Result<u64, EventStoreError>;
}
