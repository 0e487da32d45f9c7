//! In-memory reference implementation of the [`EventStore`] trait.
//!
//! Used in tests and wherever durability is provided elsewhere. Sequence
//! numbers are assigned per connection id starting at 1.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use conduit_core::ConnectionId;

use crate::event::{ConnectionEvent, SequencedEvent, Snapshot};
use crate::store::{EventStore, EventStoreError};

#[derive(Default)]
struct Inner {
    logs: HashMap<ConnectionId, Vec<SequencedEvent>>,
    snapshots: HashMap<ConnectionId, Snapshot>,
}

/// In-memory event + snapshot store.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for a connection.
    pub fn event_count(&self, id: &ConnectionId) -> usize {
        self.inner.lock().logs.get(id).map_or(0, Vec::len)
    }

    /// Whether a snapshot exists for a connection.
    pub fn has_snapshot(&self, id: &ConnectionId) -> bool {
        self.inner.lock().snapshots.contains_key(id)
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        id: &ConnectionId,
        event: ConnectionEvent,
    ) -> Result<SequencedEvent, EventStoreError> {
        let mut inner = self.inner.lock();
        let log = inner.logs.entry(id.clone()).or_default();
        let sequence = log.last().map_or(1, |last| last.sequence + 1);
        let sequenced = SequencedEvent { sequence, event };
        log.push(sequenced.clone());
        trace!(%id, sequence, "event appended");
        Ok(sequenced)
    }

    async fn replay(
        &self,
        id: &ConnectionId,
        from_sequence: u64,
    ) -> Result<Vec<SequencedEvent>, EventStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .logs
            .get(id)
            .map(|log| {
                log.iter()
                    .filter(|e| e.sequence > from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_snapshot(
        &self,
        id: &ConnectionId,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        Ok(self.inner.lock().snapshots.get(id).cloned())
    }

    async fn save_snapshot(
        &self,
        id: &ConnectionId,
        snapshot: Snapshot,
    ) -> Result<(), EventStoreError> {
        trace!(%id, sequence = snapshot.sequence, "snapshot saved");
        let _ = self.inner.lock().snapshots.insert(id.clone(), snapshot);
        Ok(())
    }

    async fn latest_sequence(&self, id: &ConnectionId) -> Result<u64, EventStoreError> {
        Ok(self
            .inner
            .lock()
            .logs
            .get(id)
            .and_then(|log| log.last())
            .map_or(0, |last| last.sequence))
    }
}
