//! Event fold and snapshot-aware recovery.
//!
//! Replaying all events in order from sequence 0, or from the last
//! snapshot plus subsequent events, deterministically reconstructs the
//! current connection or its absence.

use tracing::debug;

use conduit_core::{Connection, ConnectionId};

use crate::event::ConnectionEvent;
use crate::store::{EventStore, EventStoreError};

/// Result of recovering a connection from the event store.
#[derive(Clone, Debug, PartialEq)]
pub struct RecoveredState {
    /// The reconstructed connection, `None` when never created or deleted.
    pub connection: Option<Connection>,
    /// Sequence number of the last applied event, 0 when the log is empty.
    pub last_sequence: u64,
    /// Sequence number the last loaded snapshot reflects, 0 without one.
    pub snapshot_sequence: u64,
}

/// Apply one event to the current state.
pub fn apply(state: Option<Connection>, event: &ConnectionEvent) -> Option<Connection> {
    if let Some(status) = event.status_change() {
        return state.map(|connection| connection.with_status(status));
    }
    match event {
        ConnectionEvent::Created { connection } | ConnectionEvent::Modified { connection } => {
            Some(connection.clone())
        }
        ConnectionEvent::Deleted => None,
        // Status events were folded above.
        ConnectionEvent::Opened | ConnectionEvent::Closed => state,
    }
}

/// Reconstruct a connection: load the snapshot (if any), then fold the
/// events past its sequence number.
pub async fn recover(
    store: &dyn EventStore,
    id: &ConnectionId,
) -> Result<RecoveredState, EventStoreError> {
    let snapshot = store.load_snapshot(id).await?;
    let (mut connection, snapshot_sequence) = match snapshot {
        Some(snapshot) => {
            debug!(%id, sequence = snapshot.sequence, "recovering from snapshot");
            (Some(snapshot.connection), snapshot.sequence)
        }
        None => (None, 0),
    };

    let mut last_sequence = snapshot_sequence;
    for sequenced in store.replay(id, snapshot_sequence).await? {
        connection = apply(connection, &sequenced.event);
        last_sequence = sequenced.sequence;
    }

    debug!(%id, last_sequence, recovered = connection.is_some(), "recovery complete");
    Ok(RecoveredState {
        connection,
        last_sequence,
        snapshot_sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Snapshot;
    use crate::memory::InMemoryEventStore;
    use conduit_core::{ConnectionStatus, ConnectionType};

    fn sample(id: &str, status: ConnectionStatus) -> Connection {
        Connection {
            id: ConnectionId::new(id),
            connection_type: ConnectionType::Amqp091,
            status,
            uri: "amqp://broker".into(),
            client_count: 3,
            sources: vec![],
            targets: vec![],
        }
    }

    #[test]
    fn apply_created_then_status_changes() {
        let state = apply(
            None,
            &ConnectionEvent::Created {
                connection: sample("c1", ConnectionStatus::Closed),
            },
        );
        assert_eq!(state.as_ref().unwrap().status, ConnectionStatus::Closed);

        let state = apply(state, &ConnectionEvent::Opened);
        assert_eq!(state.as_ref().unwrap().status, ConnectionStatus::Open);

        let state = apply(state, &ConnectionEvent::Deleted);
        assert!(state.is_none());
    }

    #[test]
    fn status_change_without_connection_stays_absent() {
        assert!(apply(None, &ConnectionEvent::Opened).is_none());
        assert!(apply(None, &ConnectionEvent::Closed).is_none());
    }

    #[tokio::test]
    async fn replay_is_deterministic() {
        let store = InMemoryEventStore::new();
        let id = ConnectionId::new("c1");
        let _ = store
            .append(
                &id,
                ConnectionEvent::Created {
                    connection: sample("c1", ConnectionStatus::Open),
                },
            )
            .await
            .unwrap();
        let _ = store.append(&id, ConnectionEvent::Closed).await.unwrap();
        let _ = store.append(&id, ConnectionEvent::Opened).await.unwrap();

        let first = recover(&store, &id).await.unwrap();
        let second = recover(&store, &id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.last_sequence, 3);
        assert_eq!(first.connection.unwrap().status, ConnectionStatus::Open);
    }

    #[tokio::test]
    async fn snapshot_plus_tail_equals_full_replay() {
        let store = InMemoryEventStore::new();
        let id = ConnectionId::new("c1");
        let _ = store
            .append(
                &id,
                ConnectionEvent::Created {
                    connection: sample("c1", ConnectionStatus::Open),
                },
            )
            .await
            .unwrap();
        // 9 more events to reach sequence 10
        for _ in 0..9 {
            let _ = store.append(&id, ConnectionEvent::Opened).await.unwrap();
        }
        let _ = store.append(&id, ConnectionEvent::Closed).await.unwrap();
        let _ = store.append(&id, ConnectionEvent::Opened).await.unwrap();

        let full = recover(&store, &id).await.unwrap();
        assert_eq!(full.last_sequence, 12);

        // Same store with a snapshot at sequence 10
        store
            .save_snapshot(
                &id,
                Snapshot {
                    connection: sample("c1", ConnectionStatus::Open),
                    sequence: 10,
                },
            )
            .await
            .unwrap();
        let from_snapshot = recover(&store, &id).await.unwrap();

        assert_eq!(from_snapshot.connection, full.connection);
        assert_eq!(from_snapshot.last_sequence, full.last_sequence);
        assert_eq!(from_snapshot.snapshot_sequence, 10);
    }

    #[tokio::test]
    async fn deleted_connection_recovers_as_absent() {
        let store = InMemoryEventStore::new();
        let id = ConnectionId::new("c1");
        let _ = store
            .append(
                &id,
                ConnectionEvent::Created {
                    connection: sample("c1", ConnectionStatus::Open),
                },
            )
            .await
            .unwrap();
        let _ = store.append(&id, ConnectionEvent::Deleted).await.unwrap();

        let recovered = recover(&store, &id).await.unwrap();
        assert!(recovered.connection.is_none());
        assert_eq!(recovered.last_sequence, 2);
    }

    #[tokio::test]
    async fn empty_log_recovers_as_uninitialized() {
        let store = InMemoryEventStore::new();
        let recovered = recover(&store, &ConnectionId::new("new")).await.unwrap();
        assert!(recovered.connection.is_none());
        assert_eq!(recovered.last_sequence, 0);
    }
}
