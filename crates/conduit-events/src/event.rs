//! Persisted lifecycle event types.

use serde::{Deserialize, Serialize};

use conduit_core::{Connection, ConnectionStatus};

/// One immutable lifecycle event of a connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// The connection was created with this configuration.
    Created {
        /// The created configuration.
        connection: Connection,
    },
    /// The configuration was replaced.
    Modified {
        /// The new configuration.
        connection: Connection,
    },
    /// Status changed to [`ConnectionStatus::Open`].
    Opened,
    /// Status changed to [`ConnectionStatus::Closed`].
    Closed,
    /// The connection was deleted.
    Deleted,
}

impl ConnectionEvent {
    /// Stable label of the event type, used as the pub/sub topic when the
    /// persisted event is published on the internal bus.
    pub fn type_label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "connection:created",
            Self::Modified { .. } => "connection:modified",
            Self::Opened => "connection:opened",
            Self::Closed => "connection:closed",
            Self::Deleted => "connection:deleted",
        }
    }

    /// The status an `Opened`/`Closed` event switches to, if any.
    pub fn status_change(&self) -> Option<ConnectionStatus> {
        match self {
            Self::Opened => Some(ConnectionStatus::Open),
            Self::Closed => Some(ConnectionStatus::Closed),
            _ => None,
        }
    }
}

/// An event with the sequence number the store assigned on append.
/// The first event of a connection has sequence 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedEvent {
    /// Monotonically increasing, gap-free per connection.
    pub sequence: u64,
    /// The persisted event.
    pub event: ConnectionEvent,
}

/// Point-in-time serialization of a connection's state.
///
/// Invariant: `sequence` never exceeds the last applied event sequence;
/// replay resumes at `sequence + 1`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// State at the time of the snapshot.
    pub connection: Connection,
    /// Sequence number of the last event the snapshot reflects.
    pub sequence: u64,
}
