//! The shared connectivity error taxonomy.

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;

/// Errors surfaced to callers of lifecycle commands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "error", rename_all = "camelCase")]
pub enum ConnectivityError {
    /// Command is invalid given the current state.
    #[error("Validation failed: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// The configuration itself is invalid (e.g. type change).
    #[error("Connection configuration invalid: {message}")]
    ConfigurationInvalid {
        /// What was wrong.
        message: String,
    },

    /// A connection with this id already exists.
    #[error("Connection already exists: {id}")]
    Conflict {
        /// Conflicting connection id.
        id: ConnectionId,
    },

    /// No connection with this id is known (or not yet initialized).
    #[error("Connection not accessible: {id}")]
    NotAccessible {
        /// Addressed connection id.
        id: ConnectionId,
    },

    /// Talking to the worker pool timed out or failed.
    #[error("Worker communication failed: {message}")]
    WorkerCommunication {
        /// Underlying failure description.
        message: String,
    },

    /// Writing to the event store failed. Fatal for the coordinator.
    #[error("Persistence failed: {message}")]
    Persistence {
        /// Underlying failure description.
        message: String,
    },
}

impl ConnectivityError {
    /// A validation failure with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// A configuration failure with the given message.
    pub fn configuration_invalid(message: impl Into<String>) -> Self {
        Self::ConfigurationInvalid {
            message: message.into(),
        }
    }

    /// A conflict on the given connection id.
    pub fn conflict(id: impl Into<ConnectionId>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// An inaccessible-connection error for the given id.
    pub fn not_accessible(id: impl Into<ConnectionId>) -> Self {
        Self::NotAccessible { id: id.into() }
    }

    /// A worker communication failure with the given message.
    pub fn worker_communication(message: impl Into<String>) -> Self {
        Self::WorkerCommunication {
            message: message.into(),
        }
    }

    /// A persistence failure with the given message.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Whether the coordinator survives this error.
    ///
    /// Worker communication failures never corrupt persisted state;
    /// persistence failures must escalate to the host supervisor.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::WorkerCommunication { .. }
            | Self::Conflict { .. }
            | Self::NotAccessible { .. } => true,
            Self::Validation { .. }
            | Self::ConfigurationInvalid { .. }
            | Self::Persistence { .. } => false,
        }
    }

    /// Error category string for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::ConfigurationInvalid { .. } => "configuration_invalid",
            Self::Conflict { .. } => "conflict",
            Self::NotAccessible { .. } => "not_accessible",
            Self::WorkerCommunication { .. } => "worker_communication",
            Self::Persistence { .. } => "persistence",
        }
    }
}
