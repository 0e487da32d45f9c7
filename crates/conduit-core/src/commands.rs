//! Lifecycle commands and their responses.
//!
//! Every command carries the connection id it addresses and a [`Headers`]
//! bag (correlation id, origin, per-request timeout). Responses mirror
//! the commands; multi-worker answers are merged into an
//! [`AggregatedResponse`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{Connection, ConnectionId, ConnectionStatus};

/// Well-known header carrying the sender attribution of a signal.
pub const HEADER_ORIGIN: &str = "origin";
/// Well-known header overriding the worker round-trip timeout (ms).
pub const HEADER_TIMEOUT: &str = "timeout";
/// Well-known header correlating a command with its response.
pub const HEADER_CORRELATION_ID: &str = "correlation-id";

/// String map carried by every command and echoed on its response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Empty header bag.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Insert a header, returning self for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.0.insert(key.into(), value.into());
        self
    }

    /// Look up a header value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether no headers are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sender attribution, used for anti-echo filtering.
    pub fn origin(&self) -> Option<&str> {
        self.get(HEADER_ORIGIN)
    }

    /// Correlation id, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.get(HEADER_CORRELATION_ID)
    }

    /// Per-request timeout override in milliseconds.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.get(HEADER_TIMEOUT).and_then(|v| v.parse().ok())
    }
}

/// A lifecycle command addressed to one connection.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// Connection the command addresses.
    pub id: ConnectionId,
    /// Header bag echoed on the response.
    pub headers: Headers,
    /// What to do.
    pub kind: CommandKind,
}

impl Command {
    /// Build a command with empty headers.
    pub fn new(id: impl Into<ConnectionId>, kind: CommandKind) -> Self {
        Self {
            id: id.into(),
            headers: Headers::empty(),
            kind,
        }
    }

    /// Build a command with the given headers.
    pub fn with_headers(id: impl Into<ConnectionId>, kind: CommandKind, headers: Headers) -> Self {
        Self {
            id: id.into(),
            headers,
            kind,
        }
    }

    /// Short label of the command kind, for logging.
    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            CommandKind::Create(_) => "create",
            CommandKind::Modify(_) => "modify",
            CommandKind::Open => "open",
            CommandKind::Close => "close",
            CommandKind::Delete => "delete",
            CommandKind::Test(_) => "test",
            CommandKind::RetrieveConnection => "retrieve-connection",
            CommandKind::RetrieveStatus => "retrieve-status",
            CommandKind::RetrieveMetrics => "retrieve-metrics",
        }
    }
}

/// The finite set of lifecycle operations.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    /// Create a new connection from the given configuration.
    Create(Connection),
    /// Replace the configuration of an existing connection.
    Modify(Connection),
    /// Open a closed connection.
    Open,
    /// Close a connection (idempotent).
    Close,
    /// Delete a connection; its coordinator terminates.
    Delete,
    /// Probe connectivity without persisting anything.
    Test(Connection),
    /// Read the full configuration.
    RetrieveConnection,
    /// Read the current status.
    RetrieveStatus,
    /// Fetch live metrics from the worker pool.
    RetrieveMetrics,
}

/// Success response to a lifecycle command.
///
/// Mirrors [`Command`]: the header bag of the triggering command is
/// echoed back so callers can correlate replies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Header bag echoed from the command.
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    /// What happened.
    #[serde(flatten)]
    pub kind: ResponseKind,
}

impl Response {
    /// Build a response with empty headers.
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            headers: Headers::empty(),
            kind,
        }
    }

    /// Build a response echoing the given command headers.
    pub fn with_headers(kind: ResponseKind, headers: Headers) -> Self {
        Self { headers, kind }
    }

    /// Correlation id echoed from the command, if present.
    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.correlation_id()
    }
}

/// Payload of a [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResponseKind {
    /// Connection was created and persisted.
    Created {
        /// The persisted configuration.
        connection: Connection,
    },
    /// Connection configuration was replaced.
    Modified {
        /// Id of the modified connection.
        id: ConnectionId,
    },
    /// Connection was opened.
    Opened {
        /// Id of the opened connection.
        id: ConnectionId,
    },
    /// Connection was closed.
    Closed {
        /// Id of the closed connection.
        id: ConnectionId,
    },
    /// Connection was deleted.
    Deleted {
        /// Id of the deleted connection.
        id: ConnectionId,
    },
    /// Live connectivity test succeeded.
    TestSucceeded {
        /// Id of the tested connection.
        id: ConnectionId,
        /// Human-readable outcome detail.
        detail: String,
    },
    /// Full configuration read-back.
    RetrievedConnection {
        /// The current configuration.
        connection: Connection,
    },
    /// Status read-back.
    RetrievedStatus {
        /// Id of the connection.
        id: ConnectionId,
        /// Current persisted status.
        status: ConnectionStatus,
    },
    /// Merged answers from all workers of the pool.
    Aggregated(AggregatedResponse),
}

/// Outcome summary of a multi-worker request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    /// All collected items succeeded.
    Ok,
    /// At least one collected item was a failure.
    Failure,
}

/// One combined reply built from the responses of all workers of a
/// connection. Carries the first response's declared type; individual
/// responses are merged, not reduced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResponse {
    /// Connection the request addressed.
    pub connection_id: ConnectionId,
    /// Declared type of the first collected response.
    pub response_type: String,
    /// All collected response payloads, in arrival order.
    pub responses: Vec<Value>,
    /// Failure-dominant outcome summary.
    pub status: AggregateStatus,
}
