//! Domain model for the conduit connectivity bridge.
//!
//! A [`Connection`] describes one bridge between the internal event bus
//! and an external messaging system (AMQP, MQTT). Lifecycle commands and
//! their responses, inbound bus signals, and the shared error taxonomy
//! live here so every other crate speaks the same vocabulary.

pub mod commands;
pub mod connection;
pub mod errors;
pub mod signal;

pub use commands::{
    AggregateStatus, AggregatedResponse, Command, CommandKind, Headers, Response, ResponseKind,
    HEADER_CORRELATION_ID, HEADER_ORIGIN, HEADER_TIMEOUT,
};
pub use connection::{
    Connection, ConnectionId, ConnectionStatus, ConnectionType, Source, Target, Topic,
};
pub use errors::ConnectivityError;
pub use signal::{substitute_placeholders, EntityId, OutboundSignal, Signal};
