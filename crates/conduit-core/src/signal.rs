//! Internal bus signals and target address placeholder resolution.
//!
//! Signals arrive from the platform's event bus and are routed outward
//! through a connection's targets. Target addresses may contain
//! `{{ entity:id }}`, `{{ entity:namespace }}` and `{{ entity:name }}`
//! placeholders resolved from the signal's entity id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{Target, Topic};

/// Entity id in `namespace:name` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create an entity id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Part before the first `:`, empty if there is none.
    pub fn namespace(&self) -> &str {
        self.0.split_once(':').map_or("", |(ns, _)| ns)
    }

    /// Part after the first `:`, or the full id if there is none.
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// An internal signal considered for outbound routing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// Signal type label, for logging.
    pub signal_type: String,
    /// Bus topic the signal was published on.
    pub topic: Topic,
    /// Entity the signal concerns, `namespace:name`.
    pub entity_id: EntityId,
    /// Subjects that are required to read this signal.
    pub required_subjects: Vec<String>,
    /// Sender attribution; signals originating from a connection carry
    /// that connection's id here.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// ISO 8601 timestamp of when the signal entered the bus.
    pub timestamp: String,
    /// Opaque payload.
    pub payload: Value,
}

impl Signal {
    /// Build a signal timestamped now, with no required subjects and no
    /// origin. Fields are public for further adjustment.
    pub fn new(
        signal_type: impl Into<String>,
        topic: impl Into<Topic>,
        entity_id: impl Into<EntityId>,
        payload: Value,
    ) -> Self {
        Self {
            signal_type: signal_type.into(),
            topic: topic.into(),
            entity_id: entity_id.into(),
            required_subjects: vec![],
            origin: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        }
    }
}

/// A routed signal together with the targets it should reach, handed to
/// the worker pool for publication.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundSignal {
    /// The signal to publish.
    pub signal: Signal,
    /// Targets with placeholders already substituted.
    pub targets: Vec<Target>,
}

/// Substitute `{{ entity:* }}` placeholders in a target address.
///
/// Returns `None` when the address still contains an unresolved
/// placeholder afterwards, in which case the target must be dropped.
pub fn substitute_placeholders(address: &str, entity_id: &EntityId) -> Option<String> {
    let substituted = address
        .replace("{{ entity:id }}", entity_id.as_str())
        .replace("{{ entity:namespace }}", entity_id.namespace())
        .replace("{{ entity:name }}", entity_id.name());
    if substituted.contains("{{") {
        None
    } else {
        Some(substituted)
    }
}
