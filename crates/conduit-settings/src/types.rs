//! Typed settings structs with compiled defaults.

use serde::{Deserialize, Serialize};

/// Root settings for the conduit bridge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConduitSettings {
    /// Per-connection coordinator settings.
    pub connection: ConnectionSettings,
    /// Cluster topology settings.
    pub cluster: ClusterSettings,
}

/// Settings consumed by the connection lifecycle coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// A snapshot is taken once more than this many events have been
    /// persisted since the last one.
    pub snapshot_threshold: u64,
    /// Quiet period before pending responses are flushed, in ms.
    pub flush_timeout_ms: u64,
    /// Worker round-trip timeout when no header override is given, in ms.
    pub default_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            snapshot_threshold: 10,
            flush_timeout_ms: 5_000,
            default_timeout_ms: 5_000,
        }
    }
}

/// Cluster topology: the members worker pools are distributed over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSettings {
    /// Member names, one worker per member per connection where possible.
    pub members: Vec<String>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            members: vec!["local".into()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ConduitSettings::default();
        assert_eq!(settings.connection.snapshot_threshold, 10);
        assert_eq!(settings.connection.flush_timeout_ms, 5_000);
        assert_eq!(settings.connection.default_timeout_ms, 5_000);
        assert_eq!(settings.cluster.members, vec!["local".to_owned()]);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ConduitSettings =
            serde_json::from_str(r#"{"connection":{"snapshotThreshold":50}}"#).unwrap();
        assert_eq!(settings.connection.snapshot_threshold, 50);
        assert_eq!(settings.connection.flush_timeout_ms, 5_000);
    }
}
