//! Process-level wiring: settings, telemetry, and the registry.

use std::sync::Arc;

use conduit_settings::{load_settings, ConduitSettings, SettingsError};
use conduit_telemetry::TelemetryConfig;
use tracing::info;

use conduit_events::EventStore;

use crate::coordinator::CoordinatorContext;
use crate::pubsub::PubSub;
use crate::registry::ConnectionRegistry;
use crate::validator::DefaultCommandValidator;
use crate::worker::WorkerSpawner;

/// A fully wired connectivity runtime.
pub struct ConduitRuntime {
    settings: ConduitSettings,
    registry: ConnectionRegistry,
}

impl ConduitRuntime {
    /// Loads settings, initializes telemetry, and builds the registry
    /// around the given backends.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the settings file exists but
    /// cannot be read or parsed.
    pub fn bootstrap(
        store: Arc<dyn EventStore>,
        pubsub: Arc<dyn PubSub>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, SettingsError> {
        let settings = load_settings()?;
        conduit_telemetry::init(&TelemetryConfig::default());
        info!(
            members = settings.cluster.members.len(),
            snapshot_threshold = settings.connection.snapshot_threshold,
            "runtime bootstrapped"
        );
        Ok(Self::with_settings(settings, store, pubsub, spawner))
    }

    /// Builds the runtime from already loaded settings, without touching
    /// the filesystem or the global tracing subscriber.
    pub fn with_settings(
        settings: ConduitSettings,
        store: Arc<dyn EventStore>,
        pubsub: Arc<dyn PubSub>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        let registry = ConnectionRegistry::new(CoordinatorContext {
            store,
            pubsub,
            spawner,
            validator: Arc::new(DefaultCommandValidator),
            settings: settings.clone(),
        });
        Self { settings, registry }
    }

    /// The loaded settings.
    pub fn settings(&self) -> &ConduitSettings {
        &self.settings
    }

    /// The command entry point.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Requests shutdown of all coordinators.
    pub fn shutdown(&self) {
        self.registry.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InProcessPubSub;
    use crate::worker::{MemberStatus, Worker, WorkerCommand, WorkerReply};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use conduit_core::{
        Command, CommandKind, Connection, ConnectionStatus, ConnectionType, ConnectivityError,
        ResponseKind,
    };
    use conduit_events::InMemoryEventStore;

    struct AckWorker;

    #[async_trait]
    impl Worker for AckWorker {
        async fn handle(&self, command: WorkerCommand) -> WorkerReply {
            WorkerReply::Status(MemberStatus::ok("local", command.label()))
        }
    }

    struct AckSpawner;

    #[async_trait]
    impl WorkerSpawner for AckSpawner {
        async fn spawn(
            &self,
            _connection: &Connection,
            _member: &str,
        ) -> Result<Arc<dyn Worker>, ConnectivityError> {
            Ok(Arc::new(AckWorker))
        }
    }

    #[tokio::test]
    async fn end_to_end_create_and_retrieve() {
        let runtime = ConduitRuntime::with_settings(
            ConduitSettings::default(),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InProcessPubSub::new()),
            Arc::new(AckSpawner),
        );

        let connection = Connection {
            id: "rt-1".into(),
            connection_type: ConnectionType::Amqp091,
            status: ConnectionStatus::Closed,
            uri: "amqp://broker:5672".into(),
            client_count: 1,
            sources: vec![],
            targets: vec![],
        };
        let created = runtime
            .registry()
            .dispatch(Command::new("rt-1", CommandKind::Create(connection)))
            .await
            .unwrap();
        assert_matches!(created.kind, ResponseKind::Created { .. });

        let retrieved = runtime
            .registry()
            .dispatch(Command::new("rt-1", CommandKind::RetrieveConnection))
            .await
            .unwrap();
        assert_matches!(retrieved.kind, ResponseKind::RetrievedConnection { connection } => {
            assert_eq!(connection.uri, "amqp://broker:5672");
        });
        runtime.shutdown();
    }
}
