//! Registry of live coordinators, one per connection id.
//!
//! The registry is the public entry point for issuing commands: it
//! spawns a coordinator on first contact with an id and replaces
//! terminated ones transparently, so callers never observe the
//! stop/respawn cycle that follows a delete, a failed create, or a
//! rejected modify.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use conduit_core::{Command, ConnectionId, ConnectivityError, Response};

use crate::coordinator::{ConnectionCoordinator, CoordinatorContext};

/// Routes commands to per-connection coordinators, spawning on demand.
pub struct ConnectionRegistry {
    ctx: CoordinatorContext,
    coordinators: DashMap<ConnectionId, Arc<ConnectionCoordinator>>,
}

impl ConnectionRegistry {
    /// Creates a registry with no running coordinators.
    pub fn new(ctx: CoordinatorContext) -> Self {
        Self {
            ctx,
            coordinators: DashMap::new(),
        }
    }

    /// Dispatches `command` to the coordinator owning its connection id.
    ///
    /// # Errors
    ///
    /// Propagates the coordinator's command-level error.
    pub async fn dispatch(&self, command: Command) -> Result<Response, ConnectivityError> {
        let coordinator = self.coordinator_for(&command.id);
        match coordinator.send(command.clone()).await {
            // The coordinator terminated between lookup and delivery;
            // retry once against its replacement.
            Err(ConnectivityError::NotAccessible { .. }) if coordinator.is_terminated() => {
                let replacement = self.coordinator_for(&command.id);
                replacement.send(command).await
            }
            result => result,
        }
    }

    /// Number of coordinators currently tracked (including terminated
    /// ones not yet replaced).
    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    /// Whether no coordinators are tracked.
    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }

    /// Requests shutdown of every running coordinator.
    pub fn shutdown_all(&self) {
        for entry in &self.coordinators {
            entry.value().stop();
        }
    }

    fn coordinator_for(&self, id: &ConnectionId) -> Arc<ConnectionCoordinator> {
        let mut entry = self
            .coordinators
            .entry(id.clone())
            .or_insert_with(|| self.spawn(id));
        if entry.value().is_terminated() {
            debug!(connection_id = %id, "replacing terminated coordinator");
            *entry.value_mut() = self.spawn(id);
        }
        Arc::clone(entry.value())
    }

    fn spawn(&self, id: &ConnectionId) -> Arc<ConnectionCoordinator> {
        debug!(connection_id = %id, "spawning coordinator");
        let (coordinator, _task) = ConnectionCoordinator::spawn(id.clone(), self.ctx.clone());
        coordinator
    }
}
