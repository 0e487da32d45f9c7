//! Worker pool supervision.
//!
//! Each active connection owns a pool of workers, one per configured
//! client, each holding its own session with the external broker. The
//! supervisor fans commands out to every pool member and hands the
//! caller a receiver over which replies arrive as they are produced.
//! Spawning is abstracted behind [`WorkerSpawner`] so tests can run the
//! lifecycle against scripted workers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use conduit_core::{Connection, ConnectivityError, OutboundSignal};

/// Commands fanned out to every member of a worker pool.
#[derive(Clone, Debug)]
pub enum WorkerCommand {
    /// Establish the broker session.
    Connect(Connection),
    /// Tear the broker session down.
    Disconnect,
    /// Report per-member metrics.
    RetrieveMetrics,
    /// Probe the configuration against the broker without persisting.
    Test(Connection),
    /// Publish an outbound signal to its resolved targets.
    Publish(OutboundSignal),
}

impl WorkerCommand {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::RetrieveMetrics => "retrieve-metrics",
            Self::Test(_) => "test",
            Self::Publish(_) => "publish",
        }
    }
}

/// A single worker's answer to a pool command.
#[derive(Clone, Debug)]
pub enum WorkerReply {
    /// A payload-bearing response, e.g. metrics.
    Response(WorkerResponse),
    /// A plain status acknowledgement.
    Status(MemberStatus),
    /// The command failed on this member.
    Error(ConnectivityError),
}

/// A payload-bearing worker response.
#[derive(Clone, Debug)]
pub struct WorkerResponse {
    /// Discriminator for the payload, e.g. `connection:metrics`.
    pub response_type: String,
    /// Arbitrary response body.
    pub payload: Value,
}

/// A status acknowledgement from one pool member.
#[derive(Clone, Debug)]
pub struct MemberStatus {
    /// The member this status came from.
    pub member: String,
    /// Whether the command succeeded on this member.
    pub success: bool,
    /// Human-readable detail.
    pub detail: String,
}

impl MemberStatus {
    /// A successful status for `member`.
    pub fn ok(member: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            success: true,
            detail: detail.into(),
        }
    }

    /// A failed status for `member`.
    pub fn failed(member: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            success: false,
            detail: detail.into(),
        }
    }
}

/// One worker holding a broker session.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Handles one command and produces the worker's reply.
    async fn handle(&self, command: WorkerCommand) -> WorkerReply;
}

/// Creates workers for a connection's pool.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Spawns one worker for `connection` on the given cluster member.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::WorkerCommunication`] when the
    /// worker cannot be brought up.
    async fn spawn(
        &self,
        connection: &Connection,
        member: &str,
    ) -> Result<Arc<dyn Worker>, ConnectivityError>;
}

struct PoolMember {
    member: String,
    worker: Arc<dyn Worker>,
}

/// Owns the worker pool for one connection.
///
/// Pool membership is sized by the connection's client count; workers
/// are distributed round-robin across the configured cluster members.
pub struct WorkerPoolSupervisor {
    spawner: Arc<dyn WorkerSpawner>,
    members: Vec<String>,
    pool: Vec<PoolMember>,
}

impl WorkerPoolSupervisor {
    /// Creates a supervisor with no running workers.
    pub fn new(spawner: Arc<dyn WorkerSpawner>, members: Vec<String>) -> Self {
        let members = if members.is_empty() {
            vec!["local".to_owned()]
        } else {
            members
        };
        Self {
            spawner,
            members,
            pool: Vec::new(),
        }
    }

    /// Whether the pool currently has running workers.
    pub fn is_running(&self) -> bool {
        !self.pool.is_empty()
    }

    /// Number of running workers.
    pub fn size(&self) -> usize {
        self.pool.len()
    }

    /// Starts the pool if it is not already running.
    ///
    /// Already running is a logged no-op, so repeated open commands
    /// stay idempotent.
    ///
    /// # Errors
    ///
    /// Returns the spawner's error if any worker fails to come up; in
    /// that case no partial pool is kept.
    pub async fn ensure_started(
        &mut self,
        connection: &Connection,
    ) -> Result<(), ConnectivityError> {
        if self.is_running() {
            debug!(
                connection_id = %connection.id,
                size = self.pool.len(),
                "worker pool already running"
            );
            return Ok(());
        }
        let mut pool = Vec::with_capacity(connection.client_count as usize);
        for slot in 0..connection.client_count as usize {
            let member = self.members[slot % self.members.len()].clone();
            let worker = self.spawner.spawn(connection, &member).await?;
            pool.push(PoolMember { member, worker });
        }
        info!(
            connection_id = %connection.id,
            size = pool.len(),
            "worker pool started"
        );
        self.pool = pool;
        Ok(())
    }

    /// Stops all workers. Idempotent.
    pub fn stop(&mut self) {
        if self.pool.is_empty() {
            return;
        }
        let size = self.pool.len();
        self.pool.clear();
        info!(size, "worker pool stopped");
    }

    /// Sends `command` to every pool member and returns a receiver
    /// yielding `(member, reply)` pairs as members answer.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::WorkerCommunication`] if the pool
    /// is not running.
    pub fn broadcast(
        &self,
        command: WorkerCommand,
    ) -> Result<mpsc::Receiver<(String, WorkerReply)>, ConnectivityError> {
        if self.pool.is_empty() {
            return Err(ConnectivityError::worker_communication(
                "worker pool is not running",
            ));
        }
        let (tx, rx) = mpsc::channel(self.pool.len());
        for member in &self.pool {
            let worker = Arc::clone(&member.worker);
            let name = member.member.clone();
            let command = command.clone();
            let tx = tx.clone();
            drop(tokio::spawn(async move {
                let reply = worker.handle(command).await;
                // Receiver may be gone if the caller timed out.
                let _ = tx.send((name, reply)).await;
            }));
        }
        Ok(rx)
    }

    /// Fans an outbound signal out to the pool without awaiting replies.
    pub fn forward(&self, signal: OutboundSignal) {
        if self.pool.is_empty() {
            debug!("dropping outbound signal, worker pool not running");
            return;
        }
        let publishes: Vec<_> = self
            .pool
            .iter()
            .map(|member| {
                let worker = Arc::clone(&member.worker);
                let name = member.member.clone();
                let signal = signal.clone();
                async move {
                    if let WorkerReply::Error(err) =
                        worker.handle(WorkerCommand::Publish(signal)).await
                    {
                        warn!(member = %name, error = %err, "outbound publish failed");
                    }
                }
            })
            .collect();
        drop(tokio::spawn(async move {
            let _ = future::join_all(publishes).await;
        }));
    }

    /// Expected number of replies to a broadcast.
    pub fn expected_replies(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{ConnectionStatus, ConnectionType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection(client_count: u32) -> Connection {
        Connection {
            id: "pool-test".into(),
            connection_type: ConnectionType::Amqp10,
            status: ConnectionStatus::Open,
            uri: "amqp://broker:5671".into(),
            client_count,
            sources: vec![],
            targets: vec![],
        }
    }

    struct AckWorker {
        member: String,
    }

    #[async_trait]
    impl Worker for AckWorker {
        async fn handle(&self, command: WorkerCommand) -> WorkerReply {
            WorkerReply::Status(MemberStatus::ok(&self.member, command.label()))
        }
    }

    struct CountingSpawner {
        spawned: AtomicUsize,
    }

    #[async_trait]
    impl WorkerSpawner for CountingSpawner {
        async fn spawn(
            &self,
            _connection: &Connection,
            member: &str,
        ) -> Result<Arc<dyn Worker>, ConnectivityError> {
            let _ = self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(AckWorker {
                member: member.to_owned(),
            }))
        }
    }

    struct FailingSpawner;

    #[async_trait]
    impl WorkerSpawner for FailingSpawner {
        async fn spawn(
            &self,
            _connection: &Connection,
            _member: &str,
        ) -> Result<Arc<dyn Worker>, ConnectivityError> {
            Err(ConnectivityError::worker_communication("broker refused"))
        }
    }

    #[tokio::test]
    async fn pool_sized_by_client_count() {
        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicUsize::new(0),
        });
        let mut pool =
            WorkerPoolSupervisor::new(spawner.clone(), vec!["a".into(), "b".into()]);
        pool.ensure_started(&connection(3)).await.unwrap();
        assert_eq!(pool.size(), 3);
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ensure_started_is_idempotent() {
        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicUsize::new(0),
        });
        let mut pool = WorkerPoolSupervisor::new(spawner.clone(), vec!["a".into()]);
        pool.ensure_started(&connection(2)).await.unwrap();
        pool.ensure_started(&connection(2)).await.unwrap();
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_spawn_keeps_pool_empty() {
        let mut pool = WorkerPoolSupervisor::new(Arc::new(FailingSpawner), vec!["a".into()]);
        let err = pool.ensure_started(&connection(2)).await.unwrap_err();
        assert!(matches!(err, ConnectivityError::WorkerCommunication { .. }));
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn broadcast_collects_one_reply_per_member() {
        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicUsize::new(0),
        });
        let mut pool = WorkerPoolSupervisor::new(spawner, vec!["a".into(), "b".into()]);
        pool.ensure_started(&connection(2)).await.unwrap();

        let mut rx = pool.broadcast(WorkerCommand::Disconnect).unwrap();
        let mut members = Vec::new();
        while let Some((member, reply)) = rx.recv().await {
            assert!(matches!(reply, WorkerReply::Status(s) if s.success));
            members.push(member);
        }
        members.sort();
        assert_eq!(members, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[tokio::test]
    async fn broadcast_on_stopped_pool_fails() {
        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicUsize::new(0),
        });
        let mut pool = WorkerPoolSupervisor::new(spawner, vec!["a".into()]);
        pool.ensure_started(&connection(1)).await.unwrap();
        pool.stop();
        assert!(pool.broadcast(WorkerCommand::Disconnect).is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicUsize::new(0),
        });
        let mut pool = WorkerPoolSupervisor::new(spawner, vec!["a".into()]);
        pool.stop();
        pool.ensure_started(&connection(1)).await.unwrap();
        pool.stop();
        pool.stop();
        assert!(!pool.is_running());
    }
}
