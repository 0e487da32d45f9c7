//! The per-connection lifecycle coordinator.
//!
//! One coordinator task owns all state for one connection id. Commands
//! arrive on an inbox with a oneshot reply half; routed signals arrive
//! on a separate channel fed by the pub/sub bus. The task linearizes
//! everything: recover from the event store, then loop over commands,
//! signals, the response debounce timer, and shutdown.
//!
//! State changes are persisted before they take effect in memory, and
//! every persisted event is re-published on the internal bus under its
//! type label. A persistence failure is fatal and terminates the task;
//! worker failures during create/modify are logged and folded into the
//! success path so that configuration is never lost to a flaky broker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use conduit_core::{
    AggregateStatus, AggregatedResponse, Command, CommandKind, Connection, ConnectionId,
    ConnectionStatus, ConnectivityError, Headers, OutboundSignal, Response, ResponseKind,
};
use conduit_events::{recover, ConnectionEvent, EventStore, Snapshot};
use conduit_settings::ConduitSettings;

use crate::aggregator::{AggregateOutcome, AggregationSession};
use crate::flusher::{wait_until, PendingResponseFlusher};
use crate::pubsub::{BusMessage, PubSub, SubscriptionId};
use crate::router::route;
use crate::validator::CommandValidator;
use crate::worker::{WorkerCommand, WorkerPoolSupervisor, WorkerSpawner};

/// Everything a coordinator needs from its host.
#[derive(Clone)]
pub struct CoordinatorContext {
    /// Durable event log and snapshot store.
    pub store: Arc<dyn EventStore>,
    /// Internal signal bus.
    pub pubsub: Arc<dyn PubSub>,
    /// Factory for broker workers.
    pub spawner: Arc<dyn WorkerSpawner>,
    /// Pre-persistence command validation.
    pub validator: Arc<dyn CommandValidator>,
    /// Loaded runtime settings.
    pub settings: ConduitSettings,
}

type ReplySender = oneshot::Sender<Result<Response, ConnectivityError>>;

struct Envelope {
    command: Command,
    reply: ReplySender,
}

/// Handle to a running coordinator task.
pub struct ConnectionCoordinator {
    id: ConnectionId,
    inbox: mpsc::Sender<Envelope>,
    shutdown: CancellationToken,
}

impl ConnectionCoordinator {
    /// Spawns the coordinator task for `id` and returns its handle.
    ///
    /// The task recovers persisted state before processing its first
    /// command; commands sent in the meantime queue in the inbox.
    pub fn spawn(id: ConnectionId, ctx: CoordinatorContext) -> (Arc<Self>, JoinHandle<()>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(64);
        let (signal_tx, signal_rx) = mpsc::channel(256);
        let shutdown = CancellationToken::new();

        let runner = Runner {
            id: id.clone(),
            pool: WorkerPoolSupervisor::new(
                Arc::clone(&ctx.spawner),
                ctx.settings.cluster.members.clone(),
            ),
            flusher: PendingResponseFlusher::new(Duration::from_millis(
                ctx.settings.connection.flush_timeout_ms,
            )),
            ctx,
            connection: None,
            last_sequence: 0,
            snapshot_sequence: 0,
            signal_tx,
            subscriptions: Vec::new(),
        };
        let task = tokio::spawn(runner.run(inbox_rx, signal_rx, shutdown.clone()));

        (
            Arc::new(Self {
                id,
                inbox: inbox_tx,
                shutdown,
            }),
            task,
        )
    }

    /// The connection id this coordinator owns.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Sends a command and awaits its response.
    ///
    /// # Errors
    ///
    /// Besides command-level failures, returns
    /// [`ConnectivityError::NotAccessible`] when the coordinator task
    /// has already terminated.
    pub async fn send(&self, command: Command) -> Result<Response, ConnectivityError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            command,
            reply: reply_tx,
        };
        if self.inbox.send(envelope).await.is_err() {
            return Err(ConnectivityError::not_accessible(self.id.clone()));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(ConnectivityError::not_accessible(self.id.clone())))
    }

    /// Requests an orderly shutdown of the coordinator task.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Whether the coordinator task has terminated.
    pub fn is_terminated(&self) -> bool {
        self.inbox.is_closed()
    }
}

struct Runner {
    id: ConnectionId,
    ctx: CoordinatorContext,
    connection: Option<Connection>,
    last_sequence: u64,
    snapshot_sequence: u64,
    pool: WorkerPoolSupervisor,
    flusher: PendingResponseFlusher,
    signal_tx: mpsc::Sender<BusMessage>,
    subscriptions: Vec<(String, SubscriptionId)>,
}

impl Runner {
    #[instrument(name = "coordinator", skip_all, fields(connection_id = %self.id))]
    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<Envelope>,
        mut signals: mpsc::Receiver<BusMessage>,
        shutdown: CancellationToken,
    ) {
        if let Err(err) = self.recover_state().await {
            error!(error = %err, "recovery failed, coordinator terminating");
            return;
        }

        loop {
            let flush_deadline = self.flusher.deadline();
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                envelope = inbox.recv() => {
                    let Some(envelope) = envelope else { break };
                    if !self.handle_envelope(envelope).await {
                        break;
                    }
                }
                message = signals.recv() => {
                    let Some(message) = message else { break };
                    self.handle_bus_message(message);
                }
                () = wait_until(flush_deadline) => {
                    self.flusher.flush();
                }
            }
        }

        self.flusher.flush();
        self.unsubscribe_all();
        self.pool.stop();
        info!("coordinator terminated");
    }

    /// Reconstructs state from the event store and, for a connection
    /// recovered as open, restarts the worker pool and resubscribes.
    async fn recover_state(&mut self) -> Result<(), ConnectivityError> {
        let recovered = recover(self.ctx.store.as_ref(), &self.id)
            .await
            .map_err(|err| ConnectivityError::persistence(err.to_string()))?;
        self.last_sequence = recovered.last_sequence;
        self.snapshot_sequence = recovered.snapshot_sequence;
        self.connection = recovered.connection;

        if let Some(connection) = self.connection.clone() {
            info!(status = ?connection.status, "recovered existing connection");
            if connection.status == ConnectionStatus::Open {
                match self
                    .ask_workers(&connection, WorkerCommand::Connect(connection.clone()), None)
                    .await
                {
                    Ok(_) => self.subscribe_topics(&connection),
                    Err(err) => {
                        warn!(error = %err, "reconnect after recovery failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> bool {
        let Envelope { command, reply } = envelope;
        trace!(kind = command.kind_label(), "command received");
        match self.connection.clone() {
            None => self.handle_uninitialized(command, reply).await,
            Some(current) => self.handle_active(current, command, reply).await,
        }
    }

    /// Commands before the connection exists (never created or deleted).
    async fn handle_uninitialized(&mut self, command: Command, reply: ReplySender) -> bool {
        match command.kind.clone() {
            CommandKind::Create(connection) => {
                if let Err(err) = self.ctx.validator.validate(&command, None) {
                    warn!(error = %err, "create rejected");
                    send_reply(reply, Err(err));
                    return false;
                }
                if let Err(err) = self
                    .persist(ConnectionEvent::Created {
                        connection: connection.clone(),
                    })
                    .await
                {
                    send_reply(reply, Err(err));
                    return false;
                }
                let response = Response::with_headers(
                    ResponseKind::Created {
                        connection: connection.clone(),
                    },
                    command.headers.clone(),
                );
                if connection.status == ConnectionStatus::Open {
                    match self
                        .ask_workers(
                            &connection,
                            WorkerCommand::Connect(connection.clone()),
                            Some(&command.headers),
                        )
                        .await
                    {
                        Ok(_) => {
                            self.subscribe_topics(&connection);
                            self.flusher.enqueue(response, reply);
                        }
                        Err(err) => {
                            // The configuration is persisted; a flaky
                            // broker must not fail the create.
                            warn!(error = %err, "workers failed to connect after create");
                            send_reply(reply, Ok(response));
                        }
                    }
                } else {
                    send_reply(reply, Ok(response));
                }
                true
            }
            CommandKind::Test(connection) => {
                if let Err(err) = self.ctx.validator.validate(&command, None) {
                    send_reply(reply, Err(err));
                    return false;
                }
                let result = self
                    .ask_workers(
                        &connection,
                        WorkerCommand::Test(connection.clone()),
                        Some(&command.headers),
                    )
                    .await;
                self.pool.stop();
                match result {
                    Ok(outcome) => send_reply(
                        reply,
                        Ok(Response::with_headers(
                            ResponseKind::TestSucceeded {
                                id: command.id,
                                detail: outcome_detail(&outcome),
                            },
                            command.headers,
                        )),
                    ),
                    Err(err) => send_reply(reply, Err(err)),
                }
                // A test run never leaves a coordinator behind.
                false
            }
            _ => {
                send_reply(
                    reply,
                    Err(ConnectivityError::not_accessible(command.id)),
                );
                true
            }
        }
    }

    /// Commands against an existing connection.
    async fn handle_active(
        &mut self,
        current: Connection,
        command: Command,
        reply: ReplySender,
    ) -> bool {
        match command.kind.clone() {
            CommandKind::Create(_) => {
                send_reply(reply, Err(ConnectivityError::conflict(command.id)));
                true
            }
            CommandKind::Modify(connection) => {
                self.modify(&current, connection, &command, reply).await
            }
            CommandKind::Open => self.open(&current, &command, reply).await,
            CommandKind::Close => self.close(&current, &command, reply).await,
            CommandKind::Delete => {
                if let Err(err) = self.persist(ConnectionEvent::Deleted).await {
                    send_reply(reply, Err(err));
                    return false;
                }
                let mut result = Ok(Response::with_headers(
                    ResponseKind::Deleted { id: command.id },
                    command.headers.clone(),
                ));
                if self.pool.is_running() {
                    if let Err(err) = self
                        .ask_workers(&current, WorkerCommand::Disconnect, Some(&command.headers))
                        .await
                    {
                        warn!(error = %err, "disconnect during delete failed");
                        result = Err(err);
                    }
                }
                // The delete is durable either way; the coordinator ends.
                self.unsubscribe_all();
                self.pool.stop();
                send_reply(reply, result);
                info!("connection deleted");
                false
            }
            CommandKind::Test(_) => {
                send_reply(
                    reply,
                    Ok(Response::with_headers(
                        ResponseKind::TestSucceeded {
                            id: command.id,
                            detail: "connection is already established".to_owned(),
                        },
                        command.headers,
                    )),
                );
                true
            }
            CommandKind::RetrieveConnection => {
                send_reply(
                    reply,
                    Ok(Response::with_headers(
                        ResponseKind::RetrievedConnection { connection: current },
                        command.headers,
                    )),
                );
                true
            }
            CommandKind::RetrieveStatus => {
                send_reply(
                    reply,
                    Ok(Response::with_headers(
                        ResponseKind::RetrievedStatus {
                            id: command.id,
                            status: current.status,
                        },
                        command.headers,
                    )),
                );
                true
            }
            CommandKind::RetrieveMetrics => {
                match self
                    .ask_workers(
                        &current,
                        WorkerCommand::RetrieveMetrics,
                        Some(&command.headers),
                    )
                    .await
                {
                    Ok(AggregateOutcome::Responses(aggregated)) => {
                        send_reply(
                            reply,
                            Ok(Response::with_headers(
                                ResponseKind::Aggregated(aggregated),
                                command.headers,
                            )),
                        );
                    }
                    Ok(outcome) => {
                        let aggregated = AggregatedResponse {
                            connection_id: self.id.clone(),
                            response_type: "connection:metrics".to_owned(),
                            responses: vec![json!(outcome_detail(&outcome))],
                            status: AggregateStatus::Ok,
                        };
                        send_reply(
                            reply,
                            Ok(Response::with_headers(
                                ResponseKind::Aggregated(aggregated),
                                command.headers,
                            )),
                        );
                    }
                    Err(err) => send_reply(reply, Err(err)),
                }
                true
            }
        }
    }

    async fn modify(
        &mut self,
        current: &Connection,
        connection: Connection,
        command: &Command,
        reply: ReplySender,
    ) -> bool {
        if let Err(err) = self.ctx.validator.validate(command, Some(current)) {
            warn!(error = %err, "modify rejected");
            send_reply(reply, Err(err));
            return false;
        }
        if let Err(err) = self
            .persist(ConnectionEvent::Modified {
                connection: connection.clone(),
            })
            .await
        {
            send_reply(reply, Err(err));
            return false;
        }

        // A changed client count means the pool is the wrong size; tear
        // it down so the reconnect below rebuilds it.
        if self.pool.is_running() && connection.client_count != current.client_count {
            if let Err(err) = self
                .ask_workers(current, WorkerCommand::Disconnect, Some(&command.headers))
                .await
            {
                warn!(error = %err, "disconnect before pool resize failed");
            }
            self.pool.stop();
        }

        let response = Response::with_headers(
            ResponseKind::Modified {
                id: command.id.clone(),
            },
            command.headers.clone(),
        );
        if connection.status == ConnectionStatus::Open {
            match self
                .ask_workers(
                    &connection,
                    WorkerCommand::Connect(connection.clone()),
                    Some(&command.headers),
                )
                .await
            {
                Ok(_) => {
                    self.subscribe_topics(&connection);
                    self.flusher.enqueue(response, reply);
                }
                Err(err) => {
                    warn!(error = %err, "workers failed to connect after modify");
                    send_reply(reply, Ok(response));
                }
            }
        } else {
            self.unsubscribe_all();
            self.pool.stop();
            send_reply(reply, Ok(response));
        }
        true
    }

    async fn open(&mut self, current: &Connection, command: &Command, reply: ReplySender) -> bool {
        if let Err(err) = self.persist(ConnectionEvent::Opened).await {
            send_reply(reply, Err(err));
            return false;
        }
        let opened = current.with_status(ConnectionStatus::Open);
        match self
            .ask_workers(
                &opened,
                WorkerCommand::Connect(opened.clone()),
                Some(&command.headers),
            )
            .await
        {
            Ok(_) => {
                self.subscribe_topics(&opened);
                self.flusher.enqueue(
                    Response::with_headers(
                        ResponseKind::Opened {
                            id: command.id.clone(),
                        },
                        command.headers.clone(),
                    ),
                    reply,
                );
            }
            Err(err) => send_reply(reply, Err(err)),
        }
        true
    }

    async fn close(&mut self, current: &Connection, command: &Command, reply: ReplySender) -> bool {
        if let Err(err) = self.persist(ConnectionEvent::Closed).await {
            send_reply(reply, Err(err));
            return false;
        }

        let mut result = Ok(Response::with_headers(
            ResponseKind::Closed {
                id: command.id.clone(),
            },
            command.headers.clone(),
        ));
        if self.pool.is_running() {
            if let Err(err) = self
                .ask_workers(current, WorkerCommand::Disconnect, Some(&command.headers))
                .await
            {
                result = Err(err);
            }
        }
        // Closed means no workers, whatever the disconnect said.
        self.unsubscribe_all();
        self.pool.stop();
        send_reply(reply, result);
        true
    }

    /// Appends `event`, republishes it on the bus, and snapshots when
    /// enough events have accumulated since the last snapshot.
    async fn persist(&mut self, event: ConnectionEvent) -> Result<(), ConnectivityError> {
        let sequenced = self
            .ctx
            .store
            .append(&self.id, event)
            .await
            .map_err(|err| {
                error!(error = %err, "event append failed");
                ConnectivityError::persistence(err.to_string())
            })?;
        self.last_sequence = sequenced.sequence;
        debug!(
            sequence = sequenced.sequence,
            event = sequenced.event.type_label(),
            "event persisted"
        );

        let delivered = self.ctx.pubsub.publish(
            sequenced.event.type_label(),
            BusMessage::Lifecycle {
                connection_id: self.id.clone(),
                event: sequenced.event.clone(),
            },
        );
        trace!(groups = delivered, "lifecycle event published");

        self.connection = conduit_events::apply(self.connection.take(), &sequenced.event);
        self.maybe_snapshot().await;
        Ok(())
    }

    /// Saves a snapshot once the event tail since the last snapshot
    /// exceeds the configured threshold. Snapshot failures only cost
    /// recovery time, so they are logged and swallowed.
    async fn maybe_snapshot(&mut self) {
        let threshold = self.ctx.settings.connection.snapshot_threshold;
        if self.last_sequence - self.snapshot_sequence <= threshold {
            return;
        }
        let Some(connection) = self.connection.clone() else {
            return;
        };
        let snapshot = Snapshot {
            connection,
            sequence: self.last_sequence,
        };
        match self.ctx.store.save_snapshot(&self.id, snapshot).await {
            Ok(()) => {
                debug!(sequence = self.last_sequence, "snapshot saved");
                self.snapshot_sequence = self.last_sequence;
            }
            Err(err) => warn!(error = %err, "snapshot save failed"),
        }
    }

    /// Broadcasts `command` to the pool (starting it if needed) and
    /// folds the replies.
    async fn ask_workers(
        &mut self,
        connection: &Connection,
        command: WorkerCommand,
        headers: Option<&Headers>,
    ) -> Result<AggregateOutcome, ConnectivityError> {
        self.pool.ensure_started(connection).await?;
        let rx = self.pool.broadcast(command)?;
        let window = Duration::from_millis(
            headers
                .and_then(Headers::timeout_ms)
                .unwrap_or(self.ctx.settings.connection.default_timeout_ms),
        );
        let session =
            AggregationSession::new(self.id.clone(), self.pool.expected_replies(), window);
        match session.collect(rx).await {
            Some(AggregateOutcome::StatusFailure(err)) => Err(err),
            Some(outcome) => Ok(outcome),
            None => Err(ConnectivityError::worker_communication(
                "no worker replied within the timeout window",
            )),
        }
    }

    /// Any bus traffic flushes held responses first, then signals are
    /// routed against the current configuration and fanned out.
    fn handle_bus_message(&mut self, message: BusMessage) {
        self.flusher.flush();
        match message {
            BusMessage::Signal(signal) => {
                let Some(connection) = &self.connection else {
                    debug!("dropping signal, connection not initialized");
                    return;
                };
                if !self.pool.is_running() {
                    debug!("dropping signal, worker pool not running");
                    return;
                }
                let targets = route(connection, &signal);
                if targets.is_empty() {
                    return;
                }
                self.pool.forward(OutboundSignal { signal, targets });
            }
            BusMessage::Lifecycle { .. } => {
                trace!("ignoring lifecycle event on signal channel");
            }
        }
    }

    /// Replaces the current subscriptions with one per subscribed topic,
    /// grouped under this connection's id so multiple matching sources
    /// still deliver each signal once.
    fn subscribe_topics(&mut self, connection: &Connection) {
        self.unsubscribe_all();
        let group = format!("connection:{}", self.id);
        for topic in connection.subscribed_topics() {
            let subscription = self.ctx.pubsub.subscribe(
                topic.as_str(),
                &group,
                self.signal_tx.clone(),
            );
            self.subscriptions
                .push((topic.as_str().to_owned(), subscription));
        }
        debug!(count = self.subscriptions.len(), "topics subscribed");
    }

    fn unsubscribe_all(&mut self) {
        for (topic, subscription) in self.subscriptions.drain(..) {
            self.ctx.pubsub.unsubscribe(&topic, subscription);
        }
    }
}

fn send_reply(reply: ReplySender, result: Result<Response, ConnectivityError>) {
    // The caller may have given up waiting; nothing to do then.
    let _ = reply.send(result);
}

fn outcome_detail(outcome: &AggregateOutcome) -> String {
    match outcome {
        AggregateOutcome::StatusSuccess(detail) => detail.clone(),
        AggregateOutcome::Responses(aggregated) => {
            format!("{} workers responded", aggregated.responses.len())
        }
        AggregateOutcome::StatusFailure(err) => err.to_string(),
    }
}
