//! Response aggregation for fanned-out pool commands.
//!
//! A broadcast to a pool of N workers yields up to N replies. The
//! aggregation session collects them until every expected reply has
//! arrived or the deadline passes, then folds them into one outcome.
//! Payload-bearing replies are merged into an aggregated response;
//! status-only replies are folded into a single success or, if any
//! member failed, the first failure.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout_at;
use tracing::{debug, warn};

use conduit_core::{AggregateStatus, AggregatedResponse, ConnectionId, ConnectivityError};

use crate::worker::WorkerReply;

/// One aggregation run over a broadcast's reply stream.
pub struct AggregationSession {
    connection_id: ConnectionId,
    expected: usize,
    window: Duration,
}

/// The folded result of an aggregation run.
#[derive(Debug)]
pub enum AggregateOutcome {
    /// At least one reply carried a payload; all replies merged.
    Responses(AggregatedResponse),
    /// All replies were successful status acknowledgements.
    StatusSuccess(String),
    /// At least one member reported a failure.
    StatusFailure(ConnectivityError),
}

impl AggregationSession {
    /// Creates a session expecting `expected` replies within `window`.
    pub fn new(connection_id: ConnectionId, expected: usize, window: Duration) -> Self {
        Self {
            connection_id,
            expected,
            window,
        }
    }

    /// Collects replies from `rx` and folds them into one outcome.
    ///
    /// Returns `None` when the deadline passes with no reply at all;
    /// callers treat that as a worker communication timeout. A partial
    /// set of replies at the deadline is still folded.
    pub async fn collect(
        self,
        mut rx: mpsc::Receiver<(String, WorkerReply)>,
    ) -> Option<AggregateOutcome> {
        let mut replies: Vec<(String, WorkerReply)> = Vec::with_capacity(self.expected);
        let deadline = tokio::time::Instant::now() + self.window;

        while replies.len() < self.expected {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(reply)) => replies.push(reply),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        connection_id = %self.connection_id,
                        received = replies.len(),
                        expected = self.expected,
                        "aggregation window elapsed before all replies arrived"
                    );
                    break;
                }
            }
        }

        if replies.is_empty() {
            debug!(connection_id = %self.connection_id, "no replies collected");
            return None;
        }
        Some(self.fold(replies))
    }

    fn fold(self, replies: Vec<(String, WorkerReply)>) -> AggregateOutcome {
        let has_payload = replies
            .iter()
            .any(|(_, reply)| matches!(reply, WorkerReply::Response(_)));

        if has_payload {
            let mut response_type = String::new();
            let mut payloads: Vec<Value> = Vec::with_capacity(replies.len());
            let mut status = AggregateStatus::Ok;
            for (member, reply) in replies {
                match reply {
                    WorkerReply::Response(response) => {
                        if response_type.is_empty() {
                            response_type = response.response_type;
                        }
                        payloads.push(response.payload);
                    }
                    WorkerReply::Status(member_status) => {
                        if !member_status.success {
                            status = AggregateStatus::Failure;
                        }
                        payloads.push(json!({
                            "member": member_status.member,
                            "success": member_status.success,
                            "detail": member_status.detail,
                        }));
                    }
                    WorkerReply::Error(err) => {
                        status = AggregateStatus::Failure;
                        warn!(connection_id = %self.connection_id, member = %member, error = %err, "worker reported failure");
                        payloads.push(json!({
                            "responseType": "error",
                            "payload": serde_json::to_value(&err).unwrap_or(Value::Null),
                        }));
                    }
                }
            }
            return AggregateOutcome::Responses(AggregatedResponse {
                connection_id: self.connection_id,
                response_type,
                responses: payloads,
                status,
            });
        }

        // Status-only path: any failure wins over any number of successes.
        let mut details: Vec<String> = Vec::with_capacity(replies.len());
        for (member, reply) in replies {
            match reply {
                WorkerReply::Status(status) if status.success => {
                    details.push(format!("{}: {}", status.member, status.detail));
                }
                WorkerReply::Status(status) => {
                    return AggregateOutcome::StatusFailure(
                        ConnectivityError::worker_communication(format!(
                            "member {} failed: {}",
                            status.member, status.detail,
                        )),
                    );
                }
                WorkerReply::Error(err) => {
                    warn!(connection_id = %self.connection_id, member = %member, error = %err, "worker reported failure");
                    return AggregateOutcome::StatusFailure(err);
                }
                WorkerReply::Response(_) => unreachable!("payload replies handled above"),
            }
        }
        AggregateOutcome::StatusSuccess(details.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{MemberStatus, WorkerResponse};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn session(expected: usize) -> AggregationSession {
        AggregationSession::new("agg-test".into(), expected, Duration::from_millis(200))
    }

    async fn run(
        session: AggregationSession,
        replies: Vec<(String, WorkerReply)>,
    ) -> Option<AggregateOutcome> {
        let (tx, rx) = mpsc::channel(replies.len().max(1));
        for reply in replies {
            tx.send(reply).await.unwrap();
        }
        drop(tx);
        session.collect(rx).await
    }

    #[tokio::test]
    async fn all_statuses_ok_folds_to_success() {
        let outcome = run(
            session(2),
            vec![
                ("a".into(), WorkerReply::Status(MemberStatus::ok("a", "connected"))),
                ("b".into(), WorkerReply::Status(MemberStatus::ok("b", "connected"))),
            ],
        )
        .await;
        assert_matches!(outcome, Some(AggregateOutcome::StatusSuccess(detail)) => {
            assert!(detail.contains("a: connected"));
            assert!(detail.contains("b: connected"));
        });
    }

    #[tokio::test]
    async fn single_failure_wins_over_successes() {
        let outcome = run(
            session(3),
            vec![
                ("a".into(), WorkerReply::Status(MemberStatus::ok("a", "connected"))),
                ("b".into(), WorkerReply::Error(ConnectivityError::worker_communication("tls handshake failed"))),
                ("c".into(), WorkerReply::Status(MemberStatus::ok("c", "connected"))),
            ],
        )
        .await;
        assert_matches!(
            outcome,
            Some(AggregateOutcome::StatusFailure(
                ConnectivityError::WorkerCommunication { .. }
            ))
        );
    }

    fn metrics_reply(consumed: u64) -> WorkerReply {
        WorkerReply::Response(WorkerResponse {
            response_type: "connection:metrics".into(),
            payload: json!({"consumed": consumed}),
        })
    }

    #[tokio::test]
    async fn payload_replies_are_merged() {
        let outcome = run(
            session(3),
            vec![
                ("a".into(), metrics_reply(10)),
                ("b".into(), metrics_reply(4)),
                ("c".into(), metrics_reply(0)),
            ],
        )
        .await;
        assert_matches!(outcome, Some(AggregateOutcome::Responses(agg)) => {
            assert_eq!(agg.response_type, "connection:metrics");
            assert_eq!(agg.responses.len(), 3);
            assert_eq!(agg.status, AggregateStatus::Ok);
        });
    }

    #[tokio::test]
    async fn error_among_payloads_marks_failure() {
        let outcome = run(
            session(2),
            vec![
                (
                    "a".into(),
                    WorkerReply::Response(WorkerResponse {
                        response_type: "connection:metrics".into(),
                        payload: json!({"consumed": 10}),
                    }),
                ),
                (
                    "b".into(),
                    WorkerReply::Error(ConnectivityError::worker_communication("session lost")),
                ),
            ],
        )
        .await;
        assert_matches!(outcome, Some(AggregateOutcome::Responses(agg)) => {
            assert_eq!(agg.status, AggregateStatus::Failure);
            assert_eq!(agg.responses.len(), 2);
        });
    }

    #[tokio::test]
    async fn no_replies_at_deadline_yields_none() {
        let (tx, rx) = mpsc::channel::<(String, WorkerReply)>(1);
        let session =
            AggregationSession::new("agg-test".into(), 2, Duration::from_millis(20));
        let outcome = session.collect(rx).await;
        drop(tx);
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn partial_replies_at_deadline_are_folded() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(("a".into(), WorkerReply::Status(MemberStatus::ok("a", "connected"))))
            .await
            .unwrap();
        let session =
            AggregationSession::new("agg-test".into(), 2, Duration::from_millis(30));
        // Second reply never arrives; the session folds what it has.
        let outcome = session.collect(rx).await;
        drop(tx);
        assert_matches!(outcome, Some(AggregateOutcome::StatusSuccess(_)));
    }
}
