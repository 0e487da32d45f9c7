//! Debounced delivery of lifecycle command responses.
//!
//! Responses to state-changing commands are held briefly instead of
//! being sent the moment the command completes, giving in-flight
//! signals a chance to be consumed by the freshly (re)started workers
//! before the caller observes completion. The hold window re-arms on
//! every enqueue; any arriving signal, the window elapsing, or
//! coordinator shutdown flushes everything in FIFO order.

use std::collections::VecDeque;
use std::future::pending;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

use conduit_core::{ConnectivityError, Response};

type ReplySender = oneshot::Sender<Result<Response, ConnectivityError>>;

/// Holds command responses until the debounce window closes.
pub struct PendingResponseFlusher {
    window: Duration,
    entries: VecDeque<(Response, ReplySender)>,
    deadline: Option<Instant>,
}

impl PendingResponseFlusher {
    /// Creates a flusher with the given debounce window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
            deadline: None,
        }
    }

    /// Number of responses currently held.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Queues `response` for delayed delivery and re-arms the window.
    ///
    /// Anything already queued is flushed first, so each held batch
    /// belongs to a single command.
    pub fn enqueue(&mut self, response: Response, reply: ReplySender) {
        self.flush();
        trace!("holding response for debounced delivery");
        self.entries.push_back((response, reply));
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Delivers all held responses in FIFO order and disarms the timer.
    pub fn flush(&mut self) {
        self.deadline = None;
        if self.entries.is_empty() {
            return;
        }
        let count = self.entries.len();
        while let Some((response, reply)) = self.entries.pop_front() {
            // The caller may have dropped its half after a timeout.
            let _ = reply.send(Ok(response));
        }
        debug!(count, "flushed pending responses");
    }

    /// The armed deadline, if any. Copy this out before selecting so the
    /// wait does not hold a borrow across the select arms.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the debounce window elapses; pends forever while
    /// nothing is queued. Intended for use inside `tokio::select!`.
    pub async fn expired(&self) {
        wait_until(self.deadline).await;
    }
}

/// Sleeps until `deadline`, or forever when there is none.
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::{ConnectionId, ResponseKind};
    use tokio::time::timeout;

    fn opened() -> Response {
        Response::new(ResponseKind::Opened {
            id: ConnectionId::new("flush-test"),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn holds_until_window_elapses() {
        let mut flusher = PendingResponseFlusher::new(Duration::from_millis(100));
        let (tx, mut rx) = oneshot::channel();
        flusher.enqueue(opened(), tx);

        assert!(rx.try_recv().is_err());
        flusher.expired().await;
        flusher.flush();
        assert!(matches!(
            rx.try_recv().unwrap().unwrap().kind,
            ResponseKind::Opened { .. }
        ));
    }

    #[tokio::test]
    async fn explicit_flush_delivers_immediately() {
        let mut flusher = PendingResponseFlusher::new(Duration::from_secs(60));
        let (tx, mut rx) = oneshot::channel();
        flusher.enqueue(opened(), tx);
        flusher.flush();
        assert!(matches!(
            rx.try_recv().unwrap().unwrap().kind,
            ResponseKind::Opened { .. }
        ));
        assert_eq!(flusher.pending(), 0);
    }

    #[tokio::test]
    async fn enqueue_flushes_previous_entry() {
        let mut flusher = PendingResponseFlusher::new(Duration::from_secs(60));
        let (tx_first, mut rx_first) = oneshot::channel();
        let (tx_second, mut rx_second) = oneshot::channel();

        flusher.enqueue(opened(), tx_first);
        flusher.enqueue(opened(), tx_second);

        assert!(rx_first.try_recv().is_ok());
        assert!(rx_second.try_recv().is_err());
        assert_eq!(flusher.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_flusher_never_fires() {
        let flusher = PendingResponseFlusher::new(Duration::from_millis(10));
        let fired = timeout(Duration::from_millis(50), flusher.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn dropped_caller_is_tolerated() {
        let mut flusher = PendingResponseFlusher::new(Duration::from_secs(60));
        let (tx, rx) = oneshot::channel();
        flusher.enqueue(opened(), tx);
        drop(rx);
        flusher.flush();
        assert_eq!(flusher.pending(), 0);
    }
}
