//! # Result Streaming Controller
//!
//! Drives one streaming search from query to final frame:
//!
//! ```text
//! Open ──▶ Streaming ──▶ Closing(Completed | Failed | Cancelled) ──▶ Closed
//! ```
//!
//! While streaming, a liveness task polls the client connection at a fixed
//! interval. A disconnect, whether seen by the poll or by a failed frame
//! write, cancels the query without an `error` frame.

use cc_query::StoreQuery;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::sse::SseFrame;
use crate::store::{RowSink, StoreError};

/// Whether the client on the other end is still listening.
pub trait ConnectionState: Send + Sync + 'static {
    fn is_alive(&self) -> bool;
}

/// The response body holds the receiver, so a closed channel means the
/// client is gone.
impl<T: Send + 'static> ConnectionState for mpsc::Sender<T> {
    fn is_alive(&self) -> bool {
        !self.is_closed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Open,
    Streaming,
    Closing(Outcome),
    Closed,
}

/// Writes each row as a `message` frame the moment the store yields it.
struct FrameSink {
    frames: mpsc::Sender<String>,
}

#[async_trait::async_trait]
impl RowSink for FrameSink {
    async fn accept(&mut self, row: Value) -> Result<(), StoreError> {
        self.frames
            .send(SseFrame::message(&row).encode())
            .await
            .map_err(|_| StoreError::SinkClosed)
    }
}

pub struct StreamController<C> {
    frames: mpsc::Sender<String>,
    connection: Arc<C>,
    poll_interval: Duration,
    phase: StreamPhase,
}

impl<C: ConnectionState> StreamController<C> {
    pub fn new(frames: mpsc::Sender<String>, connection: Arc<C>, poll_interval: Duration) -> Self {
        Self {
            frames,
            connection,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            phase: StreamPhase::Open,
        }
    }

    fn transition(&mut self, next: StreamPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "Stream transition");
        self.phase = next;
    }

    async fn emit(&self, frame: SseFrame) {
        if self.frames.send(frame.encode()).await.is_err() {
            tracing::debug!(kind = ?frame.kind(), "Client left before the frame was written");
        }
    }

    /// Streams `query` to the frame channel.
    ///
    /// Failures other than a disconnect are reported to the client and then
    /// returned. The frame channel is released when this returns.
    pub async fn run(
        mut self,
        gateway: &Gateway,
        query: &StoreQuery,
        probe: bool,
        what: &str,
    ) -> Result<Outcome, GatewayError> {
        self.transition(StreamPhase::Streaming);

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let liveness = tokio::spawn(
            watch(self.connection.clone(), self.poll_interval, cancel_tx).in_current_span(),
        );
        let mut sink = FrameSink {
            frames: self.frames.clone(),
        };

        let result = tokio::select! {
            result = gateway.stream(query, &mut sink, probe, what) => Some(result),
            Ok(()) = &mut cancel_rx => None,
        };
        liveness.abort();
        drop(sink);

        let (outcome, error) = match result {
            Some(Ok(rows)) => {
                tracing::info!(rows, "Stream completed");
                (Outcome::Completed, None)
            }
            None | Some(Err(GatewayError::ClientDisconnected)) => {
                tracing::info!("Client disconnected, stream cancelled");
                (Outcome::Cancelled, None)
            }
            Some(Err(e)) => (Outcome::Failed, Some(e)),
        };

        self.transition(StreamPhase::Closing(outcome));
        match &error {
            Some(e) => {
                self.emit(SseFrame::error(&e.info())).await;
                self.emit(SseFrame::close()).await;
            }
            None if outcome == Outcome::Completed => self.emit(SseFrame::close()).await,
            None => {}
        }
        self.transition(StreamPhase::Closed);

        match error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }
}

async fn watch<C: ConnectionState>(
    connection: Arc<C>,
    every: Duration,
    cancel: oneshot::Sender<()>,
) {
    let mut ticks = tokio::time::interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        if !connection.is_alive() {
            let _ = cancel.send(());
            return;
        }
    }
}
