//! Single-slot hand-off between check tasks and the agent's forwarder
//!
//! The queue holds at most one unconsumed [`ResultEnvelope`]. While the slot
//! is occupied every producer blocks in [`TelemetrySender::put`], so a stalled
//! or disconnected transport pauses the checks instead of piling up stale
//! results.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::ResultEnvelope;

/// Number of envelopes the queue buffers
pub const SLOT_CAPACITY: usize = 1;

/// The other side of the queue is gone
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("telemetry queue closed")]
pub struct QueueClosed;

/// Creates a connected producer/consumer pair.
pub fn telemetry_queue() -> (TelemetrySender, TelemetryReceiver) {
    let (tx, rx) = mpsc::channel(SLOT_CAPACITY);
    (TelemetrySender { tx }, TelemetryReceiver { rx })
}

/// Producer side, cloned into every check task
#[derive(Debug, Clone)]
pub struct TelemetrySender {
    tx: mpsc::Sender<ResultEnvelope>,
}

impl TelemetrySender {
    /// Places `envelope` in the slot, waiting while it is occupied.
    pub async fn put(&self, envelope: ResultEnvelope) -> Result<(), QueueClosed> {
        self.tx.send(envelope).await.map_err(|_| QueueClosed)
    }

    /// Number of envelopes waiting to be taken
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the forwarder
#[derive(Debug)]
pub struct TelemetryReceiver {
    rx: mpsc::Receiver<ResultEnvelope>,
}

impl TelemetryReceiver {
    /// Waits up to `timeout` for an envelope.
    ///
    /// `Ok(None)` means the wait timed out; `Err` means every producer is gone
    /// and the slot is empty. Cancel safe.
    pub async fn take(&mut self, timeout: Duration) -> Result<Option<ResultEnvelope>, QueueClosed> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(QueueClosed),
            Err(_) => Ok(None),
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
