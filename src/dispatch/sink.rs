//! Fire-and-Forget Output Sink
//!
//! The dispatcher never writes to a log or to stdout itself. It hands rendered records to this
//! sink with `try_send`, and a separate worker task performs the (possibly slow) write. A full
//! sink drops the record and counts it instead of stalling the dispatch loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

pub const DEFAULT_SINK_CAPACITY: usize = 10_000;

/// A rendered line waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkRecord {
    /// Goes to the tracing log at INFO.
    Message(String),
    /// Goes to standard output.
    Package(String),
}

/// Why a record could not be handed over.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkRejection {
    #[error("output sink is full")]
    Full,
    #[error("output sink is closed")]
    Closed,
}

/// Producer side of the sink. Cheap to clone.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<SinkRecord>,
    dropped: Arc<AtomicU64>,
}

impl OutputSink {
    /// Creates a sink whose records land in the returned receiver.
    ///
    /// Used by tests and by callers that want to route output somewhere other than stdout.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Creates a sink and spawns the worker that writes messages to the log and packages to
    /// stdout. The worker exits once every `OutputSink` clone has been dropped.
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let (sink, rx) = Self::channel(capacity);
        let handle = tokio::spawn(write_loop(rx));
        (sink, handle)
    }

    /// Hands a record to the worker without waiting.
    pub fn forward(&self, record: SinkRecord) -> Result<(), SinkRejection> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1_000 == 0 {
                    tracing::warn!("Output sink is full, {} record(s) dropped so far", dropped);
                }
                Err(SinkRejection::Full)
            }
            Err(TrySendError::Closed(_)) => Err(SinkRejection::Closed),
        }
    }

    /// Number of records dropped because the sink was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn write_loop(mut rx: mpsc::Receiver<SinkRecord>) {
    let mut stdout = tokio::io::stdout();

    while let Some(record) = rx.recv().await {
        match record {
            SinkRecord::Message(text) => {
                tracing::info!("{}", text);
            }
            SinkRecord::Package(text) => {
                let line = format!("{}\n", text);
                // Stdout failures (closed pipe, full disk) are not the dispatcher's concern.
                if let Err(e) = stdout.write_all(line.as_bytes()).await {
                    tracing::debug!("Failed to write package to stdout: {}", e);
                    continue;
                }
                let _ = stdout.flush().await;
            }
        }
    }

    tracing::debug!("Output sink worker stopped");
}
