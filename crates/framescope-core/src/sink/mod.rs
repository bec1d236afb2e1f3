//! Frame sinks and the single writer task in front of them.
//!
//! Extractor tasks never touch a sink directly. They submit [`FrameRecord`]s
//! through a [`SinkHandle`] into a bounded queue drained by one writer task
//! ([`spawn_writer`]), so at most one write is in flight and a slow sink
//! pushes back on the producers instead of growing memory.

mod json;
mod memory;
mod sqlite;

pub use json::{JsonLinesSink, RawSink, to_hex};
pub use memory::MemorySink;
pub use sqlite::{SqliteFrameStore, StoredFrame};

use std::future::Future;
use std::time::Duration;

use log::{debug, error, warn};
use serde::Serialize;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::SinkConfig;
use crate::flow::DirectionKey;
use crate::protocols::framing::ExtractedFrame;

/// A frame plus where and when it was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Capture time of the packet that completed the frame.
    pub captured_at: f64,
    pub direction: DirectionKey,
    pub frame: ExtractedFrame,
}

impl FrameRecord {
    pub fn captured_at_rfc3339(&self) -> String {
        ts_to_rfc3339(self.captured_at).unwrap_or_else(|| self.captured_at.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("sink writer has stopped")]
    Closed,
}

/// Destination for extracted frames.
///
/// Only the writer task calls `write`, one record at a time.
pub trait FrameSink: Send + 'static {
    fn write(&mut self, record: &FrameRecord) -> impl Future<Output = Result<(), SinkError>> + Send;

    /// Called once after the last record.
    fn finish(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send {
        async { Ok(()) }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterSummary {
    pub frames_written: u64,
    pub retries: u64,
}

/// Cloneable submission side of the writer queue.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<FrameRecord>,
}

impl SinkHandle {
    /// Queue a record, waiting for space when the writer is behind.
    ///
    /// # Errors
    /// [`SinkError::Closed`] once the writer has stopped.
    pub async fn submit(&self, record: FrameRecord) -> Result<(), SinkError> {
        self.tx.send(record).await.map_err(|_| SinkError::Closed)
    }
}

/// Start the writer task owning `sink`.
///
/// The task ends with `Ok` once every [`SinkHandle`] is dropped and the
/// queue is drained, or with the sink's error once a write fails past its
/// retries. Must be called inside a tokio runtime.
pub fn spawn_writer<S: FrameSink>(
    sink: S,
    config: &SinkConfig,
) -> (SinkHandle, JoinHandle<Result<WriterSummary, SinkError>>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let task = tokio::spawn(run_writer(sink, rx, config.clone()));
    (SinkHandle { tx }, task)
}

async fn run_writer<S: FrameSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<FrameRecord>,
    config: SinkConfig,
) -> Result<WriterSummary, SinkError> {
    let mut summary = WriterSummary::default();

    while let Some(record) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match sink.write(&record).await {
                Ok(()) => {
                    summary.frames_written += 1;
                    break;
                }
                Err(err) if attempt < config.max_retries => {
                    attempt += 1;
                    summary.retries += 1;
                    warn!(
                        "{}: sink write failed (attempt {attempt} of {}): {err}",
                        record.direction, config.max_retries
                    );
                    let backoff = config.retry_backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(err) => {
                    error!(
                        "{}: giving up on frame type {} size {} captured at {}: {err}",
                        record.direction,
                        record.frame.type_code,
                        record.frame.size,
                        record.captured_at_rfc3339()
                    );
                    return Err(err);
                }
            }
        }
    }

    sink.finish().await?;
    debug!("sink writer finished after {} frames", summary.frames_written);
    Ok(summary)
}

pub(crate) fn ts_to_rfc3339(ts: f64) -> Option<String> {
    let nanos = (ts * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}
