use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{PacketEvent, PacketSource, SourceError};

/// What one reader thread did before it exited.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub packets: u64,
    /// Error that ended the source, `None` for a clean end or a stop request.
    pub error: Option<String>,
}

/// The merged packet feed plus the handle controlling its readers.
pub struct FanIn {
    pub packets: mpsc::Receiver<PacketEvent>,
    pub handle: FanInHandle,
}

pub struct FanInHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<SourceReport>>,
}

impl FanInHandle {
    /// Ask every reader to exit after its current read.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn source_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every reader thread. Blocks; call [`stop`](Self::stop) first
    /// or drop the receiver so live readers notice.
    pub fn join(self) -> Vec<SourceReport> {
        self.workers
            .into_iter()
            .filter_map(|worker| match worker.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    warn!("capture reader thread panicked");
                    None
                }
            })
            .collect()
    }
}

/// Start one reader thread per source, all feeding a single bounded queue.
///
/// Every packet read by a source is sent exactly once and packets of one
/// source keep their order. The queue closes once every reader has exited.
/// A full queue blocks the reader, which leaves the kernel capture buffer
/// to absorb the burst.
pub fn fan_in<S>(sources: Vec<S>, capacity: usize) -> FanIn
where
    S: PacketSource + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let stop = Arc::new(AtomicBool::new(false));
    let mut workers = Vec::with_capacity(sources.len());

    for source in sources {
        let tx = tx.clone();
        let stop = Arc::clone(&stop);
        let thread_name = format!("capture-{}", source.name());
        let spawned = thread::Builder::new()
            .name(thread_name)
            .spawn(move || read_source(source, tx, stop));
        match spawned {
            Ok(worker) => workers.push(worker),
            Err(err) => warn!("failed to start capture reader thread: {err}"),
        }
    }
    info!("fan-in started with {} capture source(s)", workers.len());

    FanIn {
        packets: rx,
        handle: FanInHandle { stop, workers },
    }
}

fn read_source<S: PacketSource>(
    mut source: S,
    tx: mpsc::Sender<PacketEvent>,
    stop: Arc<AtomicBool>,
) -> SourceReport {
    let mut packets = 0u64;
    let mut error = None;

    while !stop.load(Ordering::Relaxed) {
        match source.next_packet() {
            Ok(Some(event)) => {
                packets += 1;
                if tx.blocking_send(event).is_err() {
                    debug!("{}: packet queue closed", source.name());
                    break;
                }
            }
            Ok(None) => {
                debug!("{}: end of capture", source.name());
                break;
            }
            Err(SourceError::TimedOut) => continue,
            Err(err) => {
                warn!("{}: capture stopped: {err}", source.name());
                error = Some(err.to_string());
                break;
            }
        }
    }

    SourceReport {
        name: source.name().to_string(),
        packets,
        error,
    }
}
