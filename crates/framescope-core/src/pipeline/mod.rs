//! The capture-to-frame pipeline.
//!
//! [`run`] owns the dispatch loop. Packets from the fan-in queue are decoded
//! and fed to the [`ReassemblyEngine`]; its events are routed to one extractor
//! task per direction, which submit frames to the sink writer. The idle sweep
//! runs inside the same loop, so reassembly state never needs a lock.
//!
//! Every queue on the way is bounded. A slow sink fills the writer queue,
//! extractors stop taking chunks, the dispatch loop waits on the full
//! per-direction queue, and the capture readers block on the fan-in queue.
//!
//! ```no_run
//! use framescope_core::config::PipelineConfig;
//! use framescope_core::pipeline;
//! use framescope_core::sink::JsonLinesSink;
//! use framescope_core::source::{PcapFileSource, fan_in};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let source = PcapFileSource::open("capture.pcap".as_ref())?;
//! let feed = fan_in(vec![source], config.capture.queue_capacity);
//! let sink = JsonLinesSink::new(std::io::stdout());
//! let summary = pipeline::run(&config, feed.packets, sink, std::future::pending()).await?;
//! println!("{} frames", summary.extraction.frames);
//! # Ok(())
//! # }
//! ```

mod extract;

use std::collections::HashMap;
use std::future::Future;
use std::time::Instant;

use log::{debug, error, info, trace};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use crate::config::{FramingRules, PipelineConfig};
use crate::flow::{DirectionKey, parse_tcp_segment};
use crate::protocols::framing::FramingError;
use crate::reassembly::{ReassemblyEngine, ReassemblyStats, StreamEvent};
use crate::sink::{FrameSink, SinkError, SinkHandle, WriterSummary, spawn_writer};
use crate::source::PacketEvent;

use extract::{ExtractorOutcome, StreamChunk, run_extractor};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("pipeline task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    pub streams: u64,
    pub frames: u64,
    pub bytes_consumed: u64,
    pub bytes_discarded: u64,
    /// Streams abandoned on a type, size or gap violation.
    pub abandoned: u64,
    /// Streams that ended with an excluded control code.
    pub excluded: u64,
    /// Streams that ended mid-frame.
    pub truncated: u64,
    /// Streams cut short because the sink writer stopped.
    pub sink_closed: u64,
    pub tasks_failed: u64,
}

impl ExtractionStats {
    fn record(&mut self, outcome: ExtractorOutcome) {
        self.streams += 1;
        self.frames += outcome.frames;
        self.bytes_consumed += outcome.bytes_consumed;
        self.bytes_discarded += outcome.bytes_discarded;
        if outcome.sink_closed {
            self.sink_closed += 1;
        }
        match outcome.violation {
            None => {}
            Some(FramingError::ExcludedType { .. }) => self.excluded += 1,
            Some(FramingError::Truncated { .. }) => self.truncated += 1,
            Some(_) => self.abandoned += 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSummary {
    pub packets: u64,
    pub non_tcp_packets: u64,
    pub undecodable_packets: u64,
    pub sweeps: u64,
    pub reassembly: ReassemblyStats,
    pub extraction: ExtractionStats,
    pub writer: WriterSummary,
}

/// Capture time as seen by the idle sweep: the newest packet timestamp
/// plus the wall time spent since that packet arrived.
#[derive(Debug, Default)]
struct CaptureClock {
    latest: Option<(f64, Instant)>,
}

impl CaptureClock {
    fn observe(&mut self, ts: f64) {
        match self.latest {
            Some((seen, _)) if ts < seen => {}
            _ => self.latest = Some((ts, Instant::now())),
        }
    }

    fn now(&self) -> Option<f64> {
        self.latest
            .map(|(ts, at)| ts + at.elapsed().as_secs_f64())
    }
}

struct Dispatcher {
    engine: ReassemblyEngine,
    rules: FramingRules,
    idle_timeout: f64,
    sink: SinkHandle,
    streams: HashMap<DirectionKey, mpsc::Sender<StreamChunk>>,
    tasks: JoinSet<ExtractorOutcome>,
    events: Vec<StreamEvent>,
    clock: CaptureClock,
    summary: PipelineSummary,
}

impl Dispatcher {
    fn new(config: &PipelineConfig, sink: SinkHandle) -> Self {
        Self {
            engine: ReassemblyEngine::new(&config.reassembly),
            rules: config.framing.clone(),
            idle_timeout: config.reassembly.idle_timeout().as_secs_f64(),
            sink,
            streams: HashMap::new(),
            tasks: JoinSet::new(),
            events: Vec::new(),
            clock: CaptureClock::default(),
            summary: PipelineSummary::default(),
        }
    }

    async fn handle_packet(&mut self, packet: PacketEvent) {
        self.summary.packets += 1;
        self.clock.observe(packet.ts);
        match parse_tcp_segment(packet.linktype, &packet.data) {
            Ok(Some(segment)) => self.engine.process(packet.ts, &segment, &mut self.events),
            Ok(None) => self.summary.non_tcp_packets += 1,
            Err(err) => {
                trace!("{}: undecodable packet: {err}", packet.source);
                self.summary.undecodable_packets += 1;
            }
        }
        self.route().await;
    }

    async fn sweep(&mut self) {
        let Some(now) = self.clock.now() else {
            return;
        };
        self.summary.sweeps += 1;
        let closed = self
            .engine
            .flush_older_than(now - self.idle_timeout, &mut self.events);
        if closed > 0 {
            debug!(
                "idle sweep closed {closed} stream(s), {} active",
                self.engine.active_streams()
            );
        }
        self.route().await;
    }

    async fn close_all(&mut self) {
        self.engine.close_all(&mut self.events);
        self.route().await;
    }

    async fn route(&mut self) {
        let mut events = std::mem::take(&mut self.events);
        for event in events.drain(..) {
            match event {
                StreamEvent::Opened(key) => {
                    let (tx, rx) = mpsc::channel(self.rules.chunk_queue_capacity.max(1));
                    self.tasks.spawn(run_extractor(
                        key,
                        rx,
                        self.rules.clone(),
                        self.sink.clone(),
                    ));
                    self.streams.insert(key, tx);
                }
                StreamEvent::Data { key, ts, bytes } => {
                    self.forward(key, StreamChunk::Data { ts, bytes }).await;
                }
                StreamEvent::Gap { key, skipped } => {
                    self.forward(key, StreamChunk::Gap { skipped }).await;
                }
                StreamEvent::Closed { key, reason, .. } => {
                    self.forward(key, StreamChunk::Closed(reason)).await;
                    self.streams.remove(&key);
                }
            }
        }
        self.events = events;
    }

    /// Waits while the direction's queue is full.
    async fn forward(&mut self, key: DirectionKey, chunk: StreamChunk) {
        // A send only fails once the extractor gave up on a closed sink.
        if let Some(tx) = self.streams.get(&key) {
            let _ = tx.send(chunk).await;
        }
    }

    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            collect(&mut self.summary.extraction, result);
        }
    }

    /// Wait for every extractor, then hand back the summary so far.
    async fn finish(self) -> PipelineSummary {
        let Dispatcher {
            engine,
            mut tasks,
            mut summary,
            streams,
            sink,
            ..
        } = self;
        drop(streams);
        drop(sink);
        while let Some(result) = tasks.join_next().await {
            collect(&mut summary.extraction, result);
        }
        summary.reassembly = engine.stats().clone();
        summary
    }
}

fn collect(stats: &mut ExtractionStats, result: Result<ExtractorOutcome, JoinError>) {
    match result {
        Ok(outcome) => stats.record(outcome),
        Err(err) => {
            error!("extractor task failed: {err}");
            stats.tasks_failed += 1;
        }
    }
}

/// Run the pipeline until the packet feed ends or `shutdown` resolves.
///
/// On the way out every open direction is closed, each extractor drains the
/// complete frames it holds, and the sink writer drains its queue.
///
/// # Errors
/// [`PipelineError::Sink`] when the sink failed past its retries. Framing
/// and reassembly problems never fail the run; they show up in the summary.
pub async fn run<S, F>(
    config: &PipelineConfig,
    mut packets: mpsc::Receiver<PacketEvent>,
    sink: S,
    shutdown: F,
) -> Result<PipelineSummary, PipelineError>
where
    S: FrameSink,
    F: Future<Output = ()>,
{
    let (sink_handle, mut writer) = spawn_writer(sink, &config.sink);
    let mut dispatcher = Dispatcher::new(config, sink_handle);

    let period = config.reassembly.sweep_interval();
    let mut sweep = time::interval_at(time::Instant::now() + period, period);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut writer_result = None;
    loop {
        tokio::select! {
            packet = packets.recv() => match packet {
                Some(packet) => dispatcher.handle_packet(packet).await,
                None => {
                    info!("capture feed ended");
                    break;
                }
            },
            _ = sweep.tick() => dispatcher.sweep().await,
            () = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            result = &mut writer => {
                writer_result = Some(result);
                break;
            }
        }
        dispatcher.reap();
    }
    drop(packets);

    dispatcher.close_all().await;
    let mut summary = dispatcher.finish().await;
    let writer_result = match writer_result {
        Some(result) => result,
        None => writer.await,
    };
    summary.writer = writer_result??;

    info!(
        "pipeline done: {} packets, {} streams, {} frames written",
        summary.packets, summary.extraction.streams, summary.writer.frames_written
    );
    Ok(summary)
}
