use std::collections::VecDeque;

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};

use crate::config::FramingRules;
use crate::flow::DirectionKey;
use crate::protocols::framing::{FrameExtractor, FramingError, layout};
use crate::reassembly::CloseReason;
use crate::sink::{FrameRecord, SinkError, SinkHandle};

/// What the dispatch loop forwards to a direction's extractor task.
#[derive(Debug)]
pub(crate) enum StreamChunk {
    Data { ts: f64, bytes: Vec<u8> },
    Gap { skipped: u64 },
    Closed(CloseReason),
}

#[derive(Debug)]
pub(crate) struct ExtractorOutcome {
    pub frames: u64,
    pub bytes_consumed: u64,
    pub bytes_discarded: u64,
    pub violation: Option<FramingError>,
    pub sink_closed: bool,
}

/// Capture times of received chunks, keyed by the stream offset where each
/// chunk ends, so a frame can be stamped with the chunk that completed it.
#[derive(Debug, Default)]
struct ChunkTimes {
    received: u64,
    ends: VecDeque<(u64, f64)>,
}

impl ChunkTimes {
    fn push(&mut self, len: usize, ts: f64) {
        self.received += len as u64;
        self.ends.push_back((self.received, ts));
    }

    fn completed_at(&mut self, frame_end: u64) -> f64 {
        while let Some(&(end, _)) = self.ends.front() {
            if end >= frame_end {
                break;
            }
            self.ends.pop_front();
        }
        self.ends.front().map(|&(_, ts)| ts).unwrap_or_default()
    }
}

struct StreamWorker {
    key: DirectionKey,
    extractor: FrameExtractor,
    times: ChunkTimes,
    sink: SinkHandle,
    violation: Option<FramingError>,
    /// One maximal frame: once this much is buffered the next drain is
    /// certain to make progress. `None` when payloads are uncapped.
    backlog_limit: Option<usize>,
}

impl StreamWorker {
    /// Stop taking chunks until a tick drains what is buffered.
    fn backlogged(&self) -> bool {
        self.backlog_limit
            .is_some_and(|limit| self.extractor.buffered() >= limit)
    }

    fn push(&mut self, ts: f64, bytes: &[u8]) {
        if !self.extractor.is_abandoned() {
            self.times.push(bytes.len(), ts);
        }
        self.extractor.push(bytes);
    }

    /// Frames completed before the gap still go out.
    async fn gap(&mut self, skipped: u64) -> Result<(), SinkError> {
        self.drain().await?;
        if !self.extractor.is_abandoned() {
            let err = self.extractor.gap(skipped);
            self.abandoned(err);
        }
        Ok(())
    }

    /// Submit every complete frame currently buffered.
    async fn drain(&mut self) -> Result<(), SinkError> {
        loop {
            match self.extractor.next_frame() {
                Ok(Some(frame)) => {
                    let captured_at = self.times.completed_at(self.extractor.bytes_consumed());
                    self.sink
                        .submit(FrameRecord {
                            captured_at,
                            direction: self.key,
                            frame,
                        })
                        .await?;
                }
                Ok(None) => return Ok(()),
                Err(err) => {
                    self.abandoned(err);
                    return Ok(());
                }
            }
        }
    }

    fn abandoned(&mut self, err: FramingError) {
        self.times = ChunkTimes::default();
        match err {
            FramingError::ExcludedType { .. } => {
                debug!("{}: extraction stopped: {err}", self.key)
            }
            _ => warn!("{}: extraction abandoned: {err}", self.key),
        }
        self.violation = Some(err);
    }

    fn outcome(self, sink_closed: bool) -> ExtractorOutcome {
        ExtractorOutcome {
            frames: self.extractor.frames_emitted(),
            bytes_consumed: self.extractor.bytes_consumed(),
            bytes_discarded: self.extractor.bytes_discarded(),
            violation: self.violation,
            sink_closed,
        }
    }
}

/// Extraction task for one direction.
///
/// Frames are pulled on each tick; between ticks the task only buffers, up
/// to one maximal frame, after which it leaves chunks queued so the
/// dispatch loop feels the backpressure. When the dispatch loop drops the
/// sender the stream is over: a last drain runs, then any leftover partial
/// frame is reported as truncation.
pub(crate) async fn run_extractor(
    key: DirectionKey,
    mut chunks: mpsc::Receiver<StreamChunk>,
    rules: FramingRules,
    sink: SinkHandle,
) -> ExtractorOutcome {
    let mut ticker = interval(rules.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let backlog_limit = rules
        .max_payload_len
        .map(|cap| layout::HEADER_LEN + cap as usize);
    let mut worker = StreamWorker {
        key,
        extractor: FrameExtractor::new(rules),
        times: ChunkTimes::default(),
        sink,
        violation: None,
        backlog_limit,
    };

    loop {
        tokio::select! {
            chunk = chunks.recv(), if !worker.backlogged() => match chunk {
                Some(StreamChunk::Data { ts, bytes }) => worker.push(ts, &bytes),
                Some(StreamChunk::Gap { skipped }) => {
                    if worker.gap(skipped).await.is_err() {
                        return worker.outcome(true);
                    }
                }
                Some(StreamChunk::Closed(reason)) => {
                    debug!("{key}: stream closed ({reason:?}), finishing extraction");
                }
                None => break,
            },
            _ = ticker.tick() => {
                if worker.drain().await.is_err() {
                    return worker.outcome(true);
                }
            }
        }
    }

    if worker.drain().await.is_err() {
        return worker.outcome(true);
    }
    if let Err(err) = worker.extractor.finish() {
        worker.abandoned(err);
    }
    worker.outcome(false)
}
