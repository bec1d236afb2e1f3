use crate::config::FramingRules;

use super::error::FramingError;
use super::layout;
use super::parser::{ExtractedFrame, FrameHeader, parse_header};

/// Consumed bytes kept before the buffer is compacted.
const COMPACT_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorPhase {
    AwaitingHeader,
    AwaitingPayload { type_code: u32, size: u32 },
    Abandoned,
}

/// Frame state machine for one direction's byte stream.
///
/// Bytes go in through [`push`](Self::push); complete frames come out of
/// [`next_frame`](Self::next_frame). The first validation failure moves the
/// extractor to [`ExtractorPhase::Abandoned`] for good: buffered bytes are
/// dropped and everything pushed afterwards is only counted.
///
/// ```
/// use framescope_core::config::FramingRules;
/// use framescope_core::protocols::framing::FrameExtractor;
///
/// let mut extractor = FrameExtractor::new(FramingRules::default());
/// extractor.push(&[3, 0, 0, 0, 1, 0]);
/// assert!(extractor.next_frame()?.is_none());
/// extractor.push(&[0, 0, 0x2a]);
/// let frame = extractor.next_frame()?.unwrap();
/// assert_eq!((frame.type_code, frame.payload), (3, vec![0x2a]));
/// # Ok::<(), framescope_core::protocols::framing::FramingError>(())
/// ```
#[derive(Debug)]
pub struct FrameExtractor {
    rules: FramingRules,
    buf: Vec<u8>,
    pos: usize,
    phase: ExtractorPhase,
    consumed: u64,
    discarded: u64,
    frames: u64,
}

impl FrameExtractor {
    pub fn new(rules: FramingRules) -> Self {
        Self {
            rules,
            buf: Vec::new(),
            pos: 0,
            phase: ExtractorPhase::AwaitingHeader,
            consumed: 0,
            discarded: 0,
            frames: 0,
        }
    }

    pub fn phase(&self) -> ExtractorPhase {
        self.phase
    }

    pub fn is_abandoned(&self) -> bool {
        self.phase == ExtractorPhase::Abandoned
    }

    /// Bytes that became part of an emitted frame or a pending header.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes dropped because the stream was abandoned.
    pub fn bytes_discarded(&self) -> u64 {
        self.discarded
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.is_abandoned() {
            self.discarded += bytes.len() as u64;
            return;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete frame, `Ok(None)` when more bytes are needed (or the
    /// stream was already abandoned).
    ///
    /// # Errors
    /// The validation failure that abandoned the stream. It is returned once;
    /// later calls yield `Ok(None)`.
    pub fn next_frame(&mut self) -> Result<Option<ExtractedFrame>, FramingError> {
        loop {
            match self.phase {
                ExtractorPhase::Abandoned => return Ok(None),
                ExtractorPhase::AwaitingHeader => {
                    let header = match parse_header(&self.buf[self.pos..], &self.rules) {
                        Ok(Some(header)) => header,
                        Ok(None) => return Ok(None),
                        Err(err) => return Err(self.abandon(err)),
                    };
                    let FrameHeader { type_code, size } = header;
                    self.advance(layout::HEADER_LEN);
                    self.phase = ExtractorPhase::AwaitingPayload { type_code, size };
                }
                ExtractorPhase::AwaitingPayload { type_code, size } => {
                    let len = size as usize;
                    if self.buffered() < len {
                        return Ok(None);
                    }
                    let payload = self.buf[self.pos..self.pos + len].to_vec();
                    self.advance(len);
                    self.phase = ExtractorPhase::AwaitingHeader;
                    self.frames += 1;
                    return Ok(Some(ExtractedFrame {
                        type_code,
                        size,
                        payload,
                    }));
                }
            }
        }
    }

    /// The underlying stream skipped bytes; alignment cannot be recovered.
    pub fn gap(&mut self, skipped: u64) -> FramingError {
        self.abandon(FramingError::StreamGap { skipped })
    }

    /// The stream has ended. Call after draining [`next_frame`](Self::next_frame).
    ///
    /// # Errors
    /// [`FramingError::Truncated`] when a header or payload was cut short.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        let truncated = match self.phase {
            ExtractorPhase::Abandoned => return Ok(()),
            ExtractorPhase::AwaitingHeader if self.buffered() == 0 => return Ok(()),
            ExtractorPhase::AwaitingHeader => FramingError::Truncated {
                phase: "header",
                buffered: self.buffered(),
                needed: layout::HEADER_LEN,
            },
            ExtractorPhase::AwaitingPayload { size, .. } => FramingError::Truncated {
                phase: "payload",
                buffered: self.buffered(),
                needed: size as usize,
            },
        };
        Err(self.abandon(truncated))
    }

    fn abandon(&mut self, err: FramingError) -> FramingError {
        self.discarded += self.buffered() as u64;
        self.buf = Vec::new();
        self.pos = 0;
        self.phase = ExtractorPhase::Abandoned;
        err
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.consumed += n as u64;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        } else if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}
