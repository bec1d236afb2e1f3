use std::fmt::Write as _;
use std::io::Write;

use serde::Serialize;

use super::{FrameRecord, FrameSink, SinkError};

#[derive(Serialize)]
struct JsonFrame<'a> {
    captured_at: String,
    src: String,
    dst: String,
    type_code: u32,
    size: u32,
    payload_hex: &'a str,
}

/// One JSON object per line.
///
/// `{"captured_at":"2023-11-14T22:13:20.5Z","src":"10.0.0.2:3724",
/// "dst":"10.0.0.1:50000","type_code":7,"size":2,"payload_hex":"abcd"}`
///
/// Writes are plain blocking `io::Write` calls made on the writer task.
/// Wrap `W` in a `BufWriter` so most lines are a memcpy. A buffer flush into
/// a stalled pipe blocks the runtime worker running the writer until the
/// reader drains it; run on the multi-thread runtime so other tasks keep a
/// worker.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> FrameSink for JsonLinesSink<W> {
    async fn write(&mut self, record: &FrameRecord) -> Result<(), SinkError> {
        let payload_hex = to_hex(&record.frame.payload);
        let line = JsonFrame {
            captured_at: record.captured_at_rfc3339(),
            src: record.direction.src().to_string(),
            dst: record.direction.dst().to_string(),
            type_code: record.frame.type_code,
            size: record.frame.size,
            payload_hex: &payload_hex,
        };
        serde_json::to_writer(&mut self.out, &line)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Frames re-packed to wire form (header then payload), back to back.
/// Blocking writes, as with [`JsonLinesSink`].
pub struct RawSink<W> {
    out: W,
}

impl<W: Write + Send + 'static> RawSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> FrameSink for RawSink<W> {
    async fn write(&mut self, record: &FrameRecord) -> Result<(), SinkError> {
        self.out.write_all(&record.frame.encode())?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Lowercase hex, two digits per byte.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
