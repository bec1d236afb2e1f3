//! framescope core library: passive TCP capture, stream reassembly and
//! length-prefixed frame extraction.
//!
//! Data flows through four layers, each usable on its own:
//! - [`source`]: capture files or live interfaces yielding raw link-layer
//!   frames, merged by a fan-in into one bounded queue;
//! - [`reassembly`]: per-direction TCP byte streams rebuilt from segments
//!   decoded by [`flow::tcp`];
//! - [`protocols::framing`]: a state machine cutting each stream into
//!   typed frames (`u32` type, `u32` length, payload, little-endian);
//! - [`sink`]: a single writer task feeding JSON lines, raw bytes, SQLite
//!   or memory.
//!
//! [`pipeline::run`] wires them together. Parsing and reassembly are pure
//! and synchronous; I/O lives in `source` and `sink`, concurrency in
//! `pipeline`.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use framescope_core::extract_pcap_file;
//! use framescope_core::config::PipelineConfig;
//! use framescope_core::sink::MemorySink;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = MemorySink::new();
//! let summary =
//!     extract_pcap_file(Path::new("capture.pcap"), &PipelineConfig::default(), sink.clone())
//!         .await?;
//! println!("{} frames from {} packets", sink.len(), summary.packets);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use thiserror::Error;

pub mod config;
pub mod flow;
pub mod pipeline;
pub mod protocols;
pub mod reassembly;
pub mod sink;
pub mod source;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{PipelineError, PipelineSummary};
pub use protocols::framing::ExtractedFrame;
pub use sink::{FrameRecord, FrameSink};
pub use source::{PacketEvent, PacketSource, PcapFileSource, SourceError};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Run the whole pipeline over one capture file.
///
/// Convenience for the common offline case: opens the file, feeds it
/// through a single-source fan-in and returns once every frame reached
/// `sink`. Read errors part-way through the file are logged by the fan-in
/// and end the run early; they do not fail it.
pub async fn extract_pcap_file<S: FrameSink>(
    path: &Path,
    config: &PipelineConfig,
    sink: S,
) -> Result<PipelineSummary, ExtractError> {
    let source = PcapFileSource::open(path)?;
    let feed = source::fan_in(vec![source], config.capture.queue_capacity);
    let summary = pipeline::run(config, feed.packets, sink, std::future::pending()).await?;
    tokio::task::spawn_blocking(move || feed.handle.join())
        .await
        .map_err(PipelineError::from)?;
    Ok(summary)
}
