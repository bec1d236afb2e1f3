//! Capture sources and the fan-in that merges them.
//!
//! A [`PacketSource`] yields raw link-layer frames with a capture timestamp.
//! Concrete sources are picked at startup: [`PcapFileSource`] reads capture
//! files, `LiveCapture` (feature `live`) reads an interface through libpcap.
//! [`open_all`] opens several sources and keeps going past the ones that
//! fail, and [`fan_in`] merges whatever opened into one bounded queue.

mod fanin;
#[cfg(feature = "live")]
mod live;
mod pcapfile;

pub use fanin::{FanIn, FanInHandle, SourceReport, fan_in};
#[cfg(feature = "live")]
pub use live::{LiveCapture, list_interfaces};
pub use pcapfile::PcapFileSource;

use std::sync::Arc;

use log::warn;
use pcap_parser::Linktype;
use thiserror::Error;

/// One captured frame as handed over by a source.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    /// Capture timestamp in seconds since the Unix epoch.
    pub ts: f64,
    /// Name of the interface or file the frame came from.
    pub source: Arc<str>,
    pub linktype: Linktype,
    pub data: Vec<u8>,
}

pub trait PacketSource {
    /// Name used in logs and [`PacketEvent::source`].
    fn name(&self) -> &str;

    /// Next frame, `Ok(None)` once the source is exhausted.
    ///
    /// Live sources return [`SourceError::TimedOut`] when their read timeout
    /// expires without traffic; callers treat it as "try again".
    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError>;
}

impl<S: PacketSource + ?Sized> PacketSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn next_packet(&mut self) -> Result<Option<PacketEvent>, SourceError> {
        (**self).next_packet()
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error: {0}")]
    Pcap(String),
    #[error("capture source '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("filter '{filter}' rejected on '{name}': {reason}")]
    Filter {
        name: String,
        filter: String,
        reason: String,
    },
    #[error("read timed out")]
    TimedOut,
    #[error("no capture source available ({failed} failed to open)")]
    NoSourcesAvailable { failed: usize },
}

impl From<pcapfile::error::PcapSourceError> for SourceError {
    fn from(value: pcapfile::error::PcapSourceError) -> Self {
        match value {
            pcapfile::error::PcapSourceError::Io(err) => SourceError::Io(err),
            other @ pcapfile::error::PcapSourceError::NotACapture { .. } => {
                SourceError::Pcap(other.to_string())
            }
            pcapfile::error::PcapSourceError::Pcap { context, message } => {
                SourceError::Pcap(format!("{context}: {message}"))
            }
        }
    }
}

/// Result of [`open_all`]: the sources that opened plus the ones that did not.
#[derive(Debug)]
pub struct OpenedSources<S> {
    pub sources: Vec<S>,
    pub failures: Vec<(String, SourceError)>,
}

impl<S> OpenedSources<S> {
    /// Fails with [`SourceError::NoSourcesAvailable`] when nothing opened.
    pub fn require_any(self) -> Result<Vec<S>, SourceError> {
        if self.sources.is_empty() {
            return Err(SourceError::NoSourcesAvailable {
                failed: self.failures.len(),
            });
        }
        Ok(self.sources)
    }
}

/// Open every named source, skipping (and logging) the ones that fail.
///
/// # Examples
/// ```
/// use framescope_core::source::{SourceError, open_all};
///
/// let opened = open_all(["eth0", "missing0"], |name| {
///     if name == "eth0" {
///         Ok(name.to_string())
///     } else {
///         Err(SourceError::Unavailable {
///             name: name.to_string(),
///             reason: "no such device".to_string(),
///         })
///     }
/// });
/// assert_eq!(opened.sources, vec!["eth0".to_string()]);
/// assert_eq!(opened.failures.len(), 1);
/// ```
pub fn open_all<I, N, S, F>(names: I, mut open: F) -> OpenedSources<S>
where
    I: IntoIterator<Item = N>,
    N: AsRef<str>,
    F: FnMut(&str) -> Result<S, SourceError>,
{
    let mut sources = Vec::new();
    let mut failures = Vec::new();
    for name in names {
        let name = name.as_ref();
        match open(name) {
            Ok(source) => sources.push(source),
            Err(err) => {
                warn!("skipping capture source {name}: {err}");
                failures.push((name.to_string(), err));
            }
        }
    }
    OpenedSources { sources, failures }
}
