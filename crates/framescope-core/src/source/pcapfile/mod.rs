//! PCAP/PCAPNG capture file source.
//!
//! Reads a capture file from disk and hands its frames to the pipeline like
//! any other [`PacketSource`](crate::source::PacketSource). Timestamps come
//! from the file, so reassembly ages flows on the capture's own timeline.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use parser::PcapFileSource;
