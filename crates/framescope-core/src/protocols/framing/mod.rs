//! Length-prefixed framing.
//!
//! Each frame is an 8-byte header (little-endian `u32` type code, then
//! little-endian `u32` payload length) followed by exactly that many payload
//! bytes. Streams carry frames back to back with no resynchronisation marker,
//! so the first malformed header ends extraction for the whole stream.
//!
//! `layout` holds offsets, `reader` byte access, `parser` the header rules
//! and `extractor` the per-stream state machine.

pub mod error;
pub mod extractor;
pub mod layout;
pub mod parser;
pub mod reader;

pub use error::FramingError;
pub use extractor::{ExtractorPhase, FrameExtractor};
pub use parser::{ExtractedFrame, FrameHeader, parse_header};
