use thiserror::Error;

/// Reasons a stream stops yielding frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("buffer too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("type code {type_code} outside accepted range {min}..={max}")]
    TypeOutOfRange { type_code: u32, min: u32, max: u32 },
    #[error("excluded type code {type_code}")]
    ExcludedType { type_code: u32 },
    #[error("payload length {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },
    #[error("stream ended with a partial {phase} ({buffered} of {needed} bytes)")]
    Truncated {
        phase: &'static str,
        buffered: usize,
        needed: usize,
    },
    #[error("stream lost {skipped} bytes, frame alignment unknown")]
    StreamGap { skipped: u64 },
}
