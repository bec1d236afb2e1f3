use thiserror::Error;

/// Why a captured frame could not be decoded down to its TCP header.
///
/// Non-TCP traffic is not an error; `parse_tcp_segment` returns `Ok(None)`
/// for it.
///
/// ```
/// use framescope_core::flow::tcp::TcpError;
///
/// let err = TcpError::TooShort { needed: 4, actual: 2 };
/// assert_eq!(err.to_string(), "link header too short: need 4 bytes, got 2");
/// ```
#[derive(Debug, Error)]
pub enum TcpError {
    #[error("malformed packet: {0}")]
    Slice(String),
    #[error("TCP segment without an IP header")]
    MissingNetworkLayer,
    #[error("link header too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
}
