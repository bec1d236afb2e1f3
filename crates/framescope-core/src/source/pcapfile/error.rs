use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("cannot read capture: {0}")]
    Io(#[from] std::io::Error),
    /// The first four bytes match neither format.
    #[error("not a pcap or pcapng file (magic {magic:02x?})")]
    NotACapture { magic: [u8; 4] },
    #[error("malformed {context} capture: {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
}
