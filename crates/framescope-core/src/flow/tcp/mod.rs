pub mod error;
pub mod parser;

pub use error::TcpError;
pub use parser::{TcpFlags, TcpSegment, parse_tcp_segment};
