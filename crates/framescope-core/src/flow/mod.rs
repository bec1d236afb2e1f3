//! Connection identity.
//!
//! A [`FlowKey`] names a TCP connection regardless of which side sent the
//! packet; a [`DirectionKey`] names one half-duplex byte stream within it.

pub mod tcp;

use std::fmt;
use std::net::SocketAddr;

pub use tcp::{TcpFlags, TcpSegment, parse_tcp_segment};

/// Unordered endpoint pair, stored with `a <= b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowKey {
    a: SocketAddr,
    b: SocketAddr,
}

impl FlowKey {
    pub fn new(x: SocketAddr, y: SocketAddr) -> Self {
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.a, self.b)
    }

    /// The endpoint opposite `endpoint`. `endpoint` must belong to the flow.
    fn peer_of(&self, endpoint: SocketAddr) -> SocketAddr {
        if endpoint == self.a { self.b } else { self.a }
    }
}

/// One direction of a flow: the bytes sent by `src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirectionKey {
    flow: FlowKey,
    src: SocketAddr,
}

impl DirectionKey {
    pub fn new(src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            flow: FlowKey::new(src, dst),
            src,
        }
    }

    pub fn of_segment(segment: &TcpSegment<'_>) -> Self {
        Self::new(segment.src, segment.dst)
    }

    pub fn flow(&self) -> FlowKey {
        self.flow
    }

    pub fn src(&self) -> SocketAddr {
        self.src
    }

    pub fn dst(&self) -> SocketAddr {
        self.flow.peer_of(self.src)
    }

    /// The opposite direction of the same flow.
    pub fn reverse(&self) -> Self {
        Self {
            flow: self.flow,
            src: self.dst(),
        }
    }
}

impl fmt::Display for DirectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst())
    }
}
