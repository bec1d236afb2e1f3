use std::net::{IpAddr, SocketAddr};

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_parser::Linktype;

use super::error::TcpError;

/// Length of the BSD loopback (`DLT_NULL`) pseudo header.
const NULL_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

/// Decoded TCP segment borrowing its payload from the captured frame.
#[derive(Debug, Clone)]
pub struct TcpSegment<'a> {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub payload: &'a [u8],
}

/// Parse a TCP segment from a link-layer frame.
///
/// Returns `Ok(None)` for unsupported link types, non-TCP traffic and IP
/// fragments (which carry no complete transport header).
pub fn parse_tcp_segment(
    linktype: Linktype,
    data: &[u8],
) -> Result<Option<TcpSegment<'_>>, TcpError> {
    let sliced = match linktype {
        Linktype::ETHERNET => SlicedPacket::from_ethernet(data).map_err(slice_err)?,
        Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => {
            SlicedPacket::from_ip(data).map_err(slice_err)?
        }
        Linktype::LINUX_SLL => SlicedPacket::from_linux_sll(data).map_err(slice_err)?,
        Linktype::NULL | Linktype::LOOP => {
            let ip = data.get(NULL_HEADER_LEN..).ok_or(TcpError::TooShort {
                needed: NULL_HEADER_LEN,
                actual: data.len(),
            })?;
            SlicedPacket::from_ip(ip).map_err(slice_err)?
        }
        _ => return Ok(None),
    };

    let tcp = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return Ok(None),
    };
    let (src_ip, dst_ip) = match sliced.net {
        Some(NetSlice::Ipv4(ref ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ref ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        _ => return Err(TcpError::MissingNetworkLayer),
    };

    Ok(Some(TcpSegment {
        src: SocketAddr::new(src_ip, tcp.source_port()),
        dst: SocketAddr::new(dst_ip, tcp.destination_port()),
        seq: tcp.sequence_number(),
        ack: tcp.acknowledgment_number(),
        flags: TcpFlags {
            syn: tcp.syn(),
            ack: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
            psh: tcp.psh(),
        },
        payload: tcp.payload(),
    }))
}

fn slice_err<E: std::fmt::Display>(err: E) -> TcpError {
    TcpError::Slice(err.to_string())
}
