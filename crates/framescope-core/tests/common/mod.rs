//! Capture builders shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddrV4;
use std::path::Path;

use etherparse::PacketBuilder;

pub const LINKTYPE_ETHERNET: u16 = 1;

/// Route `log` output through the test harness; `RUST_LOG=debug` shows it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One TCP packet as it would appear on the wire.
#[derive(Clone)]
pub struct TcpPacket {
    pub ts: f64,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

impl TcpPacket {
    pub fn data(ts: f64, src: SocketAddrV4, dst: SocketAddrV4, seq: u32, payload: &[u8]) -> Self {
        Self {
            ts,
            src,
            dst,
            seq,
            syn: false,
            fin: false,
            rst: false,
            payload: payload.to_vec(),
        }
    }

    pub fn syn(ts: f64, src: SocketAddrV4, dst: SocketAddrV4, isn: u32) -> Self {
        Self {
            syn: true,
            ..Self::data(ts, src, dst, isn, &[])
        }
    }

    pub fn fin(ts: f64, src: SocketAddrV4, dst: SocketAddrV4, seq: u32) -> Self {
        Self {
            fin: true,
            ..Self::data(ts, src, dst, seq, &[])
        }
    }

    pub fn ethernet(&self) -> Vec<u8> {
        let mut builder = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
            .ipv4(self.src.ip().octets(), self.dst.ip().octets(), 64)
            .tcp(self.src.port(), self.dst.port(), self.seq, 65535);
        if self.syn {
            builder = builder.syn();
        } else {
            builder = builder.ack(1);
        }
        if self.fin {
            builder = builder.fin();
        }
        if self.rst {
            builder = builder.rst();
        }
        let mut packet = Vec::with_capacity(builder.size(self.payload.len()));
        builder.write(&mut packet, &self.payload).unwrap();
        packet
    }
}

/// Encode a frame header plus payload.
pub fn frame(type_code: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = type_code.to_le_bytes().to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Legacy pcap, little-endian, microsecond timestamps.
pub fn write_pcap(path: &Path, packets: &[TcpPacket]) {
    let mut output = Vec::new();
    output.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    output.extend_from_slice(&2u16.to_le_bytes());
    output.extend_from_slice(&4u16.to_le_bytes());
    output.extend_from_slice(&0i32.to_le_bytes());
    output.extend_from_slice(&0u32.to_le_bytes());
    output.extend_from_slice(&65535u32.to_le_bytes());
    output.extend_from_slice(&(LINKTYPE_ETHERNET as u32).to_le_bytes());

    for packet in packets {
        let data = packet.ethernet();
        let secs = packet.ts.trunc() as u32;
        let micros = ((packet.ts.fract() * 1e6).round()) as u32;
        output.extend_from_slice(&secs.to_le_bytes());
        output.extend_from_slice(&micros.to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&(data.len() as u32).to_le_bytes());
        output.extend_from_slice(&data);
    }
    fs::write(path, output).unwrap();
}

/// PCAPNG with one Ethernet interface, big-endian section.
pub fn write_pcapng(path: &Path, packets: &[TcpPacket]) {
    let mut output = Vec::new();
    output.extend_from_slice(&pcapng_block(0x0A0D0D0A, &section_header_body()));
    output.extend_from_slice(&pcapng_block(1, &interface_desc_body()));
    for packet in packets {
        let ts_us = (packet.ts * 1e6).round() as u64;
        output.extend_from_slice(&pcapng_block(
            6,
            &enhanced_packet_body(ts_us, &packet.ethernet()),
        ));
    }
    fs::write(path, output).unwrap();
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x1A2B3C4Du32.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_desc_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&LINKTYPE_ETHERNET.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&65535u32.to_be_bytes());
    body
}

fn enhanced_packet_body(ts_us: u64, data: &[u8]) -> Vec<u8> {
    let cap_len = data.len() as u32;
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&((ts_us >> 32) as u32).to_be_bytes());
    body.extend_from_slice(&(ts_us as u32).to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(&cap_len.to_be_bytes());
    body.extend_from_slice(data);
    body.resize(body.len() + (4 - data.len() % 4) % 4, 0);
    body
}
