//! TCP stream reassembly.
//!
//! [`ReassemblyEngine`] turns TCP segments, in whatever order they were
//! captured, into one contiguous byte stream per [`DirectionKey`]. Output is
//! a sequence of [`StreamEvent`]s pushed into a caller-provided buffer, so
//! the engine itself never blocks and holds no channels.
//!
//! Per direction:
//! - in-order data is delivered at once, then any buffered data it unblocks;
//! - data ahead of the expected sequence is buffered (only its new parts);
//! - data already delivered is dropped, partial overlaps keep the new suffix;
//! - a direction joined without its SYN buffers everything and starts at the
//!   lowest sequence seen once it closes, goes stale, or fills its buffer;
//! - FIN/RST close the direction after the segment's payload is handled,
//!   abandoning anything still buffered. The closed direction is remembered
//!   until the next idle sweep, so retransmissions cannot reopen it;
//! - [`ReassemblyEngine::flush_older_than`] force-closes idle directions.
//!
//! Overlapping ranges are never compared: the first bytes seen win.

mod stream;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::{debug, trace};
use serde::Serialize;

use crate::config::ReassemblyConfig;
use crate::flow::{DirectionKey, TcpSegment};

use stream::{Accepted, ReassemblyState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Fin,
    Reset,
    Idle,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First packet seen for a direction.
    Opened(DirectionKey),
    /// Contiguous bytes, in stream order. `ts` is the capture time of the
    /// segment that made them contiguous.
    Data {
        key: DirectionKey,
        ts: f64,
        bytes: Vec<u8>,
    },
    /// The stream jumped forward over `skipped` bytes that never arrived.
    Gap { key: DirectionKey, skipped: u64 },
    Closed {
        key: DirectionKey,
        reason: CloseReason,
        /// Buffered out-of-order bytes released without delivery.
        abandoned_bytes: usize,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReassemblyStats {
    pub directions_opened: u64,
    pub closed_fin: u64,
    pub closed_reset: u64,
    pub closed_idle: u64,
    pub closed_shutdown: u64,
    pub bytes_delivered: u64,
    pub bytes_abandoned: u64,
    pub bytes_skipped: u64,
    pub duplicate_segments: u64,
    /// Segments carrying new data for a direction already closed by FIN/RST.
    pub segments_after_close: u64,
    pub gaps_skipped: u64,
}

/// Where a direction ended after FIN or RST.
#[derive(Debug, Clone, Copy)]
struct ClosedDirection {
    next_seq: u32,
    closed_at: f64,
}

pub struct ReassemblyEngine {
    max_buffered_bytes: usize,
    streams: HashMap<DirectionKey, ReassemblyState>,
    closed: HashMap<DirectionKey, ClosedDirection>,
    stats: ReassemblyStats,
}

impl ReassemblyEngine {
    pub fn new(config: &ReassemblyConfig) -> Self {
        Self {
            max_buffered_bytes: config.max_buffered_bytes,
            streams: HashMap::new(),
            closed: HashMap::new(),
            stats: ReassemblyStats::default(),
        }
    }

    /// Feed one captured segment.
    ///
    /// A SYN consumes one sequence number, so its payload (if any) starts at
    /// `seq + 1`. A direction first seen without SYN holds its data until
    /// the stream start is known. Bare FIN/RST packets for directions never
    /// seen carry nothing and do not open state.
    pub fn process(&mut self, ts: f64, segment: &TcpSegment<'_>, out: &mut Vec<StreamEvent>) {
        let key = DirectionKey::of_segment(segment);
        let flags = segment.flags;
        let data_seq = if flags.syn {
            segment.seq.wrapping_add(1)
        } else {
            segment.seq
        };
        let closing = flags.fin || flags.rst;

        if self.after_close(key, flags.syn, data_seq, segment.payload) {
            trace!("{key}: segment seq {data_seq} for closed direction dropped");
        } else if self.streams.contains_key(&key) || !(closing && segment.payload.is_empty()) {
            self.accept(key, ts, flags.syn, data_seq, segment.payload, out);
            if flags.rst {
                self.close(key, CloseReason::Reset, out);
            } else if flags.fin {
                self.close(key, CloseReason::Fin, out);
            }
        } else {
            trace!("{key}: ignoring close for unknown direction");
        }

        if flags.rst {
            self.close(key.reverse(), CloseReason::Reset, out);
        }
    }

    /// Close every direction whose last activity is before `cutoff`, forget
    /// FIN/RST closes older than `cutoff`, and start delivery on directions
    /// that have waited since before `cutoff` for a SYN. Returns how many
    /// directions were closed.
    pub fn flush_older_than(&mut self, cutoff: f64, out: &mut Vec<StreamEvent>) -> usize {
        let mut idle: Vec<DirectionKey> = self
            .streams
            .iter()
            .filter(|(_, state)| state.last_activity() < cutoff)
            .map(|(key, _)| *key)
            .collect();
        idle.sort();
        for key in &idle {
            self.close(*key, CloseReason::Idle, out);
        }

        self.closed.retain(|_, closed| closed.closed_at >= cutoff);

        let mut stale: Vec<DirectionKey> = self
            .streams
            .iter()
            .filter(|(_, state)| !state.is_anchored() && state.first_seen() < cutoff)
            .map(|(key, _)| *key)
            .collect();
        stale.sort();
        for key in stale {
            if let Some(state) = self.streams.get_mut(&key) {
                debug!("{key}: no SYN seen, delivering from seq {}", state.next_seq());
                let ts = state.last_activity();
                let released = state.release();
                self.emit(key, ts, released, out);
            }
        }
        idle.len()
    }

    /// Close every remaining direction, in key order.
    pub fn close_all(&mut self, out: &mut Vec<StreamEvent>) {
        let mut keys: Vec<DirectionKey> = self.streams.keys().copied().collect();
        keys.sort();
        for key in keys {
            self.close(key, CloseReason::Shutdown, out);
        }
        self.closed.clear();
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Out-of-order bytes currently held across all directions.
    pub fn buffered_bytes(&self) -> usize {
        self.streams.values().map(|s| s.pending_bytes()).sum()
    }

    pub fn stats(&self) -> &ReassemblyStats {
        &self.stats
    }

    /// Handle a segment for a direction closed by FIN or RST. Returns `true`
    /// when the segment was consumed; a SYN starts a new connection instead.
    fn after_close(&mut self, key: DirectionKey, syn: bool, seq: u32, payload: &[u8]) -> bool {
        let Some(closed) = self.closed.get(&key).copied() else {
            return false;
        };
        if syn {
            self.closed.remove(&key);
            return false;
        }
        if payload.is_empty() {
            return true;
        }
        let end = seq.wrapping_add(payload.len() as u32);
        if end.wrapping_sub(closed.next_seq) as i32 <= 0 {
            self.stats.duplicate_segments += 1;
        } else {
            debug!("{key}: {} bytes after close dropped", payload.len());
            self.stats.segments_after_close += 1;
        }
        true
    }

    fn accept(
        &mut self,
        key: DirectionKey,
        ts: f64,
        syn: bool,
        seq: u32,
        payload: &[u8],
        out: &mut Vec<StreamEvent>,
    ) {
        let max = self.max_buffered_bytes;
        let state = match self.streams.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("{key}: stream opened at seq {seq} (syn: {syn})");
                self.stats.directions_opened += 1;
                self.closed.remove(&key);
                out.push(StreamEvent::Opened(key));
                entry.insert(if syn {
                    ReassemblyState::new(seq, ts)
                } else {
                    ReassemblyState::unanchored(seq, ts)
                })
            }
        };

        let mut accepted = if syn {
            state.anchor(seq, max)
        } else {
            Accepted::default()
        };
        let segment = state.accept(ts, seq, payload, max);
        if segment.duplicate {
            trace!("{key}: duplicate segment seq {seq} len {}", payload.len());
            self.stats.duplicate_segments += 1;
        }
        accepted.merge(segment);
        self.emit(key, ts, accepted, out);
    }

    fn emit(&mut self, key: DirectionKey, ts: f64, accepted: Accepted, out: &mut Vec<StreamEvent>) {
        if !accepted.bytes.is_empty() {
            self.stats.bytes_delivered += accepted.bytes.len() as u64;
            out.push(StreamEvent::Data {
                key,
                ts,
                bytes: accepted.bytes,
            });
        }
        if accepted.skipped > 0 {
            debug!(
                "{key}: out-of-order buffer over {} bytes, skipped {} missing bytes",
                self.max_buffered_bytes, accepted.skipped
            );
            self.stats.gaps_skipped += 1;
            self.stats.bytes_skipped += accepted.skipped;
            out.push(StreamEvent::Gap {
                key,
                skipped: accepted.skipped,
            });
        }
        if !accepted.after_gap.is_empty() {
            self.stats.bytes_delivered += accepted.after_gap.len() as u64;
            out.push(StreamEvent::Data {
                key,
                ts,
                bytes: accepted.after_gap,
            });
        }
    }

    fn close(&mut self, key: DirectionKey, reason: CloseReason, out: &mut Vec<StreamEvent>) {
        let Some(mut state) = self.streams.remove(&key) else {
            return;
        };
        let released = state.release();
        self.emit(key, state.last_activity(), released, out);

        let abandoned_bytes = state.pending_bytes();
        debug!(
            "{key}: stream closed ({reason:?}) after {} bytes, {abandoned_bytes} buffered bytes abandoned",
            state.delivered()
        );
        match reason {
            CloseReason::Fin => self.stats.closed_fin += 1,
            CloseReason::Reset => self.stats.closed_reset += 1,
            CloseReason::Idle => self.stats.closed_idle += 1,
            CloseReason::Shutdown => self.stats.closed_shutdown += 1,
        }
        if matches!(reason, CloseReason::Fin | CloseReason::Reset) {
            self.closed.insert(
                key,
                ClosedDirection {
                    next_seq: state.next_seq(),
                    closed_at: state.last_activity(),
                },
            );
        }
        self.stats.bytes_abandoned += abandoned_bytes as u64;
        out.push(StreamEvent::Closed {
            key,
            reason,
            abandoned_bytes,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use super::{CloseReason, ReassemblyEngine, StreamEvent};
    use crate::config::ReassemblyConfig;
    use crate::flow::{DirectionKey, TcpFlags, TcpSegment};

    fn client() -> SocketAddr {
        "10.0.0.1:50000".parse().unwrap()
    }

    fn server() -> SocketAddr {
        "10.0.0.2:3724".parse().unwrap()
    }

    fn engine() -> ReassemblyEngine {
        ReassemblyEngine::new(&ReassemblyConfig::default())
    }

    fn segment(seq: u32, flags: TcpFlags, payload: &[u8]) -> TcpSegment<'_> {
        TcpSegment {
            src: client(),
            dst: server(),
            seq,
            ack: 0,
            flags,
            payload,
        }
    }

    fn data(seq: u32, payload: &[u8]) -> TcpSegment<'_> {
        segment(
            seq,
            TcpFlags {
                ack: true,
                ..TcpFlags::default()
            },
            payload,
        )
    }

    fn syn(isn: u32) -> TcpSegment<'static> {
        segment(
            isn,
            TcpFlags {
                syn: true,
                ..TcpFlags::default()
            },
            &[],
        )
    }

    fn delivered(events: &[StreamEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Data { bytes, .. } => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Every ordering of `items`, via Heap's algorithm.
    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        fn heap<T: Clone>(k: usize, items: &mut Vec<T>, out: &mut Vec<Vec<T>>) {
            if k <= 1 {
                out.push(items.clone());
                return;
            }
            heap(k - 1, items, out);
            for i in 0..k - 1 {
                let j = if k % 2 == 0 { i } else { 0 };
                items.swap(j, k - 1);
                heap(k - 1, items, out);
            }
        }
        let mut out = Vec::new();
        heap(items.len(), &mut items.to_vec(), &mut out);
        out
    }

    #[test]
    fn any_permutation_reassembles_the_original_stream() {
        let original: Vec<u8> = (0u8..40).collect();
        let base = 5_000u32;
        let cuts = [(0, 7), (7, 15), (15, 16), (16, 31), (31, 40)];

        for order in permutations(&cuts) {
            // Joined mid-stream: the start is the lowest sequence seen.
            let mut mid_stream = engine();
            let mut events = Vec::new();
            for &(from, to) in &order {
                let seg = data(base + from as u32, &original[from..to]);
                mid_stream.process(0.0, &seg, &mut events);
            }
            mid_stream.close_all(&mut events);
            assert_eq!(delivered(&events), original);
            assert_eq!(mid_stream.stats().duplicate_segments, 0);
            assert_eq!(mid_stream.stats().bytes_abandoned, 0);

            // Handshake seen: delivery needs no close.
            let mut handshake = engine();
            let mut events = Vec::new();
            handshake.process(0.0, &syn(base - 1), &mut events);
            for &(from, to) in &order {
                let seg = data(base + from as u32, &original[from..to]);
                handshake.process(0.0, &seg, &mut events);
            }
            assert_eq!(delivered(&events), original);
            assert_eq!(handshake.buffered_bytes(), 0);
        }
    }

    #[test]
    fn late_head_without_syn_is_not_a_duplicate() {
        let mut engine = engine();
        let mut events = Vec::new();
        let stream: Vec<u8> = (b'a'..=b'r').collect();
        engine.process(0.0, &data(5009, &stream[9..]), &mut events);
        engine.process(0.1, &data(5000, &stream[..9]), &mut events);
        assert!(delivered(&events).is_empty());

        engine.close_all(&mut events);
        assert_eq!(delivered(&events), stream);
        assert_eq!(engine.stats().duplicate_segments, 0);
    }

    #[test]
    fn syn_after_held_data_anchors_the_stream() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(1004, b"def"), &mut events);
        engine.process(0.1, &syn(1000), &mut events);
        assert!(delivered(&events).is_empty());
        engine.process(0.2, &data(1001, b"abc"), &mut events);
        assert_eq!(delivered(&events), b"abcdef");
        assert_eq!(engine.stats().directions_opened, 1);
    }

    #[test]
    fn stale_direction_without_syn_starts_delivery_on_sweep() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(300, b"early"), &mut events);
        engine.process(50.0, &data(305, b" late"), &mut events);
        assert!(delivered(&events).is_empty());

        let closed = engine.flush_older_than(40.0, &mut events);
        assert_eq!(closed, 0);
        assert_eq!(engine.active_streams(), 1);
        assert_eq!(delivered(&events), b"early late");

        engine.process(51.0, &data(310, b"!"), &mut events);
        assert_eq!(delivered(&events), b"early late!");
    }

    #[test]
    fn duplicates_do_not_change_the_output() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(100, b"hello "), &mut events);
        engine.process(0.1, &data(100, b"hello "), &mut events);
        engine.process(0.2, &data(102, b"ll"), &mut events);
        engine.process(0.3, &data(106, b"world"), &mut events);
        engine.close_all(&mut events);
        assert_eq!(delivered(&events), b"hello world");
        assert_eq!(engine.stats().duplicate_segments, 2);
    }

    #[test]
    fn partial_overlap_contributes_only_its_suffix() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"abcd"), &mut events);
        engine.process(0.1, &data(2, b"XXef"), &mut events);
        engine.close_all(&mut events);
        assert_eq!(delivered(&events), b"abcdef");
    }

    #[test]
    fn syn_consumes_one_sequence_number() {
        let mut engine = engine();
        let mut events = Vec::new();
        let syn = TcpFlags {
            syn: true,
            ..TcpFlags::default()
        };
        engine.process(0.0, &segment(999, syn, &[]), &mut events);
        engine.process(0.1, &data(1000, b"abc"), &mut events);
        assert_eq!(delivered(&events), b"abc");
        assert!(matches!(events[0], StreamEvent::Opened(_)));
    }

    #[test]
    fn retransmitted_fin_segment_does_not_reopen_the_direction() {
        let mut engine = engine();
        let mut events = Vec::new();
        let fin = TcpFlags {
            fin: true,
            ack: true,
            ..TcpFlags::default()
        };
        engine.process(0.0, &syn(1000), &mut events);
        engine.process(0.1, &segment(1001, fin, b"0123456789"), &mut events);
        assert_eq!(engine.active_streams(), 0);

        events.clear();
        engine.process(0.3, &segment(1001, fin, b"0123456789"), &mut events);
        assert!(events.is_empty());
        assert_eq!(engine.active_streams(), 0);
        assert_eq!(engine.stats().directions_opened, 1);
        assert_eq!(engine.stats().duplicate_segments, 1);

        engine.process(0.4, &data(1011, b"late"), &mut events);
        assert!(events.is_empty());
        assert_eq!(engine.stats().segments_after_close, 1);
    }

    #[test]
    fn new_syn_or_sweep_clears_a_closed_direction() {
        let mut engine = engine();
        let mut events = Vec::new();
        let rst = TcpFlags {
            rst: true,
            ..TcpFlags::default()
        };
        engine.process(0.0, &syn(10), &mut events);
        engine.process(0.1, &data(11, b"abc"), &mut events);
        engine.process(0.2, &segment(14, rst, &[]), &mut events);

        engine.process(1.0, &syn(9000), &mut events);
        engine.process(1.1, &data(9001, b"xyz"), &mut events);
        assert_eq!(delivered(&events), b"abcxyz");
        assert_eq!(engine.stats().directions_opened, 2);

        let fin = TcpFlags {
            fin: true,
            ..TcpFlags::default()
        };
        engine.process(2.0, &segment(9004, fin, &[]), &mut events);
        engine.flush_older_than(10.0, &mut events);
        engine.process(20.0, &data(9004, b"again"), &mut events);
        assert_eq!(engine.stats().directions_opened, 3);
        assert_eq!(engine.active_streams(), 1);
    }

    #[test]
    fn fin_closes_after_its_payload_and_abandons_the_buffer() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"ab"), &mut events);
        engine.process(0.1, &data(10, b"zz"), &mut events);
        let fin = TcpFlags {
            fin: true,
            ack: true,
            ..TcpFlags::default()
        };
        engine.process(0.2, &segment(2, fin, b"cd"), &mut events);

        assert_eq!(delivered(&events), b"abcd");
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Closed {
                key: DirectionKey::new(client(), server()),
                reason: CloseReason::Fin,
                abandoned_bytes: 2,
            })
        );
        assert_eq!(engine.active_streams(), 0);
        assert_eq!(engine.stats().bytes_abandoned, 2);
    }

    #[test]
    fn rst_closes_both_directions() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"up"), &mut events);
        let reply = TcpSegment {
            src: server(),
            dst: client(),
            ..data(500, b"down")
        };
        engine.process(0.1, &reply, &mut events);
        assert_eq!(engine.active_streams(), 2);

        let rst = TcpFlags {
            rst: true,
            ..TcpFlags::default()
        };
        engine.process(0.2, &segment(2, rst, &[]), &mut events);
        assert_eq!(engine.active_streams(), 0);
        assert_eq!(engine.stats().closed_reset, 2);
    }

    #[test]
    fn bare_fin_for_unknown_direction_is_ignored() {
        let mut engine = engine();
        let mut events = Vec::new();
        let fin = TcpFlags {
            fin: true,
            ..TcpFlags::default()
        };
        engine.process(0.0, &segment(42, fin, &[]), &mut events);
        assert!(events.is_empty());
        assert_eq!(engine.active_streams(), 0);
    }

    #[test]
    fn idle_directions_are_flushed() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"old"), &mut events);
        engine.process(0.5, &data(50, b"buffered"), &mut events);
        let fresh = TcpSegment {
            src: server(),
            dst: client(),
            ..data(0, b"new")
        };
        engine.process(100.0, &fresh, &mut events);

        events.clear();
        let closed = engine.flush_older_than(40.0, &mut events);
        assert_eq!(closed, 1);
        assert_eq!(engine.active_streams(), 1);
        // Only the fresh direction's bytes, still waiting for a SYN.
        assert_eq!(engine.buffered_bytes(), 3);
        assert_eq!(delivered(&events), b"old");
        assert!(matches!(
            events[1],
            StreamEvent::Closed {
                reason: CloseReason::Idle,
                abandoned_bytes: 8,
                ..
            }
        ));
    }

    #[test]
    fn buffer_cap_emits_gap_before_data() {
        let mut engine = ReassemblyEngine::new(&ReassemblyConfig {
            max_buffered_bytes: 4,
            ..ReassemblyConfig::default()
        });
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"a"), &mut events);
        engine.process(0.1, &data(5, b"bbbbbb"), &mut events);

        let key = DirectionKey::new(client(), server());
        assert_eq!(events[2], StreamEvent::Gap { key, skipped: 4 });
        assert_eq!(
            events[3],
            StreamEvent::Data {
                key,
                ts: 0.1,
                bytes: b"bbbbbb".to_vec()
            }
        );
        assert_eq!(engine.stats().gaps_skipped, 1);
    }

    #[test]
    fn close_all_uses_shutdown_reason() {
        let mut engine = engine();
        let mut events = Vec::new();
        engine.process(0.0, &data(0, b"x"), &mut events);
        events.clear();
        engine.close_all(&mut events);
        assert_eq!(delivered(&events), b"x");
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Closed {
                reason: CloseReason::Shutdown,
                ..
            })
        ));
    }
}
