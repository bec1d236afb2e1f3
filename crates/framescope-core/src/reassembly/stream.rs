use std::collections::BTreeMap;

/// What one segment did to a direction's byte stream.
///
/// In stream order: `bytes`, then `skipped` missing bytes, then `after_gap`.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Accepted {
    /// Newly contiguous bytes delivered before any skip.
    pub bytes: Vec<u8>,
    /// Bytes jumped over because the out-of-order buffer hit its cap.
    pub skipped: u64,
    /// Bytes delivered after the skip.
    pub after_gap: Vec<u8>,
    /// Segment carried nothing that was not already delivered or buffered.
    pub duplicate: bool,
}

impl Accepted {
    pub fn merge(&mut self, other: Accepted) {
        if self.skipped == 0 {
            self.bytes.extend(other.bytes);
        } else {
            self.after_gap.extend(other.bytes);
        }
        self.after_gap.extend(other.after_gap);
        self.skipped += other.skipped;
    }
}

/// Sequence tracking for one direction.
///
/// Buffered segments are keyed by stream offset (bytes since the first
/// expected sequence number), so ordering survives 32-bit wraparound.
/// Buffered ranges never overlap each other.
///
/// A direction first seen without a SYN is unanchored: nothing is delivered
/// yet, every segment is buffered, and the stream start follows the lowest
/// sequence number observed. [`anchor`](Self::anchor) (on SYN) or
/// [`release`](Self::release) (on close, on the idle threshold, or when the
/// buffer cap is hit) fixes the start and begins delivery.
#[derive(Debug)]
pub(crate) struct ReassemblyState {
    next_seq: u32,
    next_offset: u64,
    anchored: bool,
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    first_seen: f64,
    last_activity: f64,
}

impl ReassemblyState {
    /// Direction whose first expected byte is known (seen its SYN).
    pub fn new(initial_seq: u32, ts: f64) -> Self {
        Self {
            next_seq: initial_seq,
            next_offset: 0,
            anchored: true,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            first_seen: ts,
            last_activity: ts,
        }
    }

    /// Direction joined mid-stream, first segment at `first_seq`.
    pub fn unanchored(first_seq: u32, ts: f64) -> Self {
        Self {
            anchored: false,
            ..Self::new(first_seq, ts)
        }
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn first_seen(&self) -> f64 {
        self.first_seen
    }

    pub fn last_activity(&self) -> f64 {
        self.last_activity
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Bytes delivered so far.
    pub fn delivered(&self) -> u64 {
        self.next_offset
    }

    /// Sequence number of the next byte to deliver.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn accept(
        &mut self,
        ts: f64,
        seq: u32,
        payload: &[u8],
        max_buffered_bytes: usize,
    ) -> Accepted {
        self.last_activity = self.last_activity.max(ts);
        let mut accepted = Accepted::default();
        if payload.is_empty() {
            return accepted;
        }
        if !self.anchored {
            return self.hold(seq, payload, max_buffered_bytes);
        }

        // Signed distance from the next expected byte, modulo 2^32.
        let relative = seq.wrapping_sub(self.next_seq) as i32 as i64;
        let start = self.next_offset as i64 + relative;
        let end = start + payload.len() as i64;
        let expected = self.next_offset as i64;

        if end <= expected {
            accepted.duplicate = true;
            return accepted;
        }

        if start <= expected {
            let skip = (expected - start) as usize;
            self.deliver(&payload[skip..], &mut accepted.bytes);
            self.drain(&mut accepted.bytes);
            return accepted;
        }

        let inserted = self.insert(start as u64, payload);
        accepted.duplicate = inserted == 0;
        self.enforce_cap(max_buffered_bytes, &mut accepted);
        accepted
    }

    /// Fix the stream start at `seq` (the byte after a SYN). Data held
    /// before the start is dropped; what follows it is delivered or kept.
    /// No-op on a direction that is already anchored.
    pub fn anchor(&mut self, seq: u32, max_buffered_bytes: usize) -> Accepted {
        let mut accepted = Accepted::default();
        if self.anchored {
            return accepted;
        }
        let held = std::mem::take(&mut self.pending);
        let base = self.next_seq;
        self.pending_bytes = 0;
        self.next_seq = seq;
        self.next_offset = 0;
        self.anchored = true;
        for (offset, bytes) in held {
            let piece_seq = base.wrapping_add(offset as u32);
            let ts = self.last_activity;
            accepted.merge(self.accept(ts, piece_seq, &bytes, max_buffered_bytes));
        }
        accepted
    }

    /// Start delivery at the lowest held byte. No-op once anchored.
    pub fn release(&mut self) -> Accepted {
        let mut accepted = Accepted::default();
        if !self.anchored {
            self.anchored = true;
            self.drain(&mut accepted.bytes);
        }
        accepted
    }

    /// Buffer a segment while the stream start is unknown.
    fn hold(&mut self, seq: u32, payload: &[u8], max_buffered_bytes: usize) -> Accepted {
        let mut accepted = Accepted::default();
        let relative = seq.wrapping_sub(self.next_seq) as i32 as i64;
        if relative < 0 {
            self.rebase(relative.unsigned_abs());
            self.next_seq = seq;
        }
        let start = seq.wrapping_sub(self.next_seq) as u64;
        accepted.duplicate = self.insert(start, payload) == 0;
        if self.pending_bytes > max_buffered_bytes {
            accepted.merge(self.release());
            self.enforce_cap(max_buffered_bytes, &mut accepted);
        }
        accepted
    }

    /// Shift every held offset up by `by`, for a new lowest sequence number.
    fn rebase(&mut self, by: u64) {
        let held = std::mem::take(&mut self.pending);
        self.pending = held
            .into_iter()
            .map(|(offset, bytes)| (offset + by, bytes))
            .collect();
    }

    /// Skip missing ranges until the buffer fits under the cap.
    fn enforce_cap(&mut self, max_buffered_bytes: usize, accepted: &mut Accepted) {
        while self.pending_bytes > max_buffered_bytes {
            let Some((&first, _)) = self.pending.first_key_value() else {
                break;
            };
            let gap = first - self.next_offset;
            self.next_offset = first;
            self.next_seq = self.next_seq.wrapping_add(gap as u32);
            accepted.skipped += gap;
            self.drain(&mut accepted.after_gap);
        }
    }

    fn deliver(&mut self, bytes: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(bytes);
        self.next_offset += bytes.len() as u64;
        self.next_seq = self.next_seq.wrapping_add(bytes.len() as u32);
    }

    /// Move every buffered segment that became contiguous into `out`.
    fn drain(&mut self, out: &mut Vec<u8>) {
        while let Some(entry) = self.pending.first_entry() {
            let offset = *entry.key();
            if offset > self.next_offset {
                break;
            }
            let bytes = entry.remove();
            self.pending_bytes -= bytes.len();
            let end = offset + bytes.len() as u64;
            if end > self.next_offset {
                let skip = (self.next_offset - offset) as usize;
                self.deliver(&bytes[skip..], out);
            }
        }
    }

    /// Buffer the parts of `[start, start + len)` not already buffered.
    /// Returns the number of bytes actually added.
    fn insert(&mut self, start: u64, payload: &[u8]) -> usize {
        let end = start + payload.len() as u64;
        let mut cursor = start;

        if let Some((&offset, bytes)) = self.pending.range(..=start).next_back() {
            cursor = cursor.max(offset + bytes.len() as u64);
        }

        if cursor >= end {
            return 0;
        }

        let mut pieces = Vec::new();
        for (&offset, bytes) in self.pending.range(cursor..end) {
            if offset > cursor {
                pieces.push((cursor, offset));
            }
            cursor = cursor.max(offset + bytes.len() as u64);
        }
        if cursor < end {
            pieces.push((cursor, end));
        }

        let mut added = 0;
        for (from, to) in pieces {
            let slice = &payload[(from - start) as usize..(to - start) as usize];
            added += slice.len();
            self.pending.insert(from, slice.to_vec());
        }
        self.pending_bytes += added;
        added
    }
}
