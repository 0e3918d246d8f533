//! Chunking of encoded frames into LAN datagrams, and the matching
//! receive-side reassembly.
//!
//! A frame of `n` bytes becomes `ceil(n / max_chunk_bytes)` datagrams
//! (one empty datagram when `n == 0`) that share `seq` and
//! `timestamp_us` and carry contiguous slices in order.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};

use super::datagram::{LanDatagram, LanDatagramHeader, MAX_DATAGRAM_PAYLOAD};
use super::{FrameFlags, StreamId};
use crate::error::RelayError;

// ── Constants ────────────────────────────────────────────────────

/// Keeps each datagram well under a 1500-byte Ethernet MTU.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 1100;

/// Upper bound on datagrams per frame.
pub const MAX_CHUNKS: usize = 4096;

/// Incomplete frames kept by a [`Reassembler`] before the oldest is dropped.
pub const MAX_PENDING_FRAMES: usize = 64;

// ── Packetize ────────────────────────────────────────────────────

/// Split `payload` into datagrams of at most `max_chunk_bytes` payload bytes.
pub fn packetize(
    stream_id: StreamId,
    seq: u32,
    timestamp_us: u64,
    flags: FrameFlags,
    payload: &Bytes,
    max_chunk_bytes: usize,
) -> Result<Vec<LanDatagram>, RelayError> {
    if max_chunk_bytes == 0 || max_chunk_bytes > MAX_DATAGRAM_PAYLOAD {
        return Err(RelayError::InvalidArgument("max_chunk_bytes must be in 1..=65535"));
    }

    let count = payload.len().div_ceil(max_chunk_bytes).max(1);
    if count > MAX_CHUNKS {
        return Err(RelayError::TooManyChunks {
            count,
            max: MAX_CHUNKS,
        });
    }

    let header = |chunk_index: usize| LanDatagramHeader {
        stream_id,
        seq,
        timestamp_us,
        flags,
        chunk_index: chunk_index as u16,
        total_chunks: count as u16,
    };

    if payload.is_empty() {
        return Ok(vec![LanDatagram::new(header(0), Bytes::new())]);
    }

    let datagrams = (0..count)
        .map(|idx| {
            let start = idx * max_chunk_bytes;
            let end = (start + max_chunk_bytes).min(payload.len());
            LanDatagram::new(header(idx), payload.slice(start..end))
        })
        .collect();
    Ok(datagrams)
}

// ── Reassembly ───────────────────────────────────────────────────

/// A frame whose every chunk has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame {
    pub stream_id: StreamId,
    pub seq: u32,
    pub timestamp_us: u64,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

/// Result of feeding one datagram to a [`Reassembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored; the frame still has missing chunks.
    Incomplete,
    /// This datagram completed its frame.
    Complete(ReassembledFrame),
    /// The chunk index was already received for this frame.
    Duplicate,
    /// The chunk index is outside `[0, total_chunks)` for this frame.
    OutOfRange,
    /// `total_chunks` disagrees with earlier chunks of the same frame.
    Inconsistent,
}

type FrameKey = (StreamId, u32);

struct PartialFrame {
    total_chunks: u16,
    timestamp_us: u64,
    flags: FrameFlags,
    chunks: Vec<Option<Bytes>>,
    received: usize,
}

impl PartialFrame {
    fn new(header: &LanDatagramHeader) -> Self {
        Self {
            total_chunks: header.total_chunks,
            timestamp_us: header.timestamp_us,
            flags: header.flags,
            chunks: vec![None; header.total_chunks as usize],
            received: 0,
        }
    }

    fn concat(self) -> Bytes {
        let len = self.chunks.iter().flatten().map(Bytes::len).sum();
        let mut out = BytesMut::with_capacity(len);
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// Groups datagrams by `(stream_id, seq)` until each frame is complete.
///
/// Memory is bounded: beyond [`MAX_PENDING_FRAMES`] incomplete frames the
/// oldest one is abandoned. The same number of recently completed keys is
/// remembered so late copies of a delivered frame are rejected.
pub struct Reassembler {
    pending: HashMap<FrameKey, PartialFrame>,
    /// Insertion order of `pending` keys, oldest first.
    order: VecDeque<FrameKey>,
    /// Recently completed keys, oldest first.
    completed: VecDeque<FrameKey>,
    max_pending: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_capacity(MAX_PENDING_FRAMES)
    }

    pub fn with_capacity(max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            completed: VecDeque::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Number of frames waiting for chunks.
    pub fn pending_frames(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, datagram: LanDatagram) -> PushOutcome {
        let h = datagram.header;
        if h.total_chunks == 0 || h.chunk_index >= h.total_chunks {
            return PushOutcome::OutOfRange;
        }

        let key = (h.stream_id, h.seq);
        if self.completed.contains(&key) {
            return PushOutcome::Duplicate;
        }
        if !self.pending.contains_key(&key) {
            self.evict_if_full();
            self.pending.insert(key, PartialFrame::new(&h));
            self.order.push_back(key);
        }
        let Some(partial) = self.pending.get_mut(&key) else {
            return PushOutcome::Incomplete;
        };

        if partial.total_chunks != h.total_chunks {
            return PushOutcome::Inconsistent;
        }
        let slot = &mut partial.chunks[h.chunk_index as usize];
        if slot.is_some() {
            return PushOutcome::Duplicate;
        }
        *slot = Some(datagram.payload);
        partial.received += 1;
        partial.flags |= h.flags;

        if partial.received < partial.total_chunks as usize {
            return PushOutcome::Incomplete;
        }

        self.order.retain(|k| *k != key);
        self.remember_completed(key);
        match self.pending.remove(&key) {
            Some(done) => PushOutcome::Complete(ReassembledFrame {
                stream_id: h.stream_id,
                seq: h.seq,
                timestamp_us: done.timestamp_us,
                flags: done.flags,
                payload: done.concat(),
            }),
            None => PushOutcome::Incomplete,
        }
    }

    fn remember_completed(&mut self, key: FrameKey) {
        if self.completed.len() >= self.max_pending {
            self.completed.pop_front();
        }
        self.completed.push_back(key);
    }

    fn evict_if_full(&mut self) {
        while self.pending.len() >= self.max_pending {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.pending.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SID: StreamId = StreamId::from_bytes([0x11; 16]);

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn empty_payload_yields_single_empty_datagram() {
        let dgs = packetize(SID, 5, 99, FrameFlags::empty(), &Bytes::new(), 1100).unwrap();
        assert_eq!(dgs.len(), 1);
        assert_eq!(dgs[0].header.chunk_index, 0);
        assert_eq!(dgs[0].header.total_chunks, 1);
        assert!(dgs[0].payload.is_empty());
    }

    #[test]
    fn chunk_count_and_shared_fields() {
        for len in [1usize, 1099, 1100, 1101, 5000, 11_000] {
            let payload = pattern(len);
            let dgs = packetize(SID, 42, 7777, FrameFlags::KEYFRAME, &payload, 1100).unwrap();
            assert_eq!(dgs.len(), len.div_ceil(1100), "len = {len}");

            let mut joined = Vec::new();
            for (i, dg) in dgs.iter().enumerate() {
                assert_eq!(dg.header.chunk_index as usize, i);
                assert_eq!(dg.header.total_chunks as usize, dgs.len());
                assert_eq!(dg.header.seq, 42);
                assert_eq!(dg.header.timestamp_us, 7777);
                assert!(dg.payload.len() <= 1100);
                joined.extend_from_slice(&dg.payload);
            }
            assert_eq!(joined, payload.to_vec());
        }
    }

    #[test]
    fn rejects_pathological_frame_size() {
        let payload = Bytes::from(vec![0u8; 4097]);
        let err = packetize(SID, 0, 0, FrameFlags::empty(), &payload, 1).unwrap_err();
        assert!(matches!(err, RelayError::TooManyChunks { count: 4097, max: 4096 }));

        let payload = Bytes::from(vec![0u8; 4096]);
        assert_eq!(packetize(SID, 0, 0, FrameFlags::empty(), &payload, 1).unwrap().len(), 4096);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(packetize(SID, 0, 0, FrameFlags::empty(), &pattern(10), 0).is_err());
    }

    #[test]
    fn reassembles_out_of_order() {
        let payload = pattern(3500);
        let mut dgs = packetize(SID, 9, 1234, FrameFlags::KEYFRAME, &payload, 1000).unwrap();
        dgs.reverse();

        let mut r = Reassembler::new();
        let last = dgs.pop().unwrap();
        for dg in dgs {
            assert_eq!(r.push(dg), PushOutcome::Incomplete);
        }
        match r.push(last) {
            PushOutcome::Complete(frame) => {
                assert_eq!(frame.seq, 9);
                assert_eq!(frame.timestamp_us, 1234);
                assert!(frame.flags.is_keyframe());
                assert_eq!(frame.payload, payload);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(r.pending_frames(), 0);
    }

    #[test]
    fn rejects_duplicates_and_out_of_range() {
        let dgs = packetize(SID, 1, 0, FrameFlags::empty(), &pattern(2500), 1000).unwrap();
        let mut r = Reassembler::new();
        assert_eq!(r.push(dgs[0].clone()), PushOutcome::Incomplete);
        assert_eq!(r.push(dgs[0].clone()), PushOutcome::Duplicate);

        let mut bogus = dgs[1].clone();
        bogus.header.chunk_index = 3;
        assert_eq!(r.push(bogus), PushOutcome::OutOfRange);

        let mut inconsistent = dgs[1].clone();
        inconsistent.header.total_chunks = 5;
        assert_eq!(r.push(inconsistent), PushOutcome::Inconsistent);
    }

    #[test]
    fn late_copy_of_completed_frame_is_duplicate() {
        let dgs = packetize(SID, 7, 0, FrameFlags::empty(), &Bytes::from_static(b"small"), 1100).unwrap();
        assert_eq!(dgs.len(), 1);

        let mut r = Reassembler::new();
        assert!(matches!(r.push(dgs[0].clone()), PushOutcome::Complete(f) if f.payload == b"small"[..]));
        assert_eq!(r.push(dgs[0].clone()), PushOutcome::Duplicate);
        assert_eq!(r.pending_frames(), 0);

        // Multi-chunk frame: any chunk arriving after completion is a duplicate.
        let dgs = packetize(SID, 8, 0, FrameFlags::empty(), &pattern(2500), 1000).unwrap();
        for dg in &dgs[..2] {
            assert_eq!(r.push(dg.clone()), PushOutcome::Incomplete);
        }
        assert!(matches!(r.push(dgs[2].clone()), PushOutcome::Complete(_)));
        assert_eq!(r.push(dgs[1].clone()), PushOutcome::Duplicate);
        assert_eq!(r.pending_frames(), 0);
    }

    #[test]
    fn completed_keys_are_bounded() {
        let mut r = Reassembler::with_capacity(2);
        for seq in 0..3u32 {
            let dgs = packetize(SID, seq, 0, FrameFlags::empty(), &pattern(10), 100).unwrap();
            assert!(matches!(r.push(dgs[0].clone()), PushOutcome::Complete(_)));
        }
        // seq 0 has aged out of the window; seq 2 is still remembered.
        let old = packetize(SID, 0, 0, FrameFlags::empty(), &pattern(10), 100).unwrap();
        assert!(matches!(r.push(old[0].clone()), PushOutcome::Complete(_)));
        let recent = packetize(SID, 2, 0, FrameFlags::empty(), &pattern(10), 100).unwrap();
        assert_eq!(r.push(recent[0].clone()), PushOutcome::Duplicate);
    }

    #[test]
    fn frames_with_different_seq_do_not_mix() {
        let a = packetize(SID, 1, 0, FrameFlags::empty(), &pattern(2000), 1000).unwrap();
        let b = packetize(SID, 2, 0, FrameFlags::empty(), &Bytes::from(vec![0xEE; 2000]), 1000).unwrap();
        let mut r = Reassembler::new();
        assert_eq!(r.push(a[0].clone()), PushOutcome::Incomplete);
        assert_eq!(r.push(b[0].clone()), PushOutcome::Incomplete);
        assert!(matches!(r.push(b[1].clone()), PushOutcome::Complete(f) if f.seq == 2 && f.payload.iter().all(|&x| x == 0xEE)));
        assert_eq!(r.pending_frames(), 1);
    }

    #[test]
    fn evicts_oldest_incomplete_frame() {
        let mut r = Reassembler::with_capacity(2);
        for seq in 0..3u32 {
            let dgs = packetize(SID, seq, 0, FrameFlags::empty(), &pattern(200), 100).unwrap();
            r.push(dgs[0].clone());
        }
        assert_eq!(r.pending_frames(), 2);

        // seq 0 was evicted: its second chunk starts a fresh incomplete group.
        let dgs = packetize(SID, 0, 0, FrameFlags::empty(), &pattern(200), 100).unwrap();
        assert_eq!(r.push(dgs[1].clone()), PushOutcome::Incomplete);
    }
}
