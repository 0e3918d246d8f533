//! LAN datagram layout (direct, non-relay transport).
//!
//! Fixed 38-byte big-endian header followed by the chunk payload:
//!
//! ```text
//! magic:          u16  (2)   0x4F44
//! version:        u8   (1)   1
//! flags:          u8   (1)   bit 0 = keyframe
//! stream_id:      [u8] (16)
//! seq:            u32  (4)
//! timestamp_us:   u64  (8)
//! chunk_index:    u16  (2)
//! total_chunks:   u16  (2)
//! payload_len:    u16  (2)
//! payload:        [u8] (payload_len)
//! ```
//!
//! Decoding never fails loudly: datagrams arrive truncated or corrupted
//! over UDP, so anything that is not a well-formed packet of this
//! protocol decodes to `None` and is dropped by the receiver.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{FrameFlags, StreamId};
use crate::error::RelayError;

// ── Constants ────────────────────────────────────────────────────

pub const LAN_MAGIC: u16 = 0x4F44;
pub const LAN_VERSION: u8 = 1;
pub const LAN_HEADER_SIZE: usize = 38;

/// Largest payload the 16-bit length field can describe.
pub const MAX_DATAGRAM_PAYLOAD: usize = u16::MAX as usize;

/// Receivers refuse frames split into more chunks than this.
pub const MAX_DECODE_CHUNKS: u16 = 4096;

// ── LanDatagramHeader ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanDatagramHeader {
    pub stream_id: StreamId,
    pub seq: u32,
    pub timestamp_us: u64,
    pub flags: FrameFlags,
    pub chunk_index: u16,
    pub total_chunks: u16,
}

impl LanDatagramHeader {
    /// Build a header from untyped, wider-than-wire values, rejecting
    /// anything the fixed layout cannot carry.
    pub fn from_raw(
        stream_id: &[u8],
        seq: u64,
        timestamp_us: u64,
        flags: u8,
        chunk_index: u32,
        total_chunks: u32,
    ) -> Result<Self, RelayError> {
        let stream_id = StreamId::from_slice(stream_id)?;
        let seq = u32::try_from(seq).map_err(|_| RelayError::InvalidArgument("seq exceeds u32"))?;
        let total_chunks = u16::try_from(total_chunks)
            .map_err(|_| RelayError::InvalidArgument("total_chunks exceeds u16"))?;
        if total_chunks == 0 {
            return Err(RelayError::InvalidArgument("total_chunks must be >= 1"));
        }
        if chunk_index >= total_chunks as u32 {
            return Err(RelayError::InvalidArgument("chunk_index must be < total_chunks"));
        }
        Ok(Self {
            stream_id,
            seq,
            timestamp_us,
            flags: FrameFlags::from_bits_retain(flags),
            chunk_index: chunk_index as u16,
            total_chunks,
        })
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.total_chunks == 0 {
            return Err(RelayError::InvalidArgument("total_chunks must be >= 1"));
        }
        if self.chunk_index >= self.total_chunks {
            return Err(RelayError::InvalidArgument("chunk_index must be < total_chunks"));
        }
        Ok(())
    }
}

// ── LanDatagram ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanDatagram {
    pub header: LanDatagramHeader,
    pub payload: Bytes,
}

impl LanDatagram {
    pub fn new(header: LanDatagramHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn encoded_len(&self) -> usize {
        LAN_HEADER_SIZE + self.payload.len()
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Result<Bytes, RelayError> {
        self.header.validate()?;
        if self.payload.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(RelayError::InvalidArgument("payload exceeds 65535 bytes"));
        }

        let h = &self.header;
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16(LAN_MAGIC);
        buf.put_u8(LAN_VERSION);
        buf.put_u8(h.flags.bits());
        buf.put_slice(h.stream_id.as_bytes());
        buf.put_u32(h.seq);
        buf.put_u64(h.timestamp_us);
        buf.put_u16(h.chunk_index);
        buf.put_u16(h.total_chunks);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse one datagram, or `None` if it is not a valid packet of this
    /// protocol.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < LAN_HEADER_SIZE {
            return None;
        }
        let mut cur = data;
        if cur.get_u16() != LAN_MAGIC || cur.get_u8() != LAN_VERSION {
            return None;
        }
        let flags = FrameFlags::from_bits_retain(cur.get_u8());
        let mut stream_id = [0u8; 16];
        cur.copy_to_slice(&mut stream_id);
        let seq = cur.get_u32();
        let timestamp_us = cur.get_u64();
        let chunk_index = cur.get_u16();
        let total_chunks = cur.get_u16();
        let payload_len = cur.get_u16() as usize;

        if LAN_HEADER_SIZE + payload_len != data.len() {
            return None;
        }
        if total_chunks == 0 || total_chunks > MAX_DECODE_CHUNKS || chunk_index >= total_chunks {
            return None;
        }

        Some(Self {
            header: LanDatagramHeader {
                stream_id: StreamId::from_bytes(stream_id),
                seq,
                timestamp_us,
                flags,
                chunk_index,
                total_chunks,
            },
            payload: Bytes::copy_from_slice(cur),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
