//! Relay frame layout.
//!
//! ```text
//! flags:          u8   (1)   bit 0 = keyframe
//! produced_at_us: u64  (8)   big-endian, clamped to >= 0
//! payload:        [u8]       raw Annex-B NAL data
//! ```
//!
//! There is no length field: one relay message carries exactly one frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::FrameFlags;

/// Size of the prefix preceding the NAL payload.
pub const RELAY_HEADER_SIZE: usize = 9;

/// One encoded chunk as carried over the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayWireFrame {
    pub is_keyframe: bool,
    pub produced_at_us: u64,
    pub payload: Bytes,
}

impl RelayWireFrame {
    /// Negative producer timestamps are clamped to zero.
    pub fn new(is_keyframe: bool, produced_at_us: i64, payload: Bytes) -> Self {
        Self {
            is_keyframe,
            produced_at_us: produced_at_us.max(0) as u64,
            payload,
        }
    }

    pub fn encoded_len(&self) -> usize {
        RELAY_HEADER_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(FrameFlags::keyframe(self.is_keyframe).bits());
        buf.put_u64(self.produced_at_us);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse one relay message. Anything shorter than the prefix is not a frame.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < RELAY_HEADER_SIZE {
            return None;
        }
        let mut cur = data;
        let flags = FrameFlags::from_bits_retain(cur.get_u8());
        let produced_at_us = cur.get_u64();
        Some(Self {
            is_keyframe: flags.is_keyframe(),
            produced_at_us,
            payload: Bytes::copy_from_slice(cur),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_flags_then_big_endian_timestamp() {
        let frame = RelayWireFrame::new(true, 0x0102_0304_0506_0708, Bytes::from_static(b"\x00\x00\x00\x01\x65"));
        let bytes = frame.encode();

        assert_eq!(bytes.len(), RELAY_HEADER_SIZE + 5);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[9..], b"\x00\x00\x00\x01\x65");
    }

    #[test]
    fn negative_timestamp_clamps_to_zero() {
        let frame = RelayWireFrame::new(false, -42, Bytes::new());
        let bytes = frame.encode();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..9], &[0u8; 8]);
    }

    #[test]
    fn decode_reads_back_fields() {
        let frame = RelayWireFrame::new(false, 1_700_000_000_000_000, Bytes::from_static(b"nal"));
        let decoded = RelayWireFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn decode_short_buffer_is_none() {
        assert!(RelayWireFrame::decode(&[1, 2, 3]).is_none());
    }
}
