//! Binary layouts carried by the host streamer.
//!
//! Two independent formats share nothing but the flag bits:
//!
//! | Module         | Layout                                               |
//! |----------------|------------------------------------------------------|
//! | `relay_frame`  | 9-byte prefix + NAL payload, one per relay message   |
//! | `datagram`     | 38-byte LAN header + chunk payload, one per datagram |
//! | `packetizer`   | Splits frames into datagrams and reassembles them    |

pub mod datagram;
pub mod packetizer;
pub mod relay_frame;

use std::fmt;

use bitflags::bitflags;
use uuid::Uuid;

use crate::error::RelayError;

pub use datagram::{LAN_HEADER_SIZE, LAN_MAGIC, LAN_VERSION, LanDatagram, LanDatagramHeader};
pub use packetizer::{DEFAULT_MAX_CHUNK_BYTES, MAX_CHUNKS, PushOutcome, ReassembledFrame, Reassembler, packetize};
pub use relay_frame::{RELAY_HEADER_SIZE, RelayWireFrame};

// ── FrameFlags ───────────────────────────────────────────────────

bitflags! {
    /// Flag byte shared by the relay frame and the LAN datagram header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FrameFlags: u8 {
        /// The payload starts a decodable GOP.
        const KEYFRAME = 0b0000_0001;
    }
}

impl FrameFlags {
    pub fn keyframe(is_keyframe: bool) -> Self {
        if is_keyframe {
            Self::KEYFRAME
        } else {
            Self::empty()
        }
    }

    pub fn is_keyframe(self) -> bool {
        self.contains(Self::KEYFRAME)
    }
}

// ── StreamId ─────────────────────────────────────────────────────

/// 16-byte stream identifier.
///
/// Rendered on the wire and in URLs as 32 lowercase hex characters
/// without hyphens.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId([u8; 16]);

impl StreamId {
    pub const LEN: usize = 16;

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Build from an untyped slice; anything but exactly 16 bytes fails.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RelayError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| RelayError::InvalidArgument("stream id must be exactly 16 bytes"))?;
        Ok(Self(arr))
    }

    /// Parse the 32-hex or hyphenated UUID form.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        Uuid::try_parse(text.trim())
            .map(|u| Self(u.into_bytes()))
            .map_err(|e| RelayError::Config(format!("invalid stream id {text:?}: {e}")))
    }

    /// A fresh random (v4) identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().into_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// 32 lowercase hex characters, no hyphens.
    pub fn to_hex(&self) -> String {
        Uuid::from_bytes(self.0).simple().to_string()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.to_hex())
    }
}

/// Case- and hyphen-insensitive form used to compare stream ids that
/// arrive as free text.
pub fn normalize_stream_id(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
