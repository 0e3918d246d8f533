//! Contracts for the external collaborators of the send loop.
//!
//! The video encoder and the raw-frame source live outside this crate.
//! The session only relies on these traits:
//!
//! - [`FrameSource`] yields raw frames.
//! - [`EncoderFactory`] builds an [`Encoder`] for a given configuration.
//!   A fresh encoder always starts with a keyframe, which is how the
//!   session forces an IDR.
//! - [`Encoder`] turns raw frames into [`NaluChunk`]s.

use std::fmt;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EncoderError;

// ── RawFrame ─────────────────────────────────────────────────────

/// One captured, uncompressed frame.
#[derive(Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub stride: u32,
    pub data: Bytes,
    pub captured_at: Instant,
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("len", &self.data.len())
            .finish()
    }
}

// ── NaluChunk ────────────────────────────────────────────────────

/// One unit of encoder output, sent as one relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaluChunk {
    pub is_keyframe: bool,
    /// Producer timestamp in microseconds. May be negative on clock skew.
    pub produced_at_us: i64,
    pub annexb_payload: Bytes,
}

// ── Encoder configuration / selection ────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

/// Which implementation the factory picked, and why.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncoderSelection {
    pub implementation: String,
    pub reason: String,
    pub gpu_vendor: Option<String>,
}

// ── Traits ───────────────────────────────────────────────────────

#[async_trait]
pub trait Encoder: Send {
    /// Encode one frame. May return zero, one, or several chunks.
    async fn encode(&mut self, frame: &RawFrame) -> Result<Vec<NaluChunk>, EncoderError>;

    /// Drain any buffered output.
    async fn flush(&mut self) -> Result<Vec<NaluChunk>, EncoderError>;

    /// Release resources. Must not fail.
    async fn close(&mut self);

    fn selection(&self) -> EncoderSelection;
}

pub trait EncoderFactory: Send {
    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn Encoder>, EncoderError>;
}

#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<RawFrame, EncoderError>;
}
