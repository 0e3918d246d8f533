//! Delta + zstd software encoder.
//!
//! Stands in for a hardware video encoder behind the same contract:
//!
//! - **Keyframe**: packed pixel rows → zstd compress.
//! - **Delta frame**: XOR against the previous frame → zstd compress.
//!
//! A keyframe is emitted on the first frame and then once per GOP
//! (two seconds of frames). The zstd level follows the configured
//! bitrate: lower bitrate, harder compression.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use rigcast_core::{Encoder, EncoderConfig, EncoderError, EncoderFactory, EncoderSelection, NaluChunk, RawFrame};
use tracing::debug;

const IMPLEMENTATION: &str = "zstd-delta";

/// zstd level for a target bitrate.
fn compression_level(bitrate_kbps: u32) -> i32 {
    match bitrate_kbps {
        0..2000 => 9,
        2000..4000 => 6,
        4000..8000 => 3,
        _ => 1,
    }
}

// ── ZstdFrameEncoder ─────────────────────────────────────────────

pub struct ZstdFrameEncoder {
    config: EncoderConfig,
    level: i32,
    gop: u64,
    epoch: Instant,
    previous: Option<Vec<u8>>,
    frame_count: u64,
}

impl ZstdFrameEncoder {
    pub fn new(config: EncoderConfig, epoch: Instant) -> Self {
        Self {
            level: compression_level(config.bitrate_kbps),
            gop: u64::from(config.fps.max(1)) * 2,
            config,
            epoch,
            previous: None,
            frame_count: 0,
        }
    }

    pub fn compression_level(&self) -> i32 {
        self.level
    }

    /// Rows packed tightly, dropping stride padding.
    fn pack(&self, frame: &RawFrame) -> Result<Vec<u8>, EncoderError> {
        let row_len = frame.width as usize * 4;
        let stride = frame.stride as usize;
        if stride < row_len || frame.data.len() < stride * frame.height as usize {
            return Err(EncoderError::Encode(format!(
                "frame buffer too small: {} bytes for {}x{} stride {}",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.stride
            )));
        }
        let mut out = Vec::with_capacity(row_len * frame.height as usize);
        for y in 0..frame.height as usize {
            let start = y * stride;
            out.extend_from_slice(&frame.data[start..start + row_len]);
        }
        Ok(out)
    }
}

#[async_trait]
impl Encoder for ZstdFrameEncoder {
    async fn encode(&mut self, frame: &RawFrame) -> Result<Vec<NaluChunk>, EncoderError> {
        if frame.width != self.config.width || frame.height != self.config.height {
            return Err(EncoderError::Encode(format!(
                "frame is {}x{}, encoder configured for {}x{}",
                frame.width, frame.height, self.config.width, self.config.height
            )));
        }

        let packed = self.pack(frame)?;
        let keyframe = self.frame_count % self.gop == 0 || self.previous.is_none();
        let raw = match (&self.previous, keyframe) {
            (Some(prev), false) => packed.iter().zip(prev).map(|(a, b)| a ^ b).collect(),
            _ => packed.clone(),
        };

        let compressed = zstd::encode_all(raw.as_slice(), self.level)
            .map_err(|e| EncoderError::Encode(format!("zstd encode failed: {e}")))?;

        self.previous = Some(packed);
        self.frame_count += 1;

        Ok(vec![NaluChunk {
            is_keyframe: keyframe,
            produced_at_us: frame.captured_at.saturating_duration_since(self.epoch).as_micros() as i64,
            annexb_payload: Bytes::from(compressed),
        }])
    }

    async fn flush(&mut self) -> Result<Vec<NaluChunk>, EncoderError> {
        // Nothing is buffered between frames.
        Ok(Vec::new())
    }

    async fn close(&mut self) {
        debug!(frames = self.frame_count, "zstd encoder closed");
        self.previous = None;
    }

    fn selection(&self) -> EncoderSelection {
        EncoderSelection {
            implementation: IMPLEMENTATION.into(),
            reason: format!("software fallback, zstd level {}", self.level),
            gpu_vendor: None,
        }
    }
}

// ── ZstdEncoderFactory ───────────────────────────────────────────

/// Builds encoders sharing one timestamp epoch, so timestamps stay
/// monotonic across reconfigurations.
pub struct ZstdEncoderFactory {
    epoch: Instant,
}

impl ZstdEncoderFactory {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for ZstdEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderFactory for ZstdEncoderFactory {
    fn create(&self, config: &EncoderConfig) -> Result<Box<dyn Encoder>, EncoderError> {
        if config.width == 0 || config.height == 0 || config.fps == 0 {
            return Err(EncoderError::Create(format!("unsupported configuration {config:?}")));
        }
        Ok(Box::new(ZstdFrameEncoder::new(*config, self.epoch)))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TestPatternSource;
    use rigcast_core::FrameSource;

    fn config(bitrate_kbps: u32) -> EncoderConfig {
        EncoderConfig {
            width: 64,
            height: 32,
            fps: 2,
            bitrate_kbps,
        }
    }

    #[tokio::test]
    async fn keyframe_then_deltas_then_keyframe() {
        let factory = ZstdEncoderFactory::new();
        let mut enc = factory.create(&config(6000)).unwrap();
        let mut src = TestPatternSource::new(64, 32);

        let mut flags = Vec::new();
        for _ in 0..6 {
            let frame = src.next_frame().await.unwrap();
            let chunks = enc.encode(&frame).await.unwrap();
            assert_eq!(chunks.len(), 1);
            flags.push(chunks[0].is_keyframe);
        }
        // GOP = 2 s at 2 fps = 4 frames.
        assert_eq!(flags, vec![true, false, false, false, true, false]);
        assert!(enc.flush().await.unwrap().is_empty());
        enc.close().await;
    }

    #[tokio::test]
    async fn keyframe_decodes_to_packed_pixels() {
        let mut enc = ZstdFrameEncoder::new(config(6000), Instant::now());
        let frame = TestPatternSource::new(64, 32).next_frame().await.unwrap();
        let chunk = enc.encode(&frame).await.unwrap().remove(0);
        let decoded = zstd::decode_all(&chunk.annexb_payload[..]).unwrap();
        assert_eq!(decoded, frame.data.to_vec());
        assert!(chunk.produced_at_us >= 0);
    }

    #[tokio::test]
    async fn delta_is_smaller_than_keyframe() {
        let mut enc = ZstdFrameEncoder::new(config(6000), Instant::now());
        let mut src = TestPatternSource::new(64, 32);
        let key = enc.encode(&src.next_frame().await.unwrap()).await.unwrap().remove(0);
        let delta = enc.encode(&src.next_frame().await.unwrap()).await.unwrap().remove(0);
        assert!(!delta.is_keyframe);
        assert!(delta.annexb_payload.len() < key.annexb_payload.len());
    }

    #[tokio::test]
    async fn geometry_mismatch_fails_encode() {
        let mut enc = ZstdFrameEncoder::new(config(6000), Instant::now());
        let frame = TestPatternSource::new(32, 32).next_frame().await.unwrap();
        assert!(matches!(enc.encode(&frame).await, Err(EncoderError::Encode(_))));
    }

    #[test]
    fn level_follows_bitrate() {
        assert_eq!(compression_level(1200), 9);
        assert_eq!(compression_level(3000), 6);
        assert_eq!(compression_level(6000), 3);
        assert_eq!(compression_level(20_000), 1);

        let enc = ZstdFrameEncoder::new(config(1200), Instant::now());
        assert_eq!(enc.compression_level(), 9);
        assert!(enc.selection().reason.contains("level 9"));
    }

    #[test]
    fn factory_rejects_empty_geometry() {
        let factory = ZstdEncoderFactory::new();
        let bad = EncoderConfig { width: 0, ..config(6000) };
        assert!(matches!(factory.create(&bad), Err(EncoderError::Create(_))));
    }
}
