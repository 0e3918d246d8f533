//! Synthetic frame source.
//!
//! Produces BGRA frames with a diagonal gradient and a bar that sweeps
//! one column per frame, so consecutive frames differ in a small,
//! predictable region.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use rigcast_core::{EncoderError, FrameSource, RawFrame};

const BYTES_PER_PIXEL: u32 = 4;
const BAR_WIDTH: u32 = 8;

pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_number: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_number: 0,
        }
    }

    pub fn frames_produced(&self) -> u64 {
        self.frame_number
    }

    fn render(&self) -> Vec<u8> {
        let stride = (self.width * BYTES_PER_PIXEL) as usize;
        let mut data = vec![0u8; stride * self.height as usize];
        let bar_x = (self.frame_number % self.width.max(1) as u64) as u32;

        for y in 0..self.height {
            let row = &mut data[y as usize * stride..(y as usize + 1) * stride];
            for x in 0..self.width {
                let px = &mut row[(x * BYTES_PER_PIXEL) as usize..((x + 1) * BYTES_PER_PIXEL) as usize];
                let in_bar = x >= bar_x && x < bar_x + BAR_WIDTH;
                if in_bar {
                    px.copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
                } else {
                    let g = ((x + y) & 0xFF) as u8;
                    px.copy_from_slice(&[g, g / 2, 0x40, 0xFF]);
                }
            }
        }
        data
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    async fn next_frame(&mut self) -> Result<RawFrame, EncoderError> {
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::Capture("empty capture geometry".into()));
        }
        let data = self.render();
        self.frame_number += 1;
        Ok(RawFrame {
            width: self.width,
            height: self.height,
            stride: self.width * BYTES_PER_PIXEL,
            data: Bytes::from(data),
            captured_at: Instant::now(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_have_declared_geometry() {
        let mut src = TestPatternSource::new(64, 32);
        let frame = src.next_frame().await.unwrap();
        assert_eq!(frame.stride, 256);
        assert_eq!(frame.data.len(), 256 * 32);
        assert_eq!(src.frames_produced(), 1);
    }

    #[tokio::test]
    async fn consecutive_frames_differ() {
        let mut src = TestPatternSource::new(64, 32);
        let a = src.next_frame().await.unwrap();
        let b = src.next_frame().await.unwrap();
        assert_ne!(a.data, b.data);
    }

    #[tokio::test]
    async fn zero_geometry_is_a_capture_error() {
        let mut src = TestPatternSource::new(0, 10);
        assert!(matches!(src.next_frame().await, Err(EncoderError::Capture(_))));
    }
}
