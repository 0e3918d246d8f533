//! # rigcast-host: Host Streamer
//!
//! Process that streams one rental session's desktop to the relay.
//! Frames come from a [`FrameSource`](rigcast_core::FrameSource), are
//! encoded by an [`Encoder`](rigcast_core::Encoder) and sent by
//! [`SessionRunner`](rigcast_core::SessionRunner).
//!
//! The capture and encoder implementations shipped here are stand-ins:
//! a synthetic test pattern and a delta + zstd encoder. Real capture and
//! hardware encoders plug in through the same traits.

pub mod config;
pub mod encoder;
pub mod source;
