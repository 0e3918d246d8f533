//! # rigcast-core
//!
//! Video relay transport for the rigcast host streamer.
//!
//! This crate contains:
//! - **Wire**: `RelayWireFrame` (9-byte relay prefix), `LanDatagram` (38-byte LAN header), `packetize` / `Reassembler`
//! - **Pacer**: `BytePacer`, a leaky-bucket byte-rate limiter
//! - **Control**: `FeedbackChannel` (validated viewer feedback) and `BitrateController`
//! - **Stats**: `StatsAggregator` counters and derived rates for telemetry
//! - **Transport**: `RelayTransportClient` (WebSocket relay) and `LanSender` / `LanReceiver` (UDP)
//! - **Session**: `SessionRunner`, the per-session capture → encode → send loop
//! - **Error**: `RelayError` / `EncoderError`: typed, `thiserror`-based error hierarchy

pub mod control;
pub mod encoder;
pub mod error;
pub mod pacer;
pub mod session;
pub mod stats;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use control::{
    BitrateController, BitratePolicy, ControlDecision, EncoderControlState, FeedbackChannel, FeedbackKind,
    FeedbackMessage, FeedbackRejection, Severity,
};
pub use encoder::{Encoder, EncoderConfig, EncoderFactory, EncoderSelection, FrameSource, NaluChunk, RawFrame};
pub use error::{EncoderError, RelayError};
pub use pacer::BytePacer;
pub use session::{SessionConfig, SessionRunner};
pub use stats::{SenderStats, StatsAggregator, StatsSnapshot};
pub use transport::{InboundText, LanReceiver, LanSender, RelayTransportClient, relay_connect_url};
pub use wire::{
    FrameFlags, LAN_HEADER_SIZE, LanDatagram, LanDatagramHeader, PushOutcome, RELAY_HEADER_SIZE, ReassembledFrame,
    Reassembler, RelayWireFrame, StreamId, packetize,
};
