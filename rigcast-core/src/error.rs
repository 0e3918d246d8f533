//! Error types for the relay transport.
//!
//! Only hard failures are represented here. Malformed inbound data
//! (corrupt LAN datagrams, bad feedback JSON) is never an error: the
//! decoders return `Option` or a counted rejection instead.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the relay sender.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Wire / Packet Errors ─────────────────────────────────────
    /// An encode-side argument violated the wire layout.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A payload would need more chunks than the datagram header allows.
    #[error("payload needs {count} chunks (max {max})")]
    TooManyChunks { count: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The relay connection did not open before the deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The relay connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A send was attempted on a connection that is not open.
    #[error("relay connection is not open")]
    NotConnected,

    /// The relay closed the connection while the session was running.
    #[error("relay connection closed")]
    ConnectionClosed,

    /// Socket-level I/O failure (LAN transport).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // ── Session Errors ───────────────────────────────────────────
    /// The encoder collaborator failed in a way the session cannot absorb.
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),

    /// Session configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

// ── EncoderError ──────────────────────────────────────────────────

/// Failures reported by the encoder / frame-source collaborators.
///
/// Inside the send loop these are transient: the frame is skipped and
/// counted. Only a failure to create the very first encoder is fatal.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The encoder could not be constructed for the requested settings.
    #[error("encoder creation failed: {0}")]
    Create(String),

    /// A single frame failed to encode.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Draining the encoder's tail failed.
    #[error("flush failed: {0}")]
    Flush(String),

    /// The raw frame source failed to deliver a frame.
    #[error("capture failed: {0}")]
    Capture(String),
}
