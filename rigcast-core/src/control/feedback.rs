//! Inbound feedback from viewers.
//!
//! Feedback arrives as JSON text frames on the relay connection:
//!
//! ```json
//! { "type": "network_report", "token": "…", "sessionId": "…", "streamId": "…",
//!   "lossPct": 9.5, "jitterMs": 12, "requestedBitrateKbps": 3000 }
//! ```
//!
//! Decoding is two-step: the text must be a JSON object no larger than
//! [`MAX_FEEDBACK_BYTES`] with a known `type` tag, then every optional
//! field is coerced on its own (numbers may arrive as strings, values
//! are clamped). A structurally valid message must still pass the
//! identity checks of [`FeedbackChannel::accept`]. Every failure is a
//! [`FeedbackRejection`] that the caller counts; none of them is fatal.

use std::fmt;
use std::time::SystemTime;

use serde::Deserialize;
use serde_json::Value;

use crate::wire::{StreamId, normalize_stream_id};

/// Larger inbound texts are dropped unparsed.
pub const MAX_FEEDBACK_BYTES: usize = 4096;

// ── FeedbackKind ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackKind {
    KeyframeRequest,
    NetworkReport,
    Reconnect,
}

impl FeedbackKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "keyframe_request" => Some(Self::KeyframeRequest),
            "network_report" => Some(Self::NetworkReport),
            "reconnect" => Some(Self::Reconnect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyframeRequest => "keyframe_request",
            Self::NetworkReport => "network_report",
            Self::Reconnect => "reconnect",
        }
    }
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── FeedbackMessage ──────────────────────────────────────────────

/// A structurally valid feedback message with coerced fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackMessage {
    pub kind: FeedbackKind,
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub stream_id: Option<String>,
    /// Clamped to `[0, 100]`.
    pub loss_pct: Option<f64>,
    /// Clamped to `>= 0`.
    pub jitter_ms: Option<f64>,
    /// Clamped to `>= 0`.
    pub freeze_ms: Option<f64>,
    pub requested_bitrate_kbps: Option<u32>,
    pub reason: Option<String>,
    pub sent_at_us: Option<u64>,
}

/// Wire shape before coercion. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawFeedback {
    #[serde(rename = "type")]
    kind: Value,
    token: Value,
    session_id: Value,
    stream_id: Value,
    loss_pct: Value,
    jitter_ms: Value,
    freeze_ms: Value,
    requested_bitrate_kbps: Value,
    reason: Value,
    sent_at_us: Value,
}

impl FeedbackMessage {
    /// Structural decode only; identity is checked by [`FeedbackChannel`].
    pub fn parse(text: &str) -> Option<Self> {
        if text.len() > MAX_FEEDBACK_BYTES {
            return None;
        }
        let value: Value = serde_json::from_str(text).ok()?;
        if !value.is_object() {
            return None;
        }
        let raw: RawFeedback = serde_json::from_value(value).ok()?;
        let kind = FeedbackKind::from_tag(raw.kind.as_str()?)?;

        Some(Self {
            kind,
            token: exact_text(&raw.token),
            session_id: coerce_text(&raw.session_id),
            stream_id: coerce_text(&raw.stream_id),
            loss_pct: coerce_number(&raw.loss_pct).map(|v| v.clamp(0.0, 100.0)),
            jitter_ms: coerce_number(&raw.jitter_ms).map(|v| v.max(0.0)),
            freeze_ms: coerce_number(&raw.freeze_ms).map(|v| v.max(0.0)),
            requested_bitrate_kbps: coerce_number(&raw.requested_bitrate_kbps)
                .map(|v| v.max(0.0).floor() as u32),
            reason: coerce_text(&raw.reason),
            sent_at_us: coerce_number(&raw.sent_at_us).map(|v| v.max(0.0) as u64),
        })
    }
}

/// Credentials compare byte for byte: strings only, untrimmed.
fn exact_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

// ── FeedbackRejection ────────────────────────────────────────────

/// Why an inbound feedback text was dropped. Each maps to its own counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackRejection {
    /// Oversized, not JSON, not an object, or unknown `type`.
    Malformed,
    /// Token mismatch or expired token.
    AuthRejected,
    /// `sessionId` present and different from this session's.
    SessionMismatch,
    /// `streamId` present and different from this session's.
    StreamMismatch,
}

impl FeedbackRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::AuthRejected => "auth_rejected",
            Self::SessionMismatch => "session_mismatch",
            Self::StreamMismatch => "stream_mismatch",
        }
    }
}

// ── FeedbackChannel ──────────────────────────────────────────────

/// Validates inbound feedback against this session's identity.
#[derive(Debug, Clone)]
pub struct FeedbackChannel {
    token: String,
    token_expires_at: Option<SystemTime>,
    session_id: String,
    stream_id: String,
}

impl FeedbackChannel {
    pub fn new(
        token: impl Into<String>,
        token_expires_at: Option<SystemTime>,
        session_id: impl Into<String>,
        stream_id: StreamId,
    ) -> Self {
        Self {
            token: token.into(),
            token_expires_at,
            session_id: session_id.into(),
            stream_id: stream_id.to_hex(),
        }
    }

    /// Decode and authenticate one inbound text.
    ///
    /// Checks run in order: structure, token (and expiry), session id,
    /// stream id. The first failure wins.
    pub fn accept(&self, text: &str, now: SystemTime) -> Result<FeedbackMessage, FeedbackRejection> {
        let msg = FeedbackMessage::parse(text).ok_or(FeedbackRejection::Malformed)?;

        if msg.token.as_deref().unwrap_or_default() != self.token {
            return Err(FeedbackRejection::AuthRejected);
        }
        if self.token_expires_at.is_some_and(|exp| now >= exp) {
            return Err(FeedbackRejection::AuthRejected);
        }
        if msg.session_id.as_deref().is_some_and(|sid| sid != self.session_id) {
            return Err(FeedbackRejection::SessionMismatch);
        }
        if msg
            .stream_id
            .as_deref()
            .is_some_and(|sid| normalize_stream_id(sid) != self.stream_id)
        {
            return Err(FeedbackRejection::StreamMismatch);
        }
        Ok(msg)
    }
}

// ── Tests ────────────────────────────────────────────────────────
