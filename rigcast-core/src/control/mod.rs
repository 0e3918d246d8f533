//! Closed-loop control driven by viewer feedback.
//!
//! `feedback` turns inbound JSON into validated [`FeedbackMessage`]s;
//! `bitrate` folds them into [`EncoderControlState`].

pub mod bitrate;
pub mod feedback;

pub use bitrate::{BitrateController, BitratePolicy, ControlDecision, EncoderControlState, Severity};
pub use feedback::{FeedbackChannel, FeedbackKind, FeedbackMessage, FeedbackRejection, MAX_FEEDBACK_BYTES};
