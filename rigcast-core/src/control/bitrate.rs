//! Feedback-driven bitrate and keyframe control.
//!
//! The controller never reconfigures the encoder itself. It only marks
//! intent in [`EncoderControlState`]; the session applies it at the next
//! frame boundary. The implicit states are:
//!
//! - **Steady**: nothing pending.
//! - **PendingKeyframe**: `pending_force_idr` set.
//! - **PendingBitrateChange**: `pending_bitrate_kbps` set (always together
//!   with `pending_force_idr`).
//!
//! Bitrate only ever moves down from feedback, and never below the floor.

use std::time::{Duration, Instant};

use tracing::debug;

use super::feedback::{FeedbackKind, FeedbackMessage};

/// Loss at or above this is severe.
pub const SEVERE_LOSS_PCT: f64 = 8.0;
/// Jitter at or above this is severe.
pub const SEVERE_JITTER_MS: f64 = 45.0;
/// Loss at or above this is degraded.
pub const DEGRADED_LOSS_PCT: f64 = 4.0;
/// Jitter at or above this is degraded.
pub const DEGRADED_JITTER_MS: f64 = 25.0;
/// Largest step factor applied on a severe report.
pub const SEVERE_STEP_CAP: f64 = 0.78;

// ── EncoderControlState ──────────────────────────────────────────

/// Mutable encoder intent shared between the controller and the session.
#[derive(Debug, Clone)]
pub struct EncoderControlState {
    pub current_bitrate_kbps: u32,
    pub pending_bitrate_kbps: Option<u32>,
    pub pending_force_idr: bool,
    pub last_keyframe_request_at: Option<Instant>,
    pub last_bitrate_drop_at: Option<Instant>,
}

impl EncoderControlState {
    pub fn new(current_bitrate_kbps: u32) -> Self {
        Self {
            current_bitrate_kbps,
            pending_bitrate_kbps: None,
            pending_force_idr: false,
            last_keyframe_request_at: None,
            last_bitrate_drop_at: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending_force_idr || self.pending_bitrate_kbps.is_some()
    }

    /// Bitrate the next encoder should use.
    pub fn target_bitrate_kbps(&self) -> u32 {
        self.pending_bitrate_kbps.unwrap_or(self.current_bitrate_kbps)
    }

    /// A reconfiguration at `bitrate_kbps` succeeded.
    pub fn commit(&mut self, bitrate_kbps: u32) {
        self.current_bitrate_kbps = bitrate_kbps;
        self.clear_pending();
    }

    /// Drop pending intent without touching the current bitrate.
    pub fn clear_pending(&mut self) {
        self.pending_bitrate_kbps = None;
        self.pending_force_idr = false;
    }
}

// ── Severity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Degraded,
    Severe,
}

impl Severity {
    /// Classify a network report. Absent metrics count as zero.
    pub fn classify(loss_pct: Option<f64>, jitter_ms: Option<f64>) -> Option<Self> {
        let loss = loss_pct.unwrap_or(0.0);
        let jitter = jitter_ms.unwrap_or(0.0);
        if loss >= SEVERE_LOSS_PCT || jitter >= SEVERE_JITTER_MS {
            Some(Self::Severe)
        } else if loss >= DEGRADED_LOSS_PCT || jitter >= DEGRADED_JITTER_MS {
            Some(Self::Degraded)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Degraded => "degraded",
            Self::Severe => "severe",
        }
    }
}

// ── ControlDecision ──────────────────────────────────────────────

/// What the controller did with one feedback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlDecision {
    /// A forced keyframe is now pending.
    KeyframeRequested,
    /// A lower bitrate (and keyframe) is now pending.
    BitrateDropRequested {
        from_kbps: u32,
        to_kbps: u32,
        severity: Severity,
    },
    /// Suppressed by a cooldown.
    CooldownIgnored,
    /// Nothing to do (benign report, or already at the floor).
    NoChange,
}

// ── BitrateController ────────────────────────────────────────────

/// Tuning for [`BitrateController`].
#[derive(Debug, Clone)]
pub struct BitratePolicy {
    pub min_bitrate_kbps: u32,
    /// Multiplier applied per drop, in `(0, 1)`.
    pub step_pct: f64,
    pub keyframe_cooldown: Duration,
    pub adapt_cooldown: Duration,
}

impl Default for BitratePolicy {
    fn default() -> Self {
        Self {
            min_bitrate_kbps: 1200,
            step_pct: 0.85,
            keyframe_cooldown: Duration::from_millis(350),
            adapt_cooldown: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BitrateController {
    policy: BitratePolicy,
}

impl BitrateController {
    pub fn new(policy: BitratePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BitratePolicy {
        &self.policy
    }

    /// Fold one validated feedback message into `state`.
    pub fn on_feedback(
        &self,
        state: &mut EncoderControlState,
        msg: &FeedbackMessage,
        now: Instant,
    ) -> ControlDecision {
        match msg.kind {
            FeedbackKind::KeyframeRequest | FeedbackKind::Reconnect => self.request_keyframe(state, now),
            FeedbackKind::NetworkReport => self.on_network_report(state, msg, now),
        }
    }

    fn request_keyframe(&self, state: &mut EncoderControlState, now: Instant) -> ControlDecision {
        if within(state.last_keyframe_request_at, now, self.policy.keyframe_cooldown) {
            return ControlDecision::CooldownIgnored;
        }
        state.pending_force_idr = true;
        state.last_keyframe_request_at = Some(now);
        ControlDecision::KeyframeRequested
    }

    fn on_network_report(
        &self,
        state: &mut EncoderControlState,
        msg: &FeedbackMessage,
        now: Instant,
    ) -> ControlDecision {
        let Some(severity) = Severity::classify(msg.loss_pct, msg.jitter_ms) else {
            return ControlDecision::NoChange;
        };
        if within(state.last_bitrate_drop_at, now, self.policy.adapt_cooldown) {
            return ControlDecision::CooldownIgnored;
        }

        let min = self.policy.min_bitrate_kbps;
        let current = state.current_bitrate_kbps;
        let requested_ceil = msg.requested_bitrate_kbps.unwrap_or(current).max(min);
        let factor = match severity {
            Severity::Severe => self.policy.step_pct.min(SEVERE_STEP_CAP),
            Severity::Degraded => self.policy.step_pct,
        };
        let stepped = (current as f64 * factor).floor() as u32;
        let target = requested_ceil.min(stepped).max(min);

        if target >= current {
            debug!(current, target, "bitrate already at floor; report ignored");
            return ControlDecision::NoChange;
        }

        state.pending_bitrate_kbps = Some(target);
        state.pending_force_idr = true;
        state.last_bitrate_drop_at = Some(now);
        ControlDecision::BitrateDropRequested {
            from_kbps: current,
            to_kbps: target,
            severity,
        }
    }
}

fn within(last: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    last.is_some_and(|at| now.saturating_duration_since(at) < cooldown)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(kind: FeedbackKind) -> FeedbackMessage {
        FeedbackMessage {
            kind,
            token: None,
            session_id: None,
            stream_id: None,
            loss_pct: None,
            jitter_ms: None,
            freeze_ms: None,
            requested_bitrate_kbps: None,
            reason: None,
            sent_at_us: None,
        }
    }

    fn report(loss: f64, jitter: f64) -> FeedbackMessage {
        FeedbackMessage {
            loss_pct: Some(loss),
            jitter_ms: Some(jitter),
            ..msg(FeedbackKind::NetworkReport)
        }
    }

    fn controller(adapt_cooldown_ms: u64) -> BitrateController {
        BitrateController::new(BitratePolicy {
            min_bitrate_kbps: 1200,
            step_pct: 0.85,
            keyframe_cooldown: Duration::from_millis(350),
            adapt_cooldown: Duration::from_millis(adapt_cooldown_ms),
        })
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(Severity::classify(Some(8.0), None), Some(Severity::Severe));
        assert_eq!(Severity::classify(None, Some(45.0)), Some(Severity::Severe));
        assert_eq!(Severity::classify(Some(4.0), Some(0.0)), Some(Severity::Degraded));
        assert_eq!(Severity::classify(Some(0.0), Some(25.0)), Some(Severity::Degraded));
        assert_eq!(Severity::classify(Some(3.9), Some(24.9)), None);
        assert_eq!(Severity::classify(None, None), None);
    }

    #[test]
    fn severe_report_caps_step_and_forces_keyframe() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        let decision = ctl.on_feedback(&mut state, &report(20.0, 0.0), Instant::now());

        assert_eq!(
            decision,
            ControlDecision::BitrateDropRequested {
                from_kbps: 6000,
                to_kbps: 4680,
                severity: Severity::Severe,
            }
        );
        assert_eq!(state.pending_bitrate_kbps, Some(4680));
        assert!(state.pending_force_idr);
        assert_eq!(state.current_bitrate_kbps, 6000);
    }

    #[test]
    fn repeated_severe_reports_converge_to_floor() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        let t0 = Instant::now();
        for i in 0..40 {
            ctl.on_feedback(&mut state, &report(20.0, 0.0), t0 + Duration::from_millis(i));
            let target = state.target_bitrate_kbps();
            state.commit(target);
            assert!(state.current_bitrate_kbps >= 1200);
        }
        assert_eq!(state.current_bitrate_kbps, 1200);

        let decision = ctl.on_feedback(&mut state, &report(20.0, 0.0), t0 + Duration::from_secs(1));
        assert_eq!(decision, ControlDecision::NoChange);
        assert!(!state.has_pending());
    }

    #[test]
    fn degraded_uses_plain_step() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        ctl.on_feedback(&mut state, &report(5.0, 0.0), Instant::now());
        assert_eq!(state.pending_bitrate_kbps, Some(5100));
    }

    #[test]
    fn requested_bitrate_acts_as_ceiling() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        let m = FeedbackMessage {
            requested_bitrate_kbps: Some(3000),
            ..report(5.0, 0.0)
        };
        ctl.on_feedback(&mut state, &m, Instant::now());
        assert_eq!(state.pending_bitrate_kbps, Some(3000));

        // A ceiling below the floor is lifted to the floor.
        let mut state = EncoderControlState::new(6000);
        let m = FeedbackMessage {
            requested_bitrate_kbps: Some(100),
            ..report(5.0, 0.0)
        };
        ctl.on_feedback(&mut state, &m, Instant::now());
        assert_eq!(state.pending_bitrate_kbps, Some(1200));
    }

    #[test]
    fn requested_bitrate_above_current_never_raises() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(2000);
        let m = FeedbackMessage {
            requested_bitrate_kbps: Some(9000),
            ..report(5.0, 0.0)
        };
        ctl.on_feedback(&mut state, &m, Instant::now());
        assert_eq!(state.pending_bitrate_kbps, Some(1700));
    }

    #[test]
    fn benign_report_is_ignored() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        assert_eq!(ctl.on_feedback(&mut state, &report(1.0, 5.0), Instant::now()), ControlDecision::NoChange);
        assert!(!state.has_pending());
    }

    #[test]
    fn adapt_cooldown_suppresses_second_drop() {
        let ctl = controller(1500);
        let mut state = EncoderControlState::new(6000);
        let t0 = Instant::now();
        ctl.on_feedback(&mut state, &report(20.0, 0.0), t0);
        state.commit(state.target_bitrate_kbps());

        let second = ctl.on_feedback(&mut state, &report(20.0, 0.0), t0 + Duration::from_millis(200));
        assert_eq!(second, ControlDecision::CooldownIgnored);
        assert_eq!(state.current_bitrate_kbps, 4680);
        assert!(!state.has_pending());

        let third = ctl.on_feedback(&mut state, &report(20.0, 0.0), t0 + Duration::from_millis(1500));
        assert!(matches!(third, ControlDecision::BitrateDropRequested { to_kbps: 3650, .. }));
    }

    #[test]
    fn keyframe_requests_respect_cooldown() {
        let ctl = controller(0);
        let mut state = EncoderControlState::new(6000);
        let t0 = Instant::now();

        let first = ctl.on_feedback(&mut state, &msg(FeedbackKind::KeyframeRequest), t0);
        assert_eq!(first, ControlDecision::KeyframeRequested);
        state.clear_pending();

        let second = ctl.on_feedback(
            &mut state,
            &msg(FeedbackKind::KeyframeRequest),
            t0 + Duration::from_millis(10),
        );
        assert_eq!(second, ControlDecision::CooldownIgnored);
        assert!(!state.pending_force_idr);

        let later = ctl.on_feedback(&mut state, &msg(FeedbackKind::Reconnect), t0 + Duration::from_millis(350));
        assert_eq!(later, ControlDecision::KeyframeRequested);
        assert!(state.pending_force_idr);
    }
}
