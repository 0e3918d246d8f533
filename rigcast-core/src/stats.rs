//! Sender statistics and periodic telemetry.
//!
//! Counters only ever grow. Rates are derived at emission time and are
//! always "since start"; there is no averaging window.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::control::{ControlDecision, FeedbackKind, FeedbackRejection};

/// Floor on elapsed time when deriving rates.
const MIN_ELAPSED: Duration = Duration::from_millis(1);

// ── SenderStats ──────────────────────────────────────────────────

/// Monotonic counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SenderStats {
    pub frames_input: u64,
    pub frames_encoded: u64,
    pub keyframes: u64,
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub pacing_wait_us: u64,

    pub capture_errors: u64,
    pub encode_errors: u64,
    pub send_errors: u64,
    pub reconfigure_errors: u64,
    pub encoder_reconfigs: u64,

    pub feedback_received: u64,
    pub feedback_malformed: u64,
    pub feedback_auth_rejected: u64,
    pub feedback_session_rejected: u64,
    pub feedback_stream_rejected: u64,
    pub feedback_cooldown_ignored: u64,
    pub keyframe_requests: u64,
    pub network_reports: u64,
    pub reconnect_requests: u64,
    pub keyframes_forced: u64,
    pub bitrate_drops: u64,

    /// Periodic stats emissions so far.
    pub stats_emitted: u64,
}

// ── StatsSnapshot ────────────────────────────────────────────────

/// Counters plus derived rates at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub counters: SenderStats,
    pub elapsed_secs: f64,
    pub input_fps: f64,
    pub encoded_fps: f64,
    pub send_kbps: f64,
    pub messages_per_sec: f64,
    pub current_bitrate_kbps: u32,
}

impl StatsSnapshot {
    /// Emit as a structured telemetry event.
    pub fn log(&self, event: &'static str) {
        let c = &self.counters;
        info!(
            event,
            elapsed_secs = self.elapsed_secs,
            input_fps = self.input_fps,
            encoded_fps = self.encoded_fps,
            send_kbps = self.send_kbps,
            messages_per_sec = self.messages_per_sec,
            current_bitrate_kbps = self.current_bitrate_kbps,
            frames_input = c.frames_input,
            frames_encoded = c.frames_encoded,
            keyframes = c.keyframes,
            bytes_sent = c.bytes_sent,
            messages_sent = c.messages_sent,
            pacing_wait_ms = c.pacing_wait_us / 1000,
            capture_errors = c.capture_errors,
            encode_errors = c.encode_errors,
            send_errors = c.send_errors,
            reconfigure_errors = c.reconfigure_errors,
            encoder_reconfigs = c.encoder_reconfigs,
            feedback_received = c.feedback_received,
            feedback_malformed = c.feedback_malformed,
            feedback_auth_rejected = c.feedback_auth_rejected,
            feedback_session_rejected = c.feedback_session_rejected,
            feedback_stream_rejected = c.feedback_stream_rejected,
            feedback_cooldown_ignored = c.feedback_cooldown_ignored,
            keyframe_requests = c.keyframe_requests,
            network_reports = c.network_reports,
            reconnect_requests = c.reconnect_requests,
            keyframes_forced = c.keyframes_forced,
            bitrate_drops = c.bitrate_drops,
            stats_emitted = c.stats_emitted,
            "{event}"
        );
    }
}

// ── StatsAggregator ──────────────────────────────────────────────

pub struct StatsAggregator {
    stats: SenderStats,
    started_at: Instant,
    interval: Duration,
    last_emit: Instant,
}

impl StatsAggregator {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    /// Aggregator whose clock starts at `started_at` (useful for testing).
    pub fn starting_at(started_at: Instant, interval: Duration) -> Self {
        Self {
            stats: SenderStats::default(),
            started_at,
            interval,
            last_emit: started_at,
        }
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn record_input(&mut self) {
        self.stats.frames_input += 1;
    }

    pub fn record_encoded(&mut self, is_keyframe: bool) {
        self.stats.frames_encoded += 1;
        if is_keyframe {
            self.stats.keyframes += 1;
        }
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.stats.bytes_sent += bytes as u64;
        self.stats.messages_sent += 1;
    }

    pub fn record_pacing(&mut self, wait: Duration) {
        self.stats.pacing_wait_us += wait.as_micros() as u64;
    }

    pub fn record_capture_error(&mut self) {
        self.stats.capture_errors += 1;
    }

    pub fn record_encode_error(&mut self) {
        self.stats.encode_errors += 1;
    }

    pub fn record_send_error(&mut self) {
        self.stats.send_errors += 1;
    }

    pub fn record_reconfigure(&mut self, ok: bool) {
        if ok {
            self.stats.encoder_reconfigs += 1;
        } else {
            self.stats.reconfigure_errors += 1;
        }
    }

    /// Count one inbound feedback text that was dropped.
    pub fn record_rejection(&mut self, rejection: FeedbackRejection) {
        self.stats.feedback_received += 1;
        match rejection {
            FeedbackRejection::Malformed => self.stats.feedback_malformed += 1,
            FeedbackRejection::AuthRejected => self.stats.feedback_auth_rejected += 1,
            FeedbackRejection::SessionMismatch => self.stats.feedback_session_rejected += 1,
            FeedbackRejection::StreamMismatch => self.stats.feedback_stream_rejected += 1,
        }
    }

    /// Count one accepted feedback message and what it led to.
    pub fn record_feedback(&mut self, kind: FeedbackKind, decision: ControlDecision) {
        self.stats.feedback_received += 1;
        match kind {
            FeedbackKind::KeyframeRequest => self.stats.keyframe_requests += 1,
            FeedbackKind::NetworkReport => self.stats.network_reports += 1,
            FeedbackKind::Reconnect => self.stats.reconnect_requests += 1,
        }
        match decision {
            ControlDecision::KeyframeRequested => self.stats.keyframes_forced += 1,
            ControlDecision::BitrateDropRequested { .. } => self.stats.bitrate_drops += 1,
            ControlDecision::CooldownIgnored => self.stats.feedback_cooldown_ignored += 1,
            ControlDecision::NoChange => {}
        }
    }

    /// Whether a periodic emission is due; marks it emitted if so.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() || now.saturating_duration_since(self.last_emit) < self.interval {
            return false;
        }
        self.last_emit = now;
        self.stats.stats_emitted += 1;
        true
    }

    pub fn snapshot(&self, now: Instant, current_bitrate_kbps: u32) -> StatsSnapshot {
        let elapsed = now.saturating_duration_since(self.started_at).max(MIN_ELAPSED);
        let secs = elapsed.as_secs_f64();
        let s = &self.stats;
        StatsSnapshot {
            counters: s.clone(),
            elapsed_secs: secs,
            input_fps: s.frames_input as f64 / secs,
            encoded_fps: s.frames_encoded as f64 / secs,
            send_kbps: s.bytes_sent as f64 * 8.0 / 1000.0 / secs,
            messages_per_sec: s.messages_sent as f64 / secs,
            current_bitrate_kbps,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Severity;

    #[test]
    fn rates_are_since_start() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::starting_at(t0, Duration::from_secs(5));
        for _ in 0..60 {
            agg.record_input();
            agg.record_encoded(false);
            agg.record_sent(1250);
        }
        let snap = agg.snapshot(t0 + Duration::from_secs(2), 4000);
        assert_eq!(snap.input_fps, 30.0);
        assert_eq!(snap.encoded_fps, 30.0);
        assert_eq!(snap.messages_per_sec, 30.0);
        // 75 000 bytes over 2 s = 300 kbps
        assert!((snap.send_kbps - 300.0).abs() < 1e-9);
        assert_eq!(snap.current_bitrate_kbps, 4000);
    }

    #[test]
    fn elapsed_is_floored() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::starting_at(t0, Duration::from_secs(1));
        agg.record_input();
        let snap = agg.snapshot(t0, 0);
        assert_eq!(snap.elapsed_secs, 0.001);
        assert!(snap.input_fps.is_finite());
    }

    #[test]
    fn periodic_emission() {
        let t0 = Instant::now();
        let mut agg = StatsAggregator::starting_at(t0, Duration::from_secs(1));
        assert!(!agg.take_due(t0 + Duration::from_millis(999)));
        assert!(agg.take_due(t0 + Duration::from_secs(1)));
        assert!(!agg.take_due(t0 + Duration::from_millis(1500)));
        assert!(agg.take_due(t0 + Duration::from_secs(2)));
        assert_eq!(agg.stats().stats_emitted, 2);

        let mut never = StatsAggregator::starting_at(t0, Duration::ZERO);
        assert!(!never.take_due(t0 + Duration::from_secs(60)));
    }

    #[test]
    fn feedback_counters() {
        let mut agg = StatsAggregator::new(Duration::from_secs(1));
        agg.record_rejection(FeedbackRejection::Malformed);
        agg.record_rejection(FeedbackRejection::AuthRejected);
        agg.record_rejection(FeedbackRejection::StreamMismatch);
        agg.record_feedback(FeedbackKind::KeyframeRequest, ControlDecision::KeyframeRequested);
        agg.record_feedback(FeedbackKind::KeyframeRequest, ControlDecision::CooldownIgnored);
        agg.record_feedback(
            FeedbackKind::NetworkReport,
            ControlDecision::BitrateDropRequested {
                from_kbps: 6000,
                to_kbps: 4680,
                severity: Severity::Severe,
            },
        );

        let s = agg.stats();
        assert_eq!(s.feedback_received, 6);
        assert_eq!(s.feedback_malformed, 1);
        assert_eq!(s.feedback_auth_rejected, 1);
        assert_eq!(s.feedback_session_rejected, 0);
        assert_eq!(s.feedback_stream_rejected, 1);
        assert_eq!(s.keyframe_requests, 2);
        assert_eq!(s.keyframes_forced, 1);
        assert_eq!(s.feedback_cooldown_ignored, 1);
        assert_eq!(s.network_reports, 1);
        assert_eq!(s.bitrate_drops, 1);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let agg = StatsAggregator::new(Duration::from_secs(1));
        let json = serde_json::to_value(agg.snapshot(Instant::now(), 1200)).unwrap();
        assert!(json.get("frames_input").is_some());
        assert!(json.get("send_kbps").is_some());
    }
}
