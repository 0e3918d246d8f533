//! Leaky-bucket byte pacer.
//!
//! Spaces outbound sends so the long-run byte rate approximates a target
//! bitrate. Each call to [`BytePacer::pace`] waits until the bucket's
//! next due time and then pushes that due time forward by the send's
//! cost (`bytes * 8 / kbps`). An idle period resets the bucket rather
//! than banking credit, so a burst after idling is not followed by a
//! compensating slow-down.

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// Waits shorter than this are skipped; the timer cannot honour them.
pub const MIN_SLEEP: Duration = Duration::from_micros(700);

/// Per-connection pacer. Not shared across sessions.
#[derive(Debug)]
pub struct BytePacer {
    target_kbps: f64,
    next_due: Option<Instant>,
    total_wait: Duration,
}

impl BytePacer {
    /// A non-positive or non-finite rate disables pacing.
    pub fn new(target_kbps: f64) -> Self {
        Self {
            target_kbps,
            next_due: None,
            total_wait: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target_kbps.is_finite() && self.target_kbps > 0.0
    }

    pub fn target_kbps(&self) -> f64 {
        self.target_kbps
    }

    /// Total time spent suspended in [`pace`](Self::pace).
    pub fn total_wait(&self) -> Duration {
        self.total_wait
    }

    /// Wait for the bucket, then charge it for `bytes`.
    ///
    /// Returns how long this call was suspended.
    pub async fn pace(&mut self, bytes: usize) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }

        let now = Instant::now();
        let due = match self.next_due {
            Some(due) if due > now => due,
            _ => now,
        };

        let mut waited = Duration::ZERO;
        if due - now >= MIN_SLEEP {
            sleep_until(due).await;
            waited = Instant::now().saturating_duration_since(now);
            self.total_wait += waited;
        }

        let cost = Duration::from_nanos((bytes as f64 * 8_000_000.0 / self.target_kbps).round() as u64);
        self.next_due = Some(due.max(Instant::now()) + cost);
        waited
    }
}

// ── Tests ────────────────────────────────────────────────────────
