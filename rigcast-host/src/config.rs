//! Configuration for the host streamer.

use std::path::Path;
use std::time::{Duration, SystemTime};

use rigcast_core::{RelayError, SessionConfig, StreamId};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub relay: RelayConfig,
    pub session: SessionIdentity,
    pub video: VideoConfig,
    pub bitrate: BitrateConfig,
    pub pacing: PacingConfig,
    pub stats: StatsConfig,
    pub logging: LoggingConfig,
}

/// Relay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base WebSocket URL; identity parameters are appended.
    pub url: String,
    pub connect_timeout_ms: u64,
}

/// Who this stream belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionIdentity {
    pub session_id: String,
    pub user_id: String,
    /// 32 hex characters or a hyphenated UUID. Empty = random.
    pub stream_id: String,
    pub token: String,
    /// Unix seconds after which feedback tokens are refused. 0 = never.
    pub token_expires_at_unix: u64,
}

/// Capture geometry and cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 0 = stream until stopped.
    pub duration_secs: u64,
}

/// Adaptive bitrate tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BitrateConfig {
    pub target_kbps: u32,
    pub min_kbps: u32,
    /// Multiplier per drop, in (0, 1).
    pub step_pct: f64,
    pub keyframe_cooldown_ms: u64,
    pub adapt_cooldown_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// 0 disables pacing.
    pub target_kbps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// 0 disables periodic stats; the summary is always logged.
    pub interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// "compact" or "json".
    pub format: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/relay".into(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            duration_secs: 0,
        }
    }
}

impl Default for BitrateConfig {
    fn default() -> Self {
        Self {
            target_kbps: 6000,
            min_kbps: 1200,
            step_pct: 0.85,
            keyframe_cooldown_ms: 350,
            adapt_cooldown_ms: 1500,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_ms: 5000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert into the immutable session settings, clamping values
    /// into their working ranges.
    pub fn to_session_config(&self) -> Result<SessionConfig, RelayError> {
        let stream_id = match self.session.stream_id.trim() {
            "" => StreamId::random(),
            text => StreamId::parse(text)?,
        };
        let target = self.bitrate.target_kbps.max(1);
        let min = self.bitrate.min_kbps.clamp(1, target);
        let expires = self.session.token_expires_at_unix;

        let config = SessionConfig {
            relay_url: self.relay.url.clone(),
            session_id: self.session.session_id.clone(),
            user_id: self.session.user_id.clone(),
            stream_id,
            token: self.session.token.clone(),
            token_expires_at: (expires > 0).then(|| SystemTime::UNIX_EPOCH + Duration::from_secs(expires)),
            width: self.video.width.max(16),
            height: self.video.height.max(16),
            fps: self.video.fps.clamp(1, 240),
            duration: (self.video.duration_secs > 0).then(|| Duration::from_secs(self.video.duration_secs)),
            target_bitrate_kbps: target,
            min_bitrate_kbps: min,
            step_pct: self.bitrate.step_pct.clamp(0.05, 0.95),
            keyframe_cooldown: Duration::from_millis(self.bitrate.keyframe_cooldown_ms),
            adapt_cooldown: Duration::from_millis(self.bitrate.adapt_cooldown_ms),
            pacing_target_kbps: self.pacing.target_kbps,
            stats_interval: Duration::from_millis(self.stats.interval_ms),
            connect_timeout: Duration::from_millis(self.relay.connect_timeout_ms.max(1)),
            ..SessionConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Tests ────────────────────────────────────────────────────────
