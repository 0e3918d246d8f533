//! The per-session send loop.
//!
//! ```text
//!  FrameSource ──► Encoder ──► RelayWireFrame ──► BytePacer ──► relay
//!                    ▲                                            │
//!                    │ reconfigure            feedback (text)     │
//!            EncoderControlState ◄── BitrateController ◄──────────┘
//! ```
//!
//! Frames are scheduled on a fixed wall-clock cadence. Feedback is
//! drained and pending encoder changes applied only at frame boundaries,
//! so the loop is the single owner of all mutable session state.

use std::time::{Duration, SystemTime};

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control::{BitrateController, BitratePolicy, ControlDecision, EncoderControlState, FeedbackChannel};
use crate::encoder::{Encoder, EncoderConfig, EncoderFactory, FrameSource, NaluChunk};
use crate::error::RelayError;
use crate::pacer::BytePacer;
use crate::stats::{StatsAggregator, StatsSnapshot};
use crate::transport::{InboundText, RelayTransportClient, relay_connect_url};
use crate::wire::{DEFAULT_MAX_CHUNK_BYTES, RelayWireFrame, StreamId};

const MAX_FPS: u32 = 240;

// ── SessionConfig ────────────────────────────────────────────────

/// Immutable settings for one streaming session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub relay_url: String,
    pub session_id: String,
    pub user_id: String,
    pub stream_id: StreamId,
    pub token: String,
    pub token_expires_at: Option<SystemTime>,

    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// `None` runs until stopped.
    pub duration: Option<Duration>,

    pub target_bitrate_kbps: u32,
    pub min_bitrate_kbps: u32,
    pub step_pct: f64,
    pub keyframe_cooldown: Duration,
    pub adapt_cooldown: Duration,

    /// `0` disables pacing.
    pub pacing_target_kbps: f64,
    /// `0` disables periodic stats.
    pub stats_interval: Duration,
    pub connect_timeout: Duration,
    /// Chunk size for the LAN transport.
    pub max_chunk_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let policy = BitratePolicy::default();
        Self {
            relay_url: "ws://127.0.0.1:8787/relay".to_string(),
            session_id: String::new(),
            user_id: String::new(),
            stream_id: StreamId::default(),
            token: String::new(),
            token_expires_at: None,
            width: 1920,
            height: 1080,
            fps: 60,
            duration: None,
            target_bitrate_kbps: 6000,
            min_bitrate_kbps: policy.min_bitrate_kbps,
            step_pct: policy.step_pct,
            keyframe_cooldown: policy.keyframe_cooldown,
            adapt_cooldown: policy.adapt_cooldown,
            pacing_target_kbps: 0.0,
            stats_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.relay_url.is_empty() {
            return Err(RelayError::Config("relay url is empty".into()));
        }
        if self.fps == 0 || self.fps > MAX_FPS {
            return Err(RelayError::Config(format!("fps must be in 1..={MAX_FPS}, got {}", self.fps)));
        }
        if self.min_bitrate_kbps == 0 {
            return Err(RelayError::Config("min bitrate must be positive".into()));
        }
        if self.min_bitrate_kbps > self.target_bitrate_kbps {
            return Err(RelayError::Config(format!(
                "min bitrate {} exceeds target {}",
                self.min_bitrate_kbps, self.target_bitrate_kbps
            )));
        }
        if !(self.step_pct > 0.0 && self.step_pct < 1.0) {
            return Err(RelayError::Config(format!("step factor must be in (0, 1), got {}", self.step_pct)));
        }
        if self.max_chunk_bytes == 0 {
            return Err(RelayError::Config("max chunk size must be positive".into()));
        }
        Ok(())
    }

    pub fn connect_url(&self) -> String {
        relay_connect_url(
            &self.relay_url,
            &self.session_id,
            &self.stream_id,
            &self.token,
            &self.user_id,
        )
    }

    /// Number of frames to schedule, or `None` when unbounded.
    pub fn total_frames(&self) -> Option<u64> {
        self.duration
            .map(|d| (self.fps as f64 * d.as_secs_f64()).round() as u64)
    }

    pub fn encoder_config(&self, bitrate_kbps: u32) -> EncoderConfig {
        EncoderConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate_kbps,
        }
    }

    pub fn bitrate_policy(&self) -> BitratePolicy {
        BitratePolicy {
            min_bitrate_kbps: self.min_bitrate_kbps,
            step_pct: self.step_pct,
            keyframe_cooldown: self.keyframe_cooldown,
            adapt_cooldown: self.adapt_cooldown,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

// ── SessionRunner ────────────────────────────────────────────────

pub struct SessionRunner<S, F> {
    config: SessionConfig,
    source: S,
    factory: F,
    stop: CancellationToken,

    control: EncoderControlState,
    controller: BitrateController,
    feedback: FeedbackChannel,
    pacer: BytePacer,
    stats: StatsAggregator,
}

impl<S: FrameSource, F: EncoderFactory> SessionRunner<S, F> {
    pub fn new(config: SessionConfig, source: S, factory: F) -> Self {
        let feedback = FeedbackChannel::new(
            config.token.clone(),
            config.token_expires_at,
            config.session_id.clone(),
            config.stream_id,
        );
        Self {
            control: EncoderControlState::new(config.target_bitrate_kbps),
            controller: BitrateController::new(config.bitrate_policy()),
            pacer: BytePacer::new(config.pacing_target_kbps),
            stats: StatsAggregator::new(config.stats_interval),
            feedback,
            config,
            source,
            factory,
            stop: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the loop at the next frame boundary.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Connect to the relay and stream until done, stopped or failed.
    pub async fn run(self) -> Result<StatsSnapshot, RelayError> {
        self.config.validate()?;
        let transport = RelayTransportClient::connect(&self.config.connect_url(), self.config.connect_timeout).await?;
        self.run_on(transport).await
    }

    /// Stream over an already-open transport.
    ///
    /// Cleanup (flush, encoder close, transport close, summary) runs on
    /// every exit path. A fatal loop error is returned after cleanup.
    pub async fn run_on(mut self, mut transport: RelayTransportClient) -> Result<StatsSnapshot, RelayError> {
        self.config.validate()?;
        self.stats = StatsAggregator::new(self.config.stats_interval);

        let first = self.config.encoder_config(self.control.current_bitrate_kbps);
        let mut encoder = match self.factory.create(&first) {
            Ok(encoder) => encoder,
            Err(e) => {
                transport.close().await;
                return Err(e.into());
            }
        };

        let selection = encoder.selection();
        info!(
            event = "relay_sender_start",
            session_id = %self.config.session_id,
            stream_id = %self.config.stream_id,
            width = self.config.width,
            height = self.config.height,
            fps = self.config.fps,
            bitrate_kbps = self.control.current_bitrate_kbps,
            min_bitrate_kbps = self.config.min_bitrate_kbps,
            pacing_target_kbps = self.config.pacing_target_kbps,
            total_frames = self.config.total_frames(),
            implementation = %selection.implementation,
            reason = %selection.reason,
            gpu_vendor = selection.gpu_vendor.as_deref(),
            "relay_sender_start"
        );

        let result = self.send_loop(&mut transport, &mut encoder).await;

        // Cleanup
        let tail = match encoder.flush().await {
            Ok(chunks) if transport.is_open() => self.send_chunks(&transport, chunks).await,
            Ok(chunks) => {
                debug!(dropped = chunks.len(), "transport closed; tail chunks dropped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "encoder flush failed");
                self.stats.record_encode_error();
                Ok(())
            }
        };
        encoder.close().await;
        transport.close().await;

        let summary = self
            .stats
            .snapshot(std::time::Instant::now(), self.control.current_bitrate_kbps);
        summary.log("relay_sender_summary");

        result.and(tail).map(|()| summary)
    }

    async fn send_loop(
        &mut self,
        transport: &mut RelayTransportClient,
        encoder: &mut Box<dyn Encoder>,
    ) -> Result<(), RelayError> {
        let total = self.config.total_frames();
        let interval = self.config.frame_interval();
        let started = Instant::now();
        let mut index: u64 = 0;

        while total.is_none_or(|total| index < total) {
            if self.stop.is_cancelled() {
                debug!(index, "stop requested");
                break;
            }
            if !transport.is_open() {
                return Err(RelayError::ConnectionClosed);
            }

            let due = started + interval.mul_f64(index as f64);
            tokio::select! {
                _ = sleep_until(due) => {}
                _ = self.stop.cancelled() => {
                    debug!(index, "stop requested");
                    break;
                }
            }
            index += 1;

            self.drain_feedback(transport);
            if self.control.has_pending() {
                self.reconfigure(encoder).await;
            }
            self.log_stats_if_due();

            let frame = match self.source.next_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "frame skipped");
                    self.stats.record_capture_error();
                    continue;
                }
            };
            self.stats.record_input();

            match encoder.encode(&frame).await {
                Ok(chunks) => self.send_chunks(transport, chunks).await?,
                Err(e) => {
                    warn!(error = %e, "encode failed; frame skipped");
                    self.stats.record_encode_error();
                }
            }
        }
        Ok(())
    }

    fn log_stats_if_due(&mut self) {
        let now = std::time::Instant::now();
        if self.stats.take_due(now) {
            self.stats
                .snapshot(now, self.control.current_bitrate_kbps)
                .log("relay_sender_stats");
        }
    }

    /// Frame, pace and send chunks in order. A send failure is fatal.
    async fn send_chunks(
        &mut self,
        transport: &RelayTransportClient,
        chunks: Vec<NaluChunk>,
    ) -> Result<(), RelayError> {
        for chunk in chunks {
            self.stats.record_encoded(chunk.is_keyframe);
            let wire = RelayWireFrame::new(chunk.is_keyframe, chunk.produced_at_us, chunk.annexb_payload).encode();
            let len = wire.len();

            let waited = self.pacer.pace(len).await;
            self.stats.record_pacing(waited);

            if let Err(e) = transport.send(wire).await {
                self.stats.record_send_error();
                return Err(e);
            }
            self.stats.record_sent(len);
        }
        Ok(())
    }

    fn drain_feedback(&mut self, transport: &mut RelayTransportClient) {
        while let Some(InboundText { text, received_at }) = transport.try_recv_text() {
            let msg = match self.feedback.accept(&text, SystemTime::now()) {
                Ok(msg) => msg,
                Err(rejection) => {
                    debug!(reason = rejection.as_str(), "feedback rejected");
                    self.stats.record_rejection(rejection);
                    continue;
                }
            };

            let decision = self.controller.on_feedback(&mut self.control, &msg, received_at);
            self.stats.record_feedback(msg.kind, decision);
            match decision {
                ControlDecision::BitrateDropRequested {
                    from_kbps,
                    to_kbps,
                    severity,
                } => info!(
                    event = "relay_sender_bitrate_drop_requested",
                    from_kbps,
                    to_kbps,
                    severity = severity.as_str(),
                    loss_pct = msg.loss_pct,
                    jitter_ms = msg.jitter_ms,
                    freeze_ms = msg.freeze_ms,
                    requested_bitrate_kbps = msg.requested_bitrate_kbps,
                    reason = msg.reason.as_deref(),
                    "relay_sender_bitrate_drop_requested"
                ),
                other => debug!(kind = %msg.kind, decision = ?other, "feedback applied"),
            }
        }
    }

    /// Replace the encoder with one at the pending bitrate. A failure
    /// keeps the old encoder and drops the pending change.
    async fn reconfigure(&mut self, encoder: &mut Box<dyn Encoder>) {
        let from_kbps = self.control.current_bitrate_kbps;
        let to_kbps = self.control.target_bitrate_kbps();
        let force_idr = self.control.pending_force_idr;

        match self.factory.create(&self.config.encoder_config(to_kbps)) {
            Ok(next) => {
                let mut old = std::mem::replace(encoder, next);
                old.close().await;
                self.control.commit(to_kbps);
                self.stats.record_reconfigure(true);

                let selection = encoder.selection();
                info!(
                    event = "relay_sender_encoder_reconfigured",
                    from_kbps,
                    to_kbps,
                    force_idr,
                    implementation = %selection.implementation,
                    reason = %selection.reason,
                    gpu_vendor = selection.gpu_vendor.as_deref(),
                    "relay_sender_encoder_reconfigured"
                );
            }
            Err(e) => {
                warn!(error = %e, from_kbps, to_kbps, "encoder reconfiguration failed; keeping current encoder");
                self.control.clear_pending();
                self.stats.record_reconfigure(false);
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
