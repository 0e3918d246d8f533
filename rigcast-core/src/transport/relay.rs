//! Outbound relay connection.
//!
//! A WebSocket to the relay carries one binary message per encoded
//! chunk. Inbound text messages are viewer feedback; inbound binary
//! messages are ignored.
//!
//! The socket is split between two tasks. The writer drains an unbounded
//! queue and keeps a running count of bytes queued but not yet written
//! (the "buffered amount"); [`RelayTransportClient::send`] waits for that
//! count to drop below [`HIGH_WATER_MARK`] before queueing more. The
//! reader forwards feedback texts and clears the `open` flag on any
//! close or error, which the session checks between frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::wire::StreamId;

// ── Constants ────────────────────────────────────────────────────

/// `send` waits while at least this many bytes are queued.
pub const HIGH_WATER_MARK: usize = 4 * 1024 * 1024;

/// Poll interval while waiting for the queue to drain.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// How long `close` waits for the writer to flush the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ── URL ──────────────────────────────────────────────────────────

/// Build the host-role connect URL from the relay base URL.
pub fn relay_connect_url(
    base: &str,
    session_id: &str,
    stream_id: &StreamId,
    token: &str,
    user_id: &str,
) -> String {
    let sep = match base.find('?') {
        None => "?",
        Some(_) if base.ends_with('?') || base.ends_with('&') => "",
        Some(_) => "&",
    };
    format!(
        "{base}{sep}role=host&sessionId={}&streamId={}&token={}&userId={}",
        urlencoding::encode(session_id),
        stream_id.to_hex(),
        urlencoding::encode(token),
        urlencoding::encode(user_id),
    )
}

// ── InboundText ──────────────────────────────────────────────────

/// A text message received from the relay, stamped on arrival.
#[derive(Debug, Clone)]
pub struct InboundText {
    pub text: String,
    pub received_at: Instant,
}

// ── RelayTransportClient ─────────────────────────────────────────

pub struct RelayTransportClient {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    inbound: mpsc::UnboundedReceiver<InboundText>,
    buffered: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl RelayTransportClient {
    /// Open the relay connection, failing if it is not up within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let (ws, _response) = match tokio::time::timeout(timeout, connect_async(url)).await {
            Err(_) => return Err(RelayError::ConnectTimeout(timeout)),
            Ok(Err(e)) => return Err(RelayError::Connect(e.to_string())),
            Ok(Ok(pair)) => pair,
        };
        debug!("relay connection open");
        Ok(Self::from_stream(ws))
    }

    /// Take over an already-established WebSocket.
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<InboundText>();
        let buffered = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicBool::new(true));

        // Writer task: queue -> socket
        let writer = tokio::spawn({
            let buffered = Arc::clone(&buffered);
            let open = Arc::clone(&open);
            async move {
                while let Some(msg) = out_rx.recv().await {
                    let len = queued_len(&msg);
                    let is_close = matches!(msg, Message::Close(_));
                    let result = sink.send(msg).await;
                    buffered.fetch_sub(len, Ordering::AcqRel);
                    if let Err(e) = result {
                        warn!(error = %e, "relay write failed");
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
                open.store(false, Ordering::SeqCst);
            }
        });

        // Reader task: socket -> feedback queue
        let reader = tokio::spawn({
            let open = Arc::clone(&open);
            async move {
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            let inbound = InboundText {
                                text,
                                received_at: Instant::now(),
                            };
                            if in_tx.send(inbound).is_err() {
                                break;
                            }
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(?frame, "relay closed the connection");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "relay read failed");
                            break;
                        }
                    }
                }
                open.store(false, Ordering::SeqCst);
            }
        });

        Self {
            outbound: Some(out_tx),
            inbound: in_rx,
            buffered,
            open,
            writer: Some(writer),
            reader: Some(reader),
        }
    }

    /// Whether the connection is still usable.
    pub fn is_open(&self) -> bool {
        self.outbound.is_some() && self.open.load(Ordering::SeqCst)
    }

    /// Bytes queued but not yet written to the socket.
    pub fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Queue one binary message, waiting first for the backlog to drain
    /// below the high-water mark.
    pub async fn send(&self, payload: Bytes) -> Result<(), RelayError> {
        if !self.is_open() {
            return Err(RelayError::NotConnected);
        }
        while self.buffered_amount() >= HIGH_WATER_MARK {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            if !self.is_open() {
                return Err(RelayError::NotConnected);
            }
        }

        let tx = self.outbound.as_ref().ok_or(RelayError::NotConnected)?;
        let len = payload.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if tx.send(Message::Binary(payload.to_vec())).is_err() {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(RelayError::NotConnected);
        }
        Ok(())
    }

    /// Next feedback text received so far, without waiting.
    pub fn try_recv_text(&mut self) -> Option<InboundText> {
        self.inbound.try_recv().ok()
    }

    /// Best-effort graceful close. Idempotent, never fails.
    pub async fn close(&mut self) {
        let Some(tx) = self.outbound.take() else {
            return;
        };
        let _ = tx.send(Message::Close(None));
        drop(tx);

        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                debug!("relay writer still busy after close grace; aborting");
                writer.abort();
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Drop for RelayTransportClient {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn queued_len(msg: &Message) -> usize {
    match msg {
        Message::Binary(data) => data.len(),
        _ => 0,
    }
}

// ── Tests ────────────────────────────────────────────────────────
