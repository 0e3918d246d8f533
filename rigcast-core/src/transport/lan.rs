//! Direct LAN transport over UDP.
//!
//! Frames are split into datagrams of at most
//! [`DEFAULT_MAX_CHUNK_BYTES`](crate::wire::DEFAULT_MAX_CHUNK_BYTES)
//! payload bytes so they cross the link without IP fragmentation. The
//! receiver drops anything that does not decode and reassembles the rest
//! by `(stream_id, seq)`.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::error::RelayError;
use crate::pacer::BytePacer;
use crate::wire::{FrameFlags, LAN_HEADER_SIZE, LanDatagram, PushOutcome, ReassembledFrame, Reassembler, StreamId, packetize};

/// Largest datagram the receiver will accept.
const RECV_BUFFER: usize = LAN_HEADER_SIZE + u16::MAX as usize;

// ── LanSender ────────────────────────────────────────────────────

pub struct LanSender {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    stream_id: StreamId,
    next_seq: u32,
    max_chunk_bytes: usize,
    pacer: BytePacer,
    bytes_sent: u64,
}

impl LanSender {
    /// Wrap an already-bound socket targeting `remote_addr`.
    pub fn new(
        socket: UdpSocket,
        remote_addr: SocketAddr,
        stream_id: StreamId,
        max_chunk_bytes: usize,
        pacer: BytePacer,
    ) -> Self {
        Self {
            socket,
            remote_addr,
            stream_id,
            next_seq: 0,
            max_chunk_bytes,
            pacer,
            bytes_sent: 0,
        }
    }

    /// Total datagram bytes sent since construction.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn pacer(&self) -> &BytePacer {
        &self.pacer
    }

    /// Send one encoded frame; returns the sequence number used.
    pub async fn send_frame(
        &mut self,
        payload: &Bytes,
        timestamp_us: u64,
        is_keyframe: bool,
    ) -> Result<u32, RelayError> {
        let seq = self.next_seq;
        let datagrams = packetize(
            self.stream_id,
            seq,
            timestamp_us,
            FrameFlags::keyframe(is_keyframe),
            payload,
            self.max_chunk_bytes,
        )?;
        self.next_seq = self.next_seq.wrapping_add(1);

        for dg in &datagrams {
            let bytes = dg.encode()?;
            self.pacer.pace(bytes.len()).await;
            self.socket.send_to(&bytes, self.remote_addr).await?;
            self.bytes_sent += bytes.len() as u64;
        }
        trace!(seq, chunks = datagrams.len(), "lan frame sent");
        Ok(seq)
    }
}

// ── LanReceiver ──────────────────────────────────────────────────

pub struct LanReceiver {
    socket: UdpSocket,
    reassembler: Reassembler,
    buf: Vec<u8>,
    discarded: u64,
}

impl LanReceiver {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            reassembler: Reassembler::new(),
            buf: vec![0u8; RECV_BUFFER],
            discarded: 0,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.socket.local_addr()?)
    }

    /// Datagrams dropped as invalid, duplicate or inconsistent.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Wait for the next complete frame.
    pub async fn recv_frame(&mut self) -> Result<ReassembledFrame, RelayError> {
        loop {
            let (len, _) = self.socket.recv_from(&mut self.buf).await?;
            let Some(dg) = LanDatagram::decode(&self.buf[..len]) else {
                self.discarded += 1;
                continue;
            };
            match self.reassembler.push(dg) {
                PushOutcome::Complete(frame) => return Ok(frame),
                PushOutcome::Incomplete => {}
                PushOutcome::Duplicate | PushOutcome::OutOfRange | PushOutcome::Inconsistent => {
                    self.discarded += 1;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn udp_send_receive() {
        let sender_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver_sock.local_addr().unwrap();

        let sid = StreamId::from_bytes([3; 16]);
        let mut tx = LanSender::new(sender_sock, receiver_addr, sid, 1100, BytePacer::new(0.0));
        let mut rx = LanReceiver::new(receiver_sock);

        // Junk first: must be silently discarded.
        let junk = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        junk.send_to(b"definitely not a datagram", receiver_addr).await.unwrap();

        let payload: Bytes = (0..5000u32).map(|i| (i % 256) as u8).collect::<Vec<u8>>().into();
        let recv = tokio::spawn(async move {
            let frame = rx.recv_frame().await.unwrap();
            (frame, rx.discarded())
        });

        let seq = tx.send_frame(&payload, 42, true).await.unwrap();
        assert_eq!(seq, 0);

        let (frame, discarded) = tokio::time::timeout(Duration::from_secs(5), recv)
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(frame.stream_id, sid);
        assert_eq!(frame.seq, 0);
        assert_eq!(frame.timestamp_us, 42);
        assert!(frame.flags.is_keyframe());
        assert_eq!(frame.payload, payload);
        assert_eq!(discarded, 1);
        assert_eq!(tx.bytes_sent(), (5000 + 5 * LAN_HEADER_SIZE) as u64);
    }

    #[tokio::test]
    async fn sequence_numbers_advance() {
        let sender_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut tx = LanSender::new(
            sender_sock,
            sink.local_addr().unwrap(),
            StreamId::default(),
            1100,
            BytePacer::new(0.0),
        );
        for expected in 0..3u32 {
            assert_eq!(tx.send_frame(&Bytes::new(), 0, false).await.unwrap(), expected);
        }
    }
}
