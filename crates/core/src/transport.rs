//! UDP transport (C6): the session's single UDP/IPv4 socket, Discord v8 IP
//! discovery, and the packetizer factory this layer owns. Grounded on the
//! `UdpSocket::bind`/`send_to`/`recv_from` discovery handshake shape from the
//! `other_examples` Discord voice-connection reference, adapted to
//! tokio's async socket and this wire's exact byte layout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::crypto::AnyEncryptor;
use crate::error::TransportError;
use crate::nal::{ParameterSets, VideoCodec};
use crate::packetizer::{AudioPacketizer, VideoPacketizer};

pub const DISCOVERY_REQUEST_LEN: usize = 74;

/// 74-byte request: `[0x00 0x01][0x00 0x46]` (type=1, length=70), the SSRC,
/// then 68 zero bytes.
pub fn build_discovery_request(ssrc: u32) -> [u8; DISCOVERY_REQUEST_LEN] {
    let mut buf = [0u8; DISCOVERY_REQUEST_LEN];
    buf[0..2].copy_from_slice(&[0x00, 0x01]);
    buf[2..4].copy_from_slice(&[0x00, 0x46]);
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAddress {
    pub ip: String,
    pub port: u16,
}

/// Parses `[type u16][length u16][ssrc u32][ip 64 zero-terminated ASCII][port u16]`.
/// IP is bytes 8..72 with trailing NULs/whitespace stripped; port is the
/// trailing two bytes, big-endian.
pub fn parse_discovery_response(data: &[u8]) -> Result<DiscoveredAddress, TransportError> {
    if data.len() < DISCOVERY_REQUEST_LEN {
        return Err(TransportError::MalformedDiscoveryResponse);
    }
    let ip_field = &data[8..72];
    let nul = ip_field.iter().position(|&b| b == 0).unwrap_or(ip_field.len());
    let ip = std::str::from_utf8(&ip_field[..nul])
        .map_err(|_| TransportError::MalformedDiscoveryResponse)?
        .trim()
        .to_string();
    if ip.is_empty() {
        return Err(TransportError::MalformedDiscoveryResponse);
    }
    let port = u16::from_be_bytes([data[72], data[73]]);
    Ok(DiscoveredAddress { ip, port })
}

/// Owns the session's single UDP socket. `send_packet` is fire-and-forget
/// and silently drops before discovery completes or after shutdown; the OS
/// write itself is thread-safe and single-datagram-atomic, so either
/// packetizer may call it without additional locking.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    ready: AtomicBool,
}

impl UdpTransport {
    pub async fn bind(remote: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(remote).await?;
        Ok(Self {
            socket: Arc::new(socket),
            ready: AtomicBool::new(false),
        })
    }

    pub async fn discover_ip(
        &self,
        ssrc: u32,
        timeout: Duration,
    ) -> Result<DiscoveredAddress, TransportError> {
        let request = build_discovery_request(ssrc);
        self.socket.send(&request).await?;

        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| TransportError::DiscoveryTimeout)??;

        let addr = parse_discovery_response(&buf[..n])?;
        self.ready.store(true, Ordering::Release);
        Ok(addr)
    }

    pub async fn send_packet(&self, bytes: &[u8]) {
        if !self.ready.load(Ordering::Acquire) {
            return;
        }
        let _ = self.socket.send(bytes).await;
    }

    /// Idempotent: subsequent calls are no-ops, and any in-flight or future
    /// `send_packet` silently drops once this has run.
    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

pub struct Packetizers {
    pub video: VideoPacketizer,
    pub audio: AudioPacketizer,
}

/// Instantiates C3: one encryptor per SSRC so nonce counters for audio and
/// video never share state, keyed from the same transport secret and mode.
#[allow(clippy::too_many_arguments)]
pub fn setup_packetizers(
    audio_ssrc: u32,
    video_ssrc: u32,
    video_codec: VideoCodec,
    video_payload_type: u8,
    audio_payload_type: u8,
    parameter_sets: ParameterSets,
    mode: &str,
    key: &[u8; 32],
    mtu: usize,
    sr_interval_ms: i64,
) -> Option<Packetizers> {
    let video_encryptor = AnyEncryptor::for_mode(mode, key)?;
    let audio_encryptor = AnyEncryptor::for_mode(mode, key)?;
    Some(Packetizers {
        video: VideoPacketizer::new(
            video_codec,
            video_ssrc,
            video_payload_type,
            parameter_sets,
            video_encryptor,
            mtu,
            sr_interval_ms,
        ),
        audio: AudioPacketizer::new(audio_ssrc, audio_payload_type, audio_encryptor, sr_interval_ms),
    })
}
