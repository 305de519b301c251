//! Error taxonomy for the media transport pipeline. Mirrors the split the
//! teacher uses between small per-concern `thiserror` enums and a top-level
//! enum composed via `#[from]`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NalError {
    #[error("configuration record version {0} is not supported (expected 1)")]
    UnsupportedConfigurationVersion(u8),
    #[error("configuration record is truncated")]
    Truncated,
}

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("invalid configuration record: {0}")]
    InvalidConfigurationRecord(#[from] NalError),
    #[error("container parse error: {0}")]
    Container(String),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("no encryptor installed for this SSRC; send attempted before protocol ack")]
    EncryptorMissing,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IP discovery did not receive a reply within the timeout")]
    DiscoveryTimeout,
    #[error("UDP socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed IP discovery response")]
    MalformedDiscoveryResponse,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("voice gateway closed (code {0}); eligible for resume")]
    Closed(u16),
    #[error("voice gateway closed fatally (code {0})")]
    Fatal(u16),
    #[error("voice gateway reported an error opcode {0}")]
    ErrorOpcode(i64),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed gateway envelope: {0}")]
    Malformed(#[from] golive_protocol::voice::VoiceEventError),
}

/// Top-level error surfaced to the `PlaySession` orchestrator. Cancellation
/// is deliberately not a variant here: it resolves the session normally.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Demux(#[from] DemuxError),
    #[error(transparent)]
    Nal(#[from] NalError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("invalid stream key: {0}")]
    InvalidStreamKey(#[from] golive_protocol::bridge::InvalidStreamKey),
}
