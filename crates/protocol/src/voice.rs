//! Discord voice-gateway v8 opcode envelopes. See `spec.md` §4.7.

use serde::{Deserialize, Serialize};

/// One `{type:"screen", rid:"100", quality:100}` entry in IDENTIFY.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyStream {
    #[serde(rename = "type")]
    pub kind: String,
    pub rid: String,
    pub quality: u32,
}

impl IdentifyStream {
    pub fn screen() -> Self {
        Self {
            kind: "screen".into(),
            rid: "100".into(),
            quality: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyPayload {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    pub video: bool,
    pub streams: Vec<IdentifyStream>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumePayload {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
    pub seq_ack: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectProtocolPayload {
    pub protocol: String,
    pub codecs: Vec<CodecPayloadType>,
    pub data: SelectProtocolData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodecPayloadType {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: u32,
    pub payload_type: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx_payload_type: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub t: i64,
    pub seq_ack: i64,
}

/// `speaking` is a bitmask: 1 = microphone, 2 = soundshare.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpeakingPayload {
    pub delay: u32,
    pub speaking: u8,
    pub ssrc: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoResolution {
    #[serde(rename = "type")]
    pub kind: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    #[serde(rename = "type")]
    pub kind: String,
    pub rid: String,
    pub ssrc: u32,
    pub active: bool,
    pub quality: u32,
    pub rtx_ssrc: u32,
    pub max_bitrate: u32,
    pub max_framerate: u32,
    pub max_resolution: VideoResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoPayload {
    pub audio_ssrc: u32,
    pub video_ssrc: u32,
    pub rtx_ssrc: u32,
    pub streams: Vec<VideoStream>,
}

impl VideoPayload {
    pub fn active(
        audio_ssrc: u32,
        video_ssrc: u32,
        rtx_ssrc: u32,
        max_bitrate: u32,
        max_framerate: u32,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            audio_ssrc,
            video_ssrc,
            rtx_ssrc,
            streams: vec![VideoStream {
                kind: "video".into(),
                rid: "100".into(),
                ssrc: video_ssrc,
                active: true,
                quality: 100,
                rtx_ssrc,
                max_bitrate,
                max_framerate,
                max_resolution: VideoResolution {
                    kind: "fixed".into(),
                    width,
                    height,
                },
            }],
        }
    }

    pub fn deactivated(audio_ssrc: u32) -> Self {
        Self {
            audio_ssrc,
            video_ssrc: 0,
            rtx_ssrc: 0,
            streams: Vec::new(),
        }
    }
}

/// Opcode envelopes sent from the core to the voice gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "d")]
pub enum VoiceOutgoing {
    #[serde(rename = "0")]
    Identify(IdentifyPayload),
    #[serde(rename = "1")]
    SelectProtocol(SelectProtocolPayload),
    #[serde(rename = "3")]
    Heartbeat(HeartbeatPayload),
    #[serde(rename = "5")]
    Speaking(SpeakingPayload),
    #[serde(rename = "7")]
    Resume(ResumePayload),
    #[serde(rename = "12")]
    Video(VideoPayload),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelloPayload {
    pub heartbeat_interval: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadyStreamEntry {
    pub ssrc: u32,
    pub rtx_ssrc: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReadyPayload {
    pub ip: String,
    pub port: u16,
    pub ssrc: u32,
    pub streams: Vec<ReadyStreamEntry>,
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SelectProtocolAckPayload {
    pub secret_key: Vec<u8>,
    pub mode: String,
}

/// Incoming events dispatched off the raw JSON opcode envelope.
///
/// `Speaking`/`HeartbeatAck` (ops 5/6) and any op >= 4000 collapse into
/// `Ignored`/`GatewayError` respectively; the caller logs and moves on.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Hello(HelloPayload),
    Ready(ReadyPayload),
    SelectProtocolAck(SelectProtocolAckPayload),
    Resumed,
    Ignored,
    GatewayError(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum VoiceEventError {
    #[error("malformed voice gateway envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("voice gateway envelope missing required field: {0}")]
    MissingField(&'static str),
}

/// Parses a raw `{op, d, seq}` envelope into a typed event plus the `seq`
/// field (if present), per spec.md §4.7's "any inbound message with a `seq`
/// field updates `sequence_number`" rule.
pub fn parse_voice_event(raw: &str) -> Result<(VoiceEvent, Option<i64>), VoiceEventError> {
    let envelope: serde_json::Value = serde_json::from_str(raw)?;
    let seq = envelope.get("seq").and_then(|v| v.as_i64());
    let op = envelope
        .get("op")
        .and_then(|v| v.as_i64())
        .ok_or(VoiceEventError::MissingField("op"))?;
    let data = envelope.get("d").cloned().unwrap_or(serde_json::Value::Null);

    let event = match op {
        8 => VoiceEvent::Hello(serde_json::from_value(data)?),
        2 => VoiceEvent::Ready(serde_json::from_value(data)?),
        4 => VoiceEvent::SelectProtocolAck(serde_json::from_value(data)?),
        9 => VoiceEvent::Resumed,
        5 | 6 => VoiceEvent::Ignored,
        op if op >= 4000 => VoiceEvent::GatewayError(op),
        _ => VoiceEvent::Ignored,
    };
    Ok((event, seq))
}

pub const CODEC_PAYLOAD_TYPES: &[(&str, u8, Option<u8>)] = &[
    ("opus", 120, None),
    ("H264", 101, Some(102)),
    ("H265", 103, Some(104)),
    ("VP8", 105, Some(106)),
    ("VP9", 107, Some(108)),
    ("AV1", 109, Some(110)),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_serializes_with_tagged_opcode() {
        let payload = VoiceOutgoing::Identify(IdentifyPayload {
            server_id: "1".into(),
            user_id: "2".into(),
            session_id: "s".into(),
            token: "t".into(),
            video: true,
            streams: vec![IdentifyStream::screen()],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["op"], "0");
        assert_eq!(json["d"]["streams"][0]["rid"], "100");
    }

    #[test]
    fn video_active_and_deactivated_forms() {
        let active = VideoPayload::active(1, 2, 3, 5_000_000, 30, 1920, 1080);
        assert_eq!(active.streams.len(), 1);
        assert!(active.streams[0].active);

        let off = VideoPayload::deactivated(1);
        assert_eq!(off.video_ssrc, 0);
        assert_eq!(off.rtx_ssrc, 0);
        assert!(off.streams.is_empty());
    }

    #[test]
    fn parses_hello() {
        let raw = r#"{"op":8,"d":{"heartbeat_interval":41250.0}}"#;
        let (event, seq) = parse_voice_event(raw).unwrap();
        assert_eq!(
            event,
            VoiceEvent::Hello(HelloPayload {
                heartbeat_interval: 41250.0
            })
        );
        assert_eq!(seq, None);
    }

    #[test]
    fn parses_ready_with_streams_and_modes() {
        let raw = r#"{"op":2,"d":{"ip":"1.2.3.4","port":8080,"ssrc":11,
            "streams":[{"ssrc":11,"rtx_ssrc":12}],"modes":["aead_aes256_gcm_rtpsize"]}}"#;
        let (event, _) = parse_voice_event(raw).unwrap();
        match event {
            VoiceEvent::Ready(r) => {
                assert_eq!(r.ip, "1.2.3.4");
                assert_eq!(r.streams[0].rtx_ssrc, 12);
                assert_eq!(r.modes, vec!["aead_aes256_gcm_rtpsize"]);
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn parses_resumed_and_tracks_seq() {
        let raw = r#"{"op":9,"d":null,"seq":42}"#;
        let (event, seq) = parse_voice_event(raw).unwrap();
        assert_eq!(event, VoiceEvent::Resumed);
        assert_eq!(seq, Some(42));
    }

    #[test]
    fn classifies_error_opcodes_and_ignores_informational_ones() {
        let (event, _) = parse_voice_event(r#"{"op":4006}"#).unwrap();
        assert_eq!(event, VoiceEvent::GatewayError(4006));

        let (event, _) = parse_voice_event(r#"{"op":5,"d":{}}"#).unwrap();
        assert_eq!(event, VoiceEvent::Ignored);
    }

    #[test]
    fn codec_payload_types_match_fixed_table() {
        let h264 = CODEC_PAYLOAD_TYPES
            .iter()
            .find(|(name, ..)| *name == "H264")
            .unwrap();
        assert_eq!(h264.1, 101);
        assert_eq!(h264.2, Some(102));
    }
}
