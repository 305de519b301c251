//! Typed boundary between the core and the externally-owned application
//! gateway: four events flow in, four opcodes flow out. See `spec.md` §6.

use serde::{Deserialize, Serialize};

/// Opaque identifier for a Go-Live broadcast session.
///
/// Grammar: `guild:<guildId>:<channelId>:<userId>` | `call:<channelId>:<userId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    Guild {
        guild_id: String,
        channel_id: String,
        user_id: String,
    },
    Call {
        channel_id: String,
        user_id: String,
    },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid stream key: {0:?}")]
pub struct InvalidStreamKey(pub String);

impl std::str::FromStr for StreamKey {
    type Err = InvalidStreamKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            ["guild", guild_id, channel_id, user_id]
                if !guild_id.is_empty() && !channel_id.is_empty() && !user_id.is_empty() =>
            {
                Ok(StreamKey::Guild {
                    guild_id: guild_id.to_string(),
                    channel_id: channel_id.to_string(),
                    user_id: user_id.to_string(),
                })
            }
            ["call", channel_id, user_id] if !channel_id.is_empty() && !user_id.is_empty() => {
                Ok(StreamKey::Call {
                    channel_id: channel_id.to_string(),
                    user_id: user_id.to_string(),
                })
            }
            _ => Err(InvalidStreamKey(s.to_string())),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKey::Guild {
                guild_id,
                channel_id,
                user_id,
            } => write!(f, "guild:{guild_id}:{channel_id}:{user_id}"),
            StreamKey::Call {
                channel_id,
                user_id,
            } => write!(f, "call:{channel_id}:{user_id}"),
        }
    }
}

/// `server_id` is the guild id, or when absent (DM/call), the channel id.
impl StreamKey {
    pub fn server_id(&self) -> &str {
        match self {
            StreamKey::Guild { guild_id, .. } => guild_id,
            StreamKey::Call { channel_id, .. } => channel_id,
        }
    }

    pub fn channel_id(&self) -> &str {
        match self {
            StreamKey::Guild { channel_id, .. } => channel_id,
            StreamKey::Call { channel_id, .. } => channel_id,
        }
    }
}

/// Events injected from the externally-owned application gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// VOICE_STATE_UPDATE matching the bot user.
    VoiceStateUpdate { session_id: String },
    /// VOICE_SERVER_UPDATE matching the guild.
    VoiceServerUpdate { endpoint: String, token: String },
    /// STREAM_CREATE matching the stream key.
    StreamCreate { stream_key: StreamKey },
    /// STREAM_SERVER_UPDATE matching the stream key.
    StreamServerUpdate { endpoint: String, token: String },
}

/// Opcodes emitted to the externally-owned application gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "d")]
pub enum BridgeOpcode {
    /// op 4: VOICE_STATE_UPDATE.
    #[serde(rename = "4")]
    VoiceStateUpdate(VoiceStateUpdatePayload),
    /// op 18: STREAM_CREATE.
    #[serde(rename = "18")]
    StreamCreate(StreamCreatePayload),
    /// op 22: STREAM_SET_PAUSED.
    #[serde(rename = "22")]
    StreamSetPaused(StreamSetPausedPayload),
    /// op 19: STREAM_DELETE.
    #[serde(rename = "19")]
    StreamDelete(StreamDeletePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    /// Preserved literally per spec.md §9 open question: some call sites set
    /// this true on join and false on leave, others the opposite. Do not
    /// normalize the asymmetry away.
    pub self_deaf: bool,
    pub self_video: bool,
}

impl VoiceStateUpdatePayload {
    pub fn join(guild_id: Option<String>, channel_id: String) -> Self {
        Self {
            guild_id,
            channel_id: Some(channel_id),
            self_mute: false,
            self_deaf: true,
            self_video: false,
        }
    }

    pub fn leave(guild_id: Option<String>) -> Self {
        Self {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
            self_video: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamCreatePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub preferred_region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSetPausedPayload {
    pub stream_key: String,
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamDeletePayload {
    pub stream_key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_guild_stream_key() {
        let key: StreamKey = "guild:123:456:789".parse().unwrap();
        assert_eq!(
            key,
            StreamKey::Guild {
                guild_id: "123".into(),
                channel_id: "456".into(),
                user_id: "789".into(),
            }
        );
        assert_eq!(key.server_id(), "123");
    }

    #[test]
    fn parses_call_stream_key() {
        let key: StreamKey = "call:456:789".parse().unwrap();
        assert_eq!(
            key,
            StreamKey::Call {
                channel_id: "456".into(),
                user_id: "789".into(),
            }
        );
        assert_eq!(key.server_id(), "456");
    }

    #[test]
    fn rejects_malformed_stream_key() {
        assert!("guild:123".parse::<StreamKey>().is_err());
        assert!("nonsense".parse::<StreamKey>().is_err());
        assert!("guild:123::789".parse::<StreamKey>().is_err());
    }

    #[test]
    fn stream_key_roundtrips_through_display() {
        let key: StreamKey = "guild:1:2:3".parse().unwrap();
        assert_eq!(key.to_string(), "guild:1:2:3");
        let key: StreamKey = "call:2:3".parse().unwrap();
        assert_eq!(key.to_string(), "call:2:3");
    }

    #[test]
    fn voice_state_update_join_and_leave_preserve_asymmetric_self_deaf() {
        let join = VoiceStateUpdatePayload::join(Some("1".into()), "2".into());
        assert!(join.self_deaf);
        let leave = VoiceStateUpdatePayload::leave(Some("1".into()));
        assert!(!leave.self_deaf);
    }
}
