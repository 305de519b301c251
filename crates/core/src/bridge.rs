//! Push API boundary to the externally-owned application gateway (§6):
//! one method per inbound event, a single outbound opcode sink. Silent on
//! how the caller intercepts VOICE_STATE_UPDATE/VOICE_SERVER_UPDATE/
//! STREAM_CREATE/STREAM_SERVER_UPDATE off its own gateway connection --
//! this struct is the only contract.

use tokio::sync::mpsc;

use golive_protocol::bridge::{BridgeOpcode, StreamKey};

use crate::gateway::SessionCredentials;

/// Fed by the externally-owned application gateway; feeds `BridgeOpcode`s
/// back out to it. Mirrors `SignalingCtx`'s role in the teacher as a thin
/// struct of shared state rather than a task of its own.
pub struct GatewayBridge {
    pub credentials: SessionCredentials,
    pub stream_key: Option<StreamKey>,
    pub stream_endpoint: Option<String>,
    pub stream_token: Option<String>,
    outgoing: mpsc::Sender<BridgeOpcode>,
}

impl GatewayBridge {
    pub fn new(outgoing: mpsc::Sender<BridgeOpcode>) -> Self {
        Self {
            credentials: SessionCredentials::default(),
            stream_key: None,
            stream_endpoint: None,
            stream_token: None,
            outgoing,
        }
    }

    pub fn on_voice_state_update(&mut self, session_id: String) {
        self.credentials.set_session_id(session_id);
    }

    pub fn on_voice_server_update(&mut self, endpoint: String, token: String) {
        self.credentials.set_server(endpoint, token);
    }

    pub fn on_stream_create(&mut self, stream_key: StreamKey) {
        self.stream_key = Some(stream_key);
    }

    pub fn on_stream_server_update(&mut self, endpoint: String, token: String) {
        self.stream_endpoint = Some(endpoint);
        self.stream_token = Some(token);
    }

    pub fn voice_ready(&self) -> bool {
        self.credentials.is_complete()
    }

    pub fn stream_ready(&self) -> bool {
        self.stream_key.is_some() && self.stream_endpoint.is_some() && self.stream_token.is_some()
    }

    pub async fn send(&self, opcode: BridgeOpcode) -> bool {
        self.outgoing.send(opcode).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn voice_ready_only_after_both_halves_arrive() {
        let (tx, _rx) = mpsc::channel(8);
        let mut bridge = GatewayBridge::new(tx);
        assert!(!bridge.voice_ready());
        bridge.on_voice_state_update("sess".into());
        assert!(!bridge.voice_ready());
        bridge.on_voice_server_update("endpoint".into(), "token".into());
        assert!(bridge.voice_ready());
    }

    #[tokio::test]
    async fn stream_ready_requires_key_endpoint_and_token() {
        let (tx, _rx) = mpsc::channel(8);
        let mut bridge = GatewayBridge::new(tx);
        assert!(!bridge.stream_ready());
        bridge.on_stream_create(StreamKey::Call {
            channel_id: "1".into(),
            user_id: "2".into(),
        });
        bridge.on_stream_server_update("e".into(), "t".into());
        assert!(bridge.stream_ready());
    }

    #[tokio::test]
    async fn send_forwards_opcode_to_outgoing_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let bridge = GatewayBridge::new(tx);
        let opcode = BridgeOpcode::StreamDelete(golive_protocol::bridge::StreamDeletePayload {
            stream_key: "call:1:2".into(),
        });
        assert!(bridge.send(opcode.clone()).await);
        assert_eq!(rx.recv().await, Some(opcode));
    }
}
