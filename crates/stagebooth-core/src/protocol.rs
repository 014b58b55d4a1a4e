//! Relay wire protocol.
//!
//! Every frame is a JSON text message `{"type": ..., "payload": ...}`.

use serde::{Deserialize, Serialize};

use crate::errors::BoothError;
use crate::layout::{Room, null_as_default};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Participant,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// One signaling unit relayed between two clients.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct SignalData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

impl SignalData {
    pub fn sdp(desc: SessionDescription) -> Self {
        Self {
            sdp: Some(desc),
            candidate: None,
        }
    }

    pub fn candidate(candidate: IceCandidate) -> Self {
        Self {
            sdp: None,
            candidate: Some(candidate),
        }
    }
}

/// Client → relay.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Join {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Signal {
        to: String,
        data: SignalData,
    },
    StateUpdate {
        state: Room,
    },
    EndSession {
        reason: String,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, BoothError> {
        serde_json::to_string(self).map_err(|e| BoothError::Protocol(e.to_string()))
    }
}

/// Relay → client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        role: Role,
        #[serde(default, deserialize_with = "null_as_default")]
        peers: Vec<String>,
        #[serde(default, deserialize_with = "null_as_default")]
        state: Room,
    },
    PeerJoined {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Room>,
    },
    PeerLeft {
        #[serde(rename = "clientId")]
        client_id: String,
    },
    Signal {
        from: String,
        data: SignalData,
    },
    State {
        #[serde(default, deserialize_with = "null_as_default")]
        state: Room,
    },
    SessionEnded {
        #[serde(default, deserialize_with = "null_as_default")]
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Parse one relay frame. Unknown types and malformed payloads are errors.
    pub fn decode(text: &str) -> Result<Self, BoothError> {
        serde_json::from_str(text).map_err(|e| BoothError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutUnits, Tile};
    use serde_json::json;

    #[test]
    fn join_frame_shape() {
        let msg = ClientMessage::Join {
            room_id: "abc123".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "JOIN", "payload": {"roomId": "abc123"}}));
    }

    #[test]
    fn signal_frame_omits_absent_fields() {
        let msg = ClientMessage::Signal {
            to: "p2".into(),
            data: SignalData::sdp(SessionDescription::offer("v=0")),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "SIGNAL", "payload": {"to": "p2", "data": {"sdp": {"type": "offer", "sdp": "v=0"}}}})
        );
    }

    #[test]
    fn state_update_and_end_session_types() {
        let update = serde_json::to_value(ClientMessage::StateUpdate { state: Room::default() }).unwrap();
        assert_eq!(update["type"], "STATE_UPDATE");
        assert_eq!(update["payload"]["state"]["layoutUnits"], "normalized");

        let end = serde_json::to_value(ClientMessage::EndSession {
            reason: "captured".into(),
        })
        .unwrap();
        assert_eq!(end, json!({"type": "END_SESSION", "payload": {"reason": "captured"}}));
    }

    #[test]
    fn decode_welcome() {
        let text = r##"{"type":"WELCOME","payload":{"clientId":"p2","role":"participant","peers":["p1"],
            "state":{"background":"#123456","layout":{"p1":{"x":10,"y":20,"w":300,"h":200,"z":0}},"layoutUnits":"pixel"}}}"##;
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::Welcome {
                client_id,
                role,
                peers,
                state,
            } => {
                assert_eq!(client_id, "p2");
                assert_eq!(role, Role::Participant);
                assert_eq!(peers, vec!["p1".to_string()]);
                assert_eq!(state.background, "#123456");
                assert_eq!(state.layout_units, LayoutUnits::Pixel);
                assert_eq!(state.tile("p1"), Some(&Tile::new(10.0, 20.0, 300.0, 200.0, 0)));
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
    }

    #[test]
    fn decode_peer_joined_with_and_without_state() {
        let bare = ServerMessage::decode(r#"{"type":"PEER_JOINED","payload":{"clientId":"p3"}}"#).unwrap();
        assert_eq!(
            bare,
            ServerMessage::PeerJoined {
                client_id: "p3".into(),
                state: None
            }
        );

        let with_state =
            ServerMessage::decode(r#"{"type":"PEER_JOINED","payload":{"clientId":"p3","state":{}}}"#).unwrap();
        assert!(matches!(with_state, ServerMessage::PeerJoined { state: Some(_), .. }));
    }

    #[test]
    fn decode_candidate_signal() {
        let text = r#"{"type":"SIGNAL","payload":{"from":"p1","data":{"candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}}}"#;
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::Signal { from, data } => {
                assert_eq!(from, "p1");
                assert!(data.sdp.is_none());
                let c = data.candidate.unwrap();
                assert_eq!(c.sdp_mid.as_deref(), Some("0"));
                assert_eq!(c.sdp_mline_index, Some(0));
            }
            other => panic!("expected Signal, got {other:?}"),
        }
    }

    #[test]
    fn unknown_and_malformed_frames_are_protocol_errors() {
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"KICKED","payload":{}}"#),
            Err(BoothError::Protocol(_))
        ));
        assert!(matches!(ServerMessage::decode("not json"), Err(BoothError::Protocol(_))));
        assert!(matches!(
            ServerMessage::decode(r#"{"type":"PEER_LEFT","payload":{}}"#),
            Err(BoothError::Protocol(_))
        ));
    }
}
