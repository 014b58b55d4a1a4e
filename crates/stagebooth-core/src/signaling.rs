//! Relay connection: one WebSocket per client, typed messages in and out.

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use crate::errors::BoothError;
use crate::layout::Room;
use crate::protocol::{ClientMessage, Role, ServerMessage, SignalData};

/// Identity and initial state assigned by the relay on join.
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    pub self_id: String,
    pub role: Role,
    pub peers: Vec<String>,
    pub room: Room,
}

/// Events surfaced from the relay connection.
///
/// `Disconnected` is terminal: it is always the last event of a feed.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    Welcome(Welcome),
    PeerJoined { id: String, room: Option<Room> },
    PeerLeft { id: String },
    Signal { from: String, data: SignalData },
    State(Room),
    SessionEnded { reason: String },
    ServerError { message: String },
    Disconnected { reason: Option<String> },
}

impl From<ServerMessage> for SignalingEvent {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Welcome {
                client_id,
                role,
                peers,
                state,
            } => SignalingEvent::Welcome(Welcome {
                self_id: client_id,
                role,
                peers,
                room: state,
            }),
            ServerMessage::PeerJoined { client_id, state } => SignalingEvent::PeerJoined {
                id: client_id,
                room: state,
            },
            ServerMessage::PeerLeft { client_id } => SignalingEvent::PeerLeft { id: client_id },
            ServerMessage::Signal { from, data } => SignalingEvent::Signal { from, data },
            ServerMessage::State { state } => SignalingEvent::State(state),
            ServerMessage::SessionEnded { reason } => SignalingEvent::SessionEnded { reason },
            ServerMessage::Error { message } => SignalingEvent::ServerError { message },
        }
    }
}

pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

/// Outbound half of a relay connection.
///
/// Sending never blocks; messages queue until the writer task flushes them.
/// Dropping every clone closes the connection.
#[derive(Debug, Clone)]
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalingClient {
    /// Wrap an existing outbound queue (used by alternative transports).
    pub fn new(outbound: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { outbound }
    }

    /// Open a relay connection and send `JOIN` for `room_id`.
    pub async fn connect(relay_url: &str, room_id: &str) -> Result<(Self, SignalingEvents), BoothError> {
        let url = Url::parse(relay_url)
            .map_err(|e| BoothError::Config(format!("invalid relay url '{relay_url}': {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(BoothError::Config(format!(
                "relay url must use ws:// or wss://, got '{}'",
                url.scheme()
            )));
        }

        tracing::info!("connecting to relay {url}");
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| BoothError::Transport(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("dropping unencodable relay message: {e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!("relay send failed: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::debug!("relay writer finished");
        });

        tokio::spawn(read_loop(stream, event_tx));

        let client = Self::new(outbound_tx);
        client.send(ClientMessage::Join {
            room_id: room_id.to_string(),
        });
        Ok((client, event_rx))
    }

    /// Fire-and-forget send.
    pub fn send(&self, message: ClientMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!("relay connection closed, outbound message dropped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Turns relay text frames into events, enforcing one `Welcome` per connection.
#[derive(Debug, Default)]
pub struct EventDecoder {
    welcomed: bool,
}

impl EventDecoder {
    /// `None` for frames that must be dropped.
    pub fn decode(&mut self, text: &str) -> Option<SignalingEvent> {
        let msg = match ServerMessage::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("dropping relay frame: {e}");
                return None;
            }
        };

        let event = SignalingEvent::from(msg);
        if matches!(event, SignalingEvent::Welcome(_)) {
            if self.welcomed {
                tracing::warn!("duplicate WELCOME from relay ignored");
                return None;
            }
            self.welcomed = true;
        }
        Some(event)
    }
}

async fn read_loop<S>(mut stream: S, events: mpsc::UnboundedSender<SignalingEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut decoder = EventDecoder::default();

    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = decoder.decode(&text) {
                    if events.send(event).is_err() {
                        // Nobody is listening any more.
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                break Some(
                    frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string()),
                );
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break Some(e.to_string()),
            None => break Some("relay stream ended".to_string()),
        }
    };

    tracing::info!("relay connection closed: {}", reason.as_deref().unwrap_or("unknown"));
    let _ = events.send(SignalingEvent::Disconnected { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const WELCOME: &str =
        r#"{"type":"WELCOME","payload":{"clientId":"p1","role":"master","peers":[],"state":{}}}"#;

    #[test]
    fn welcome_is_emitted_once() {
        let mut decoder = EventDecoder::default();
        match decoder.decode(WELCOME) {
            Some(SignalingEvent::Welcome(w)) => {
                assert_eq!(w.self_id, "p1");
                assert_eq!(w.role, Role::Master);
                assert!(w.peers.is_empty());
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
        assert_eq!(decoder.decode(WELCOME), None);
    }

    #[test]
    fn null_room_fields_fall_back_to_defaults() {
        let mut decoder = EventDecoder::default();
        let welcome = r#"{"type":"WELCOME","payload":{"clientId":"p1","role":"master","peers":null,"state":null}}"#;
        match decoder.decode(welcome) {
            Some(SignalingEvent::Welcome(w)) => {
                assert!(w.peers.is_empty());
                assert_eq!(w.room, Room::default());
            }
            other => panic!("expected Welcome, got {other:?}"),
        }

        let state = r#"{"type":"STATE","payload":{"state":{"background":null,"layout":null,"layoutUnits":null}}}"#;
        assert_eq!(decoder.decode(state), Some(SignalingEvent::State(Room::default())));

        let joined = r#"{"type":"PEER_JOINED","payload":{"clientId":"p2","state":null}}"#;
        assert_eq!(
            decoder.decode(joined),
            Some(SignalingEvent::PeerJoined {
                id: "p2".into(),
                room: None
            })
        );
    }

    #[test]
    fn unknown_frames_are_dropped() {
        let mut decoder = EventDecoder::default();
        assert_eq!(decoder.decode(r#"{"type":"PING","payload":{}}"#), None);
        assert_eq!(decoder.decode("{{{"), None);
        assert_eq!(
            decoder.decode(r#"{"type":"PEER_LEFT","payload":{"clientId":"p9"}}"#),
            Some(SignalingEvent::PeerLeft { id: "p9".into() })
        );
    }

    #[test]
    fn server_error_is_a_notice() {
        let mut decoder = EventDecoder::default();
        assert_eq!(
            decoder.decode(r#"{"type":"ERROR","payload":{"message":"room full"}}"#),
            Some(SignalingEvent::ServerError {
                message: "room full".into()
            })
        );
    }

    #[tokio::test]
    async fn read_loop_ends_with_disconnected() {
        let frames = vec![
            Ok(Message::Text(WELCOME.to_string())),
            Ok(Message::Ping(vec![1])),
            Ok(Message::Text("garbage".to_string())),
            Ok(Message::Text(r#"{"type":"SESSION_ENDED","payload":{"reason":"captured"}}"#.to_string())),
        ];
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_loop(stream::iter(frames), tx).await;

        assert!(matches!(rx.recv().await, Some(SignalingEvent::Welcome(_))));
        assert_eq!(
            rx.recv().await,
            Some(SignalingEvent::SessionEnded {
                reason: "captured".into()
            })
        );
        assert_eq!(
            rx.recv().await,
            Some(SignalingEvent::Disconnected {
                reason: Some("relay stream ended".into())
            })
        );
    }

    #[tokio::test]
    async fn read_loop_reports_transport_errors() {
        let frames = vec![Err(WsError::ConnectionClosed)];
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_loop(stream::iter(frames), tx).await;

        match rx.recv().await {
            Some(SignalingEvent::Disconnected { reason: Some(_) }) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_rejects_non_websocket_urls() {
        let err = SignalingClient::connect("https://relay.example.com", "abc123").await;
        assert!(matches!(err, Err(BoothError::Config(_))));
        let err = SignalingClient::connect("not a url", "abc123").await;
        assert!(matches!(err, Err(BoothError::Config(_))));
    }

    #[test]
    fn send_after_close_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = SignalingClient::new(tx);
        drop(rx);
        assert!(client.is_closed());
        client.send(ClientMessage::EndSession {
            reason: "captured".into(),
        });
    }
}
