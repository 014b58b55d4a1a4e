use std::sync::Arc;

use stagebooth_video::CapturedImage;

use crate::layout::Room;
use crate::peers::LinkState;
use crate::protocol::Role;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum BoothEvent {
    ConnectionStateChanged(ConnectionState),
    Joined {
        self_id: String,
        role: Role,
        share_link: String,
    },
    ParticipantJoined(ParticipantInfo),
    ParticipantLeft(String), // participant id
    PeerStateChanged {
        participant_id: String,
        state: LinkState,
    },
    MediaReady {
        participant_id: String,
    },
    RoomStateChanged(Room),
    CaptureReady {
        image: CapturedImage,
        captured_at: String, // RFC 3339
    },
    ServerNotice(String),
    SessionEnded {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantInfo {
    pub id: String,
    /// Known for the local participant, and for everyone when the local
    /// participant is master.
    pub role: Option<Role>,
    pub is_local: bool,
    pub link_state: LinkState,
    pub has_video: bool,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait BoothEventListener: Send + Sync {
    fn on_event(&self, event: BoothEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<std::sync::RwLock<Vec<Arc<dyn BoothEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn BoothEventListener>) {
        self.listeners.write().unwrap().push(listener);
    }

    pub fn emit(&self, event: BoothEvent) {
        let listeners = self.listeners.read().unwrap();
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EventLog;

    #[test]
    fn every_listener_on_every_clone_receives_events() {
        let emitter = EventEmitter::new();
        let first = Arc::new(EventLog::default());
        let second = Arc::new(EventLog::default());
        emitter.add_listener(first.clone());
        emitter.clone().add_listener(second.clone());

        emitter.emit(BoothEvent::ConnectionStateChanged(ConnectionState::Connected));
        emitter.emit(BoothEvent::SessionEnded {
            reason: "captured".into(),
        });

        assert_eq!(first.events().len(), 2);
        assert_eq!(second.events().len(), 2);
        match &first.events()[1] {
            BoothEvent::SessionEnded { reason } => assert_eq!(reason, "captured"),
            other => panic!("expected SessionEnded, got {other:?}"),
        }
    }
}
