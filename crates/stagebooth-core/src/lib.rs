//! Stagebooth core: room coordination for a multi-device photo booth.
//!
//! Participants on separate devices join a room over a relay, connect to
//! each other in a peer-to-peer mesh, share one master-controlled stage
//! layout and end the session with a single composited capture. Platform
//! media, peer connections and matting come in through capability traits.

pub mod compositor;
pub mod errors;
pub mod events;
pub mod layout;
pub mod link;
pub mod media;
pub mod participants;
pub mod peers;
pub mod protocol;
pub mod room;
pub mod settings;
pub mod signaling;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::BoothError;
pub use events::{BoothEvent, BoothEventListener, ConnectionState, ParticipantInfo};
pub use layout::{Room, RoomPatch, StageSize, Tile};
pub use link::RoomLink;
pub use media::{LocalMedia, MediaDevices, MediaTrack, RemoteMedia, TrackKind};
pub use peers::{LinkState, PeerConnection, PeerConnector, PeerEventSink, TransportState};
pub use protocol::Role;
pub use room::{JoinInfo, RoomController};
pub use settings::{BoothSettings, SettingsStore};
pub use stagebooth_video::{CapturedImage, FrameSource, ImageFormat, Matting};

/// Initialize tracing/logging. Safe to call more than once.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "stagebooth_core=debug,stagebooth_video=info".parse().unwrap()),
            )
            .with_ansi(false)
            .init();
    });
}
