//! Local and remote media handles.
//!
//! Media is produced and decoded by the host platform; the core only routes
//! tracks between peer connections and the matte pipelines.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use stagebooth_video::FrameSource;

use crate::errors::BoothError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One media track. Video tracks carry the decoded frame feed.
#[derive(Clone)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    pub frames: Option<Arc<dyn FrameSource>>,
}

impl MediaTrack {
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
            frames: None,
        }
    }

    pub fn video(id: impl Into<String>, frames: Arc<dyn FrameSource>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
            frames: Some(frames),
        }
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("has_frames", &self.frames.is_some())
            .finish()
    }
}

/// Camera + microphone, acquired once per session.
#[derive(Debug, Clone, Default)]
pub struct LocalMedia {
    pub tracks: Vec<MediaTrack>,
}

impl LocalMedia {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn video(&self) -> Option<Arc<dyn FrameSource>> {
        first_video(&self.tracks)
    }
}

/// Inbound media from one peer.
///
/// Transports may deliver audio and video as separate track events; they
/// accumulate on the same handle.
#[derive(Debug, Clone, Default)]
pub struct RemoteMedia {
    tracks: Vec<MediaTrack>,
}

impl RemoteMedia {
    /// Add `track`, replacing a track with the same id.
    pub fn merge(&mut self, track: MediaTrack) {
        match self.tracks.iter_mut().find(|t| t.id == track.id) {
            Some(existing) => *existing = track,
            None => self.tracks.push(track),
        }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video(&self) -> Option<Arc<dyn FrameSource>> {
        first_video(&self.tracks)
    }
}

fn first_video(tracks: &[MediaTrack]) -> Option<Arc<dyn FrameSource>> {
    tracks
        .iter()
        .filter(|t| t.kind == TrackKind::Video)
        .find_map(|t| t.frames.clone())
}

/// Platform camera/microphone acquisition.
pub trait MediaDevices: Send + Sync + 'static {
    /// Fails with [`BoothError::Media`] when the devices are unavailable or denied.
    fn acquire(&self) -> impl Future<Output = Result<LocalMedia, BoothError>> + Send;
}
