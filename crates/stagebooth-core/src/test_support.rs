//! Fakes for the platform capabilities, shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgba, RgbaImage};
use stagebooth_video::{FrameSource, Matting, VideoError};
use tokio::sync::mpsc;

use crate::errors::BoothError;
use crate::events::{BoothEvent, BoothEventListener};
use crate::media::{LocalMedia, MediaDevices, MediaTrack};
use crate::peers::{PeerConnection, PeerConnector, PeerEventSink};
use crate::protocol::{ClientMessage, IceCandidate, SdpType, SessionDescription};
use crate::settings::IceServer;
use crate::signaling::SignalingClient;

/// Frame source that always returns the same solid frame.
pub struct SolidSource {
    frame: RgbaImage,
}

impl SolidSource {
    pub fn new(width: u32, height: u32, color: Rgba<u8>) -> Arc<Self> {
        Arc::new(Self {
            frame: RgbaImage::from_pixel(width, height, color),
        })
    }

    pub fn red(width: u32, height: u32) -> Arc<Self> {
        Self::new(width, height, Rgba([255, 0, 0, 255]))
    }
}

impl FrameSource for SolidSource {
    fn latest_frame(&self) -> Option<RgbaImage> {
        Some(self.frame.clone())
    }
}

pub struct Passthrough;

impl Matting for Passthrough {
    fn matte(&self, frame: &RgbaImage) -> Result<RgbaImage, VideoError> {
        Ok(frame.clone())
    }
}

/// Outbound relay queue the test can inspect.
pub fn signaling() -> (SignalingClient, mpsc::UnboundedReceiver<ClientMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalingClient::new(tx), rx)
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

/// Poll `cond` for up to a second.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

/// Listener that keeps every event it sees.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<BoothEvent>>,
}

impl BoothEventListener for EventLog {
    fn on_event(&self, event: BoothEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventLog {
    pub fn events(&self) -> Vec<BoothEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&BoothEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|&e| pred(e)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
struct MockState {
    calls: HashMap<String, Vec<Call>>,
    sinks: HashMap<String, PeerEventSink>,
    failing_candidates: HashSet<String>,
    created: Vec<String>,
}

/// Records every call made on the connections it creates.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn calls(&self, peer_id: &str) -> Vec<Call> {
        self.state.lock().unwrap().calls.get(peer_id).cloned().unwrap_or_default()
    }

    pub fn sink(&self, peer_id: &str) -> PeerEventSink {
        self.state.lock().unwrap().sinks[peer_id].clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    /// Make `add_ice_candidate` fail for this candidate string.
    pub fn fail_candidate(&self, candidate: &str) {
        self.state.lock().unwrap().failing_candidates.insert(candidate.to_string());
    }
}

impl PeerConnector for MockConnector {
    type Connection = MockConnection;

    async fn create(
        &self,
        peer_id: &str,
        _ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> Result<MockConnection, BoothError> {
        let mut state = self.state.lock().unwrap();
        state.created.push(peer_id.to_string());
        state.calls.entry(peer_id.to_string()).or_default();
        state.sinks.insert(peer_id.to_string(), events);
        Ok(MockConnection {
            peer_id: peer_id.to_string(),
            state: self.state.clone(),
        })
    }
}

pub struct MockConnection {
    peer_id: String,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    fn record(&self, call: Call) {
        self.state
            .lock()
            .unwrap()
            .calls
            .entry(self.peer_id.clone())
            .or_default()
            .push(call);
    }
}

impl PeerConnection for MockConnection {
    async fn add_track(&self, track: &MediaTrack) -> Result<(), BoothError> {
        self.record(Call::AddTrack(track.id.clone()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, BoothError> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription::offer(format!("offer-to-{}", self.peer_id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, BoothError> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-to-{}", self.peer_id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), BoothError> {
        self.record(Call::SetLocal(desc.kind));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), BoothError> {
        self.record(Call::SetRemote(desc.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), BoothError> {
        self.record(Call::AddCandidate(candidate.candidate.clone()));
        let failing = self
            .state
            .lock()
            .unwrap()
            .failing_candidates
            .contains(&candidate.candidate);
        if failing {
            Err(BoothError::Negotiation(format!("bad candidate {}", candidate.candidate)))
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Camera + microphone that either work or are denied.
#[derive(Clone, Default)]
pub struct MockDevices {
    pub denied: bool,
}

impl MediaDevices for MockDevices {
    async fn acquire(&self) -> Result<LocalMedia, BoothError> {
        if self.denied {
            return Err(BoothError::Media("camera permission denied".into()));
        }
        Ok(local_media())
    }
}

/// Microphone "mic" plus an 8x6 red camera "cam".
pub fn local_media() -> LocalMedia {
    LocalMedia::new(vec![
        MediaTrack::audio("mic"),
        MediaTrack::video("cam", SolidSource::red(8, 6)),
    ])
}
