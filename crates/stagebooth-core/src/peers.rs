//! Mesh peer connections: one link per remote participant.
//!
//! The platform peer-connection stack sits behind [`PeerConnector`] /
//! [`PeerConnection`]; this module owns the offer/answer/candidate exchange
//! and the per-link state machine `absent → connecting → connected → closed`.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::BoothError;
use crate::media::{LocalMedia, MediaTrack, RemoteMedia, TrackKind};
use crate::protocol::{ClientMessage, IceCandidate, SdpType, SessionDescription, SignalData};
use crate::settings::IceServer;
use crate::signaling::SignalingClient;
use crate::state::MAX_PARTICIPANTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Absent,
    Connecting,
    Connected,
    Closed,
}

/// Transport-level state reported by the platform connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    LocalCandidate(IceCandidate),
    Track(MediaTrack),
    StateChanged(TransportState),
}

#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub peer_id: String,
    pub kind: PeerEventKind,
}

/// Callback channel handed to each new connection.
///
/// Platform handlers (local ICE candidates, inbound tracks, state changes)
/// report through it; the session loop picks the events up in order.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    peer_id: String,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(PeerEventKind::LocalCandidate(candidate));
    }

    pub fn track(&self, track: MediaTrack) {
        self.emit(PeerEventKind::Track(track));
    }

    pub fn state(&self, state: TransportState) {
        self.emit(PeerEventKind::StateChanged(state));
    }

    fn emit(&self, kind: PeerEventKind) {
        let _ = self.tx.send(PeerEvent {
            peer_id: self.peer_id.clone(),
            kind,
        });
    }
}

/// One platform peer connection.
pub trait PeerConnection: Send + Sync + 'static {
    fn add_track(&self, track: &MediaTrack) -> impl Future<Output = Result<(), BoothError>> + Send;
    fn create_offer(&self) -> impl Future<Output = Result<SessionDescription, BoothError>> + Send;
    fn create_answer(&self) -> impl Future<Output = Result<SessionDescription, BoothError>> + Send;
    fn set_local_description(&self, desc: SessionDescription) -> impl Future<Output = Result<(), BoothError>> + Send;
    fn set_remote_description(&self, desc: SessionDescription) -> impl Future<Output = Result<(), BoothError>> + Send;
    fn add_ice_candidate(&self, candidate: IceCandidate) -> impl Future<Output = Result<(), BoothError>> + Send;
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Factory for platform peer connections.
pub trait PeerConnector: Send + Sync + 'static {
    type Connection: PeerConnection;

    fn create(
        &self,
        peer_id: &str,
        ice_servers: &[IceServer],
        events: PeerEventSink,
    ) -> impl Future<Output = Result<Self::Connection, BoothError>> + Send;
}

/// `true` if `self_id` creates the offer for the pair `(self_id, peer_id)`.
///
/// Exactly one side of any pair of distinct ids gets `true`.
pub fn is_initiator(self_id: &str, peer_id: &str) -> bool {
    self_id < peer_id
}

/// Reaction the controller owes to a peer event.
#[derive(Debug, Clone)]
pub enum PeerUpdate {
    Media {
        peer_id: String,
        media: RemoteMedia,
        kind: TrackKind,
    },
    State { peer_id: String, state: LinkState },
}

struct PeerLink<P> {
    connection: P,
    state: LinkState,
    initiator: bool,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    media: RemoteMedia,
}

pub struct PeerConnectionManager<C: PeerConnector> {
    connector: Arc<C>,
    signaling: SignalingClient,
    self_id: String,
    ice_servers: Vec<IceServer>,
    local_media: LocalMedia,
    links: HashMap<String, PeerLink<C::Connection>>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl<C: PeerConnector> PeerConnectionManager<C> {
    /// `local_media` must already be acquired; it is attached to every link.
    pub fn new(
        connector: Arc<C>,
        signaling: SignalingClient,
        self_id: String,
        ice_servers: Vec<IceServer>,
        local_media: LocalMedia,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector,
            signaling,
            self_id,
            ice_servers,
            local_media,
            links: HashMap::new(),
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn link_state(&self, peer_id: &str) -> LinkState {
        self.links.get(peer_id).map_or(LinkState::Absent, |l| l.state)
    }

    /// Remote peer ids, in id order.
    pub fn peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.links.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn pending_candidates(&self, peer_id: &str) -> usize {
        self.links.get(peer_id).map_or(0, |l| l.pending_candidates.len())
    }

    pub fn remote_media(&self, peer_id: &str) -> Option<&RemoteMedia> {
        self.links.get(peer_id).map(|l| &l.media)
    }

    /// Set up a link for a newly seen peer and offer if this side initiates.
    pub async fn add_peer(&mut self, peer_id: &str) -> Result<(), BoothError> {
        self.ensure_link(peer_id, true).await
    }

    async fn ensure_link(&mut self, peer_id: &str, may_offer: bool) -> Result<(), BoothError> {
        if peer_id == self.self_id {
            tracing::debug!("ignoring link request for self");
            return Ok(());
        }
        if self.links.contains_key(peer_id) {
            return Ok(());
        }
        if self.links.len() >= MAX_PARTICIPANTS - 1 {
            tracing::warn!(peer_id, "room is at capacity, refusing peer link");
            return Err(BoothError::Room(format!(
                "at most {MAX_PARTICIPANTS} participants per room"
            )));
        }

        let sink = PeerEventSink {
            peer_id: peer_id.to_string(),
            tx: self.events_tx.clone(),
        };
        let connection = self.connector.create(peer_id, &self.ice_servers, sink).await?;

        for track in &self.local_media.tracks {
            if let Err(e) = connection.add_track(track).await {
                connection.close().await;
                return Err(e);
            }
        }

        let initiator = is_initiator(&self.self_id, peer_id);
        self.links.insert(
            peer_id.to_string(),
            PeerLink {
                connection,
                state: LinkState::Connecting,
                initiator,
                remote_description_set: false,
                pending_candidates: VecDeque::new(),
                media: RemoteMedia::default(),
            },
        );
        tracing::info!(peer_id, initiator, "peer link created");

        if may_offer && initiator {
            self.send_offer(peer_id).await?;
        }
        Ok(())
    }

    async fn send_offer(&mut self, peer_id: &str) -> Result<(), BoothError> {
        let link = self
            .links
            .get(peer_id)
            .ok_or_else(|| BoothError::Negotiation(format!("no link for {peer_id}")))?;

        let offer = link.connection.create_offer().await?;
        link.connection.set_local_description(offer.clone()).await?;
        self.signaling.send(ClientMessage::Signal {
            to: peer_id.to_string(),
            data: SignalData::sdp(offer),
        });
        tracing::debug!(peer_id, "offer sent");
        Ok(())
    }

    /// Apply one signaling unit received from `from`.
    pub async fn handle_signal(&mut self, from: &str, data: SignalData) -> Result<(), BoothError> {
        self.ensure_link(from, false).await?;
        let Some(link) = self.links.get_mut(from) else {
            return Ok(());
        };

        if let Some(desc) = data.sdp {
            match (desc.kind, link.initiator) {
                (SdpType::Offer, true) => {
                    tracing::warn!(peer_id = from, "dropping offer from a peer this side initiates to");
                    return Ok(());
                }
                (SdpType::Answer, false) => {
                    tracing::warn!(peer_id = from, "dropping answer from a peer this side answers");
                    return Ok(());
                }
                _ => {}
            }

            let kind = desc.kind;
            link.connection.set_remote_description(desc).await?;
            link.remote_description_set = true;

            if kind == SdpType::Offer {
                let answer = link.connection.create_answer().await?;
                link.connection.set_local_description(answer.clone()).await?;
                self.signaling.send(ClientMessage::Signal {
                    to: from.to_string(),
                    data: SignalData::sdp(answer),
                });
                tracing::debug!(peer_id = from, "answer sent");
            }

            let queued = link.pending_candidates.len();
            while let Some(candidate) = link.pending_candidates.pop_front() {
                apply_candidate(&link.connection, from, candidate).await;
            }
            if queued > 0 {
                tracing::debug!(peer_id = from, queued, "flushed early candidates");
            }
        }

        if let Some(candidate) = data.candidate {
            if link.remote_description_set {
                apply_candidate(&link.connection, from, candidate).await;
            } else {
                link.pending_candidates.push_back(candidate);
            }
        }

        Ok(())
    }

    /// Route a platform callback. Events for unknown peers are dropped.
    pub fn handle_peer_event(&mut self, event: PeerEvent) -> Option<PeerUpdate> {
        let PeerEvent { peer_id, kind } = event;
        let Some(link) = self.links.get_mut(&peer_id) else {
            tracing::debug!(peer_id = %peer_id, "event for unknown peer dropped");
            return None;
        };

        match kind {
            PeerEventKind::LocalCandidate(candidate) => {
                self.signaling.send(ClientMessage::Signal {
                    to: peer_id,
                    data: SignalData::candidate(candidate),
                });
                None
            }
            PeerEventKind::Track(track) => {
                tracing::info!(peer_id = %peer_id, track_id = %track.id, kind = ?track.kind, "remote track received");
                let kind = track.kind;
                link.media.merge(track);
                Some(PeerUpdate::Media {
                    media: link.media.clone(),
                    peer_id,
                    kind,
                })
            }
            PeerEventKind::StateChanged(state) => {
                let next = match state {
                    TransportState::Connected => LinkState::Connected,
                    TransportState::Closed => LinkState::Closed,
                    TransportState::Disconnected | TransportState::Failed => {
                        tracing::warn!(peer_id = %peer_id, ?state, "peer transport degraded");
                        return None;
                    }
                    TransportState::New | TransportState::Connecting => return None,
                };
                if link.state == next {
                    return None;
                }
                link.state = next;
                tracing::info!(peer_id = %peer_id, state = ?next, "peer link state changed");
                Some(PeerUpdate::State { peer_id, state: next })
            }
        }
    }

    /// Close and forget the link to `peer_id`.
    pub async fn remove_peer(&mut self, peer_id: &str) -> bool {
        let Some(link) = self.links.remove(peer_id) else {
            return false;
        };
        link.connection.close().await;
        tracing::info!(peer_id, "peer link closed");
        true
    }

    pub async fn close_all(&mut self) {
        for (peer_id, link) in self.links.drain() {
            link.connection.close().await;
            tracing::info!(peer_id = %peer_id, "peer link closed");
        }
    }
}

async fn apply_candidate<P: PeerConnection>(connection: &P, peer_id: &str, candidate: IceCandidate) {
    if let Err(e) = connection.add_ice_candidate(candidate).await {
        tracing::debug!(peer_id, "ignoring candidate failure: {e}");
    }
}
