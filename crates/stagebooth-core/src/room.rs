use std::sync::Arc;

use stagebooth_video::{CapturedImage, ImageFormat, Matting, parse_color};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::compositor::CompositingEngine;
use crate::errors::BoothError;
use crate::events::{BoothEvent, BoothEventListener, ConnectionState, EventEmitter, ParticipantInfo};
use crate::layout::{Room, RoomPatch, StageSize, Tile};
use crate::link::RoomLink;
use crate::media::{LocalMedia, MediaDevices, TrackKind};
use crate::participants::ParticipantManager;
use crate::peers::{LinkState, PeerConnectionManager, PeerConnector, PeerEvent, PeerUpdate};
use crate::protocol::{ClientMessage, Role, SignalData};
use crate::settings::BoothSettings;
use crate::signaling::{SignalingClient, SignalingEvent, SignalingEvents, Welcome};
use crate::state::RoomStateStore;

/// What the relay assigned on join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    pub self_id: String,
    pub role: Role,
    pub share_link: String,
}

enum Command {
    Propose(RoomPatch),
    StageSize(StageSize),
    Capture(oneshot::Sender<Result<CapturedImage, BoothError>>),
    Leave(oneshot::Sender<()>),
}

struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    _task: JoinHandle<()>,
}

/// Drives one booth session: relay, peer links, shared room and capture.
pub struct RoomController<C: PeerConnector, D: MediaDevices> {
    connector: Arc<C>,
    devices: D,
    matting: Arc<dyn Matting>,
    settings: BoothSettings,
    emitter: EventEmitter,
    participants: Arc<Mutex<ParticipantManager>>,
    connection_state: Arc<Mutex<ConnectionState>>,
    stage: Arc<Mutex<Option<StageSize>>>,
    room: Arc<watch::Sender<Room>>,
    session: Mutex<Option<SessionHandle>>,
}

impl<C: PeerConnector, D: MediaDevices> RoomController<C, D> {
    pub fn new(connector: C, devices: D, matting: Arc<dyn Matting>, settings: BoothSettings) -> Self {
        let (room, _) = watch::channel(Room::default());
        Self {
            connector: Arc::new(connector),
            devices,
            matting,
            settings,
            emitter: EventEmitter::new(),
            participants: Arc::new(Mutex::new(ParticipantManager::new())),
            connection_state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            stage: Arc::new(Mutex::new(None)),
            room: Arc::new(room),
            session: Mutex::new(None),
        }
    }

    /// Register a listener for booth events.
    pub fn add_listener(&self, listener: Arc<dyn BoothEventListener>) {
        self.emitter.add_listener(listener);
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock().await
    }

    /// Snapshot of the current participants, local included.
    pub async fn participants(&self) -> Vec<ParticipantInfo> {
        self.participants.lock().await.participants().to_vec()
    }

    /// Live view of the shared room.
    pub fn subscribe_room(&self) -> watch::Receiver<Room> {
        self.room.subscribe()
    }

    pub fn share_link(&self, room_id: &str) -> Result<String, BoothError> {
        RoomLink::share_link(&self.settings.share_base_url, room_id)
    }

    pub fn new_room_id(&self) -> String {
        RoomLink::new_room_id()
    }

    /// Join a room by id or share link.
    ///
    /// Local media is acquired before the relay is contacted, so a denied
    /// camera fails the join without any signaling traffic.
    pub async fn join(&self, room: &str) -> Result<JoinInfo, BoothError> {
        let (room_id, share_link, local) = self.prepare(room).await?;

        let (client, events) = match SignalingClient::connect(&self.settings.relay_url, &room_id).await {
            Ok(connection) => connection,
            Err(e) => {
                self.set_connection_state(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };

        self.start_session(share_link, local, client, events).await
    }

    /// Join over a relay connection that is already open and has sent `JOIN`.
    pub async fn join_with_signaling(
        &self,
        room_id: &str,
        client: SignalingClient,
        events: SignalingEvents,
    ) -> Result<JoinInfo, BoothError> {
        let (_, share_link, local) = self.prepare(room_id).await?;
        self.start_session(share_link, local, client, events).await
    }

    /// Propose a room edit. Ignored unless the local participant is master.
    pub async fn propose_layout(&self, patch: RoomPatch) -> Result<(), BoothError> {
        self.send(Command::Propose(patch)).await
    }

    pub async fn move_tile(&self, participant_id: &str, tile: Tile) -> Result<(), BoothError> {
        self.propose_layout(RoomPatch::tile(participant_id, tile)).await
    }

    pub async fn set_background(&self, color: &str) -> Result<(), BoothError> {
        if parse_color(color).is_none() {
            return Err(BoothError::Room(format!("invalid background colour '{color}'")));
        }
        self.propose_layout(RoomPatch::background(color)).await
    }

    /// Report the rendered stage size. Kept across sessions.
    pub async fn set_stage_size(&self, width: u32, height: u32) -> Result<(), BoothError> {
        let stage = StageSize::new(width, height)
            .ok_or_else(|| BoothError::Room(format!("stage size {width}x{height} is empty")))?;
        *self.stage.lock().await = Some(stage);

        let session = self.session.lock().await;
        if let Some(handle) = session.as_ref() {
            let _ = handle.commands.send(Command::StageSize(stage));
        }
        Ok(())
    }

    /// Render the stage, end the session for everyone and return the still.
    pub async fn capture(&self) -> Result<CapturedImage, BoothError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Capture(tx)).await?;
        rx.await
            .map_err(|_| BoothError::Room("session ended before capture".into()))?
    }

    /// Leave the current session. Safe to call when not in one.
    pub async fn leave(&self) {
        let handle = self.session.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if handle.commands.send(Command::Leave(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), BoothError> {
        let session = self.session.lock().await;
        let handle = session
            .as_ref()
            .ok_or_else(|| BoothError::Room("not in a room".into()))?;
        handle
            .commands
            .send(command)
            .map_err(|_| BoothError::Room("session has ended".into()))
    }

    /// Validate the room and acquire local media.
    async fn prepare(&self, room: &str) -> Result<(String, String, LocalMedia), BoothError> {
        let room_id = RoomLink::extract_room_id(room)?;
        let share_link = self.share_link(&room_id)?;
        self.ensure_idle().await?;
        self.set_connection_state(ConnectionState::Connecting).await;

        match self.devices.acquire().await {
            Ok(local) => Ok((room_id, share_link, local)),
            Err(e) => {
                tracing::warn!("local media unavailable: {e}");
                self.set_connection_state(ConnectionState::Disconnected).await;
                Err(e)
            }
        }
    }

    async fn ensure_idle(&self) -> Result<(), BoothError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|h| !h.commands.is_closed()) {
            return Err(BoothError::Room("already in a room".into()));
        }
        *session = None;
        Ok(())
    }

    async fn set_connection_state(&self, state: ConnectionState) {
        set_connection_state(&self.connection_state, &self.emitter, state).await;
    }

    async fn start_session(
        &self,
        share_link: String,
        local: LocalMedia,
        client: SignalingClient,
        mut events: SignalingEvents,
    ) -> Result<JoinInfo, BoothError> {
        let welcome = match wait_for_welcome(&mut events, &self.emitter).await {
            Ok(welcome) => welcome,
            Err(e) => {
                self.set_connection_state(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };
        let Welcome {
            self_id,
            role,
            peers,
            room,
        } = welcome;
        tracing::info!(self_id = %self_id, ?role, peers = peers.len(), "joined room");

        let (peer_links, peer_events) = PeerConnectionManager::new(
            self.connector.clone(),
            client.clone(),
            self_id.clone(),
            self.settings.ice_servers.clone(),
            local.clone(),
        );

        let mut store = RoomStateStore::new(
            role,
            client.clone(),
            self.room.clone(),
            (self.settings.reference_tile_width, self.settings.reference_tile_height),
        );
        if let Some(stage) = *self.stage.lock().await {
            store.set_stage_size(stage);
        }
        if store.apply(room) {
            self.emitter.emit(BoothEvent::RoomStateChanged(store.room().clone()));
        }

        let mut compositor = CompositingEngine::new(self.matting.clone(), self.settings.matte_fps);
        let local_video = local.video();
        if let Some(video) = local_video.clone() {
            compositor.start(&self_id, video, true);
        }

        {
            let mut pm = self.participants.lock().await;
            pm.clear();
            pm.add_participant(ParticipantInfo {
                id: self_id.clone(),
                role: Some(role),
                is_local: true,
                link_state: LinkState::Connected,
                has_video: local_video.is_some(),
            });
        }

        let mut session = Session {
            self_id: self_id.clone(),
            role,
            signaling: client,
            peers: peer_links,
            store,
            compositor,
            participants: self.participants.clone(),
            connection_state: self.connection_state.clone(),
            emitter: self.emitter.clone(),
            capture_format: self.settings.image_format(),
            leave_ack: None,
        };

        for peer_id in peers {
            session.on_peer_joined(peer_id).await;
        }
        session.assign_default_layout().await;

        self.set_connection_state(ConnectionState::Connected).await;
        self.emitter.emit(BoothEvent::Joined {
            self_id: self_id.clone(),
            role,
            share_link: share_link.clone(),
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(events, peer_events, commands_rx));
        *self.session.lock().await = Some(SessionHandle {
            commands: commands_tx,
            _task: task,
        });

        Ok(JoinInfo {
            self_id,
            role,
            share_link,
        })
    }
}

async fn set_connection_state(
    connection_state: &Mutex<ConnectionState>,
    emitter: &EventEmitter,
    state: ConnectionState,
) {
    *connection_state.lock().await = state;
    emitter.emit(BoothEvent::ConnectionStateChanged(state));
}

async fn wait_for_welcome(events: &mut SignalingEvents, emitter: &EventEmitter) -> Result<Welcome, BoothError> {
    while let Some(event) = events.recv().await {
        match event {
            SignalingEvent::Welcome(welcome) => return Ok(welcome),
            SignalingEvent::ServerError { message } => {
                tracing::warn!("relay error before welcome: {message}");
                emitter.emit(BoothEvent::ServerNotice(message));
            }
            SignalingEvent::SessionEnded { reason } => {
                return Err(BoothError::Room(format!("session ended before welcome: {reason}")));
            }
            SignalingEvent::Disconnected { reason } => {
                return Err(BoothError::Transport(
                    reason.unwrap_or_else(|| "relay closed before welcome".to_string()),
                ));
            }
            other => tracing::debug!("ignoring relay event before welcome: {other:?}"),
        }
    }
    Err(BoothError::Transport("relay closed before welcome".into()))
}

/// State owned by the session task. Every relay message, peer event and UI
/// command is handled here, one at a time.
struct Session<C: PeerConnector> {
    self_id: String,
    role: Role,
    signaling: SignalingClient,
    peers: PeerConnectionManager<C>,
    store: RoomStateStore,
    compositor: CompositingEngine,
    participants: Arc<Mutex<ParticipantManager>>,
    connection_state: Arc<Mutex<ConnectionState>>,
    emitter: EventEmitter,
    capture_format: ImageFormat,
    leave_ack: Option<oneshot::Sender<()>>,
}

impl<C: PeerConnector> Session<C> {
    async fn run(
        mut self,
        mut relay: SignalingEvents,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let reason = loop {
            tokio::select! {
                event = relay.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.on_relay_event(event).await {
                            break reason;
                        }
                    }
                    None => break "relay connection lost".to_string(),
                },
                Some(event) = peer_events.recv() => self.on_peer_event(event).await,
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(reason) = self.on_command(command).await {
                            break reason;
                        }
                    }
                    None => break "left".to_string(),
                },
            }
        };

        self.teardown(reason).await;
    }

    /// Returns the end reason when the event ends the session.
    async fn on_relay_event(&mut self, event: SignalingEvent) -> Option<String> {
        match event {
            SignalingEvent::Welcome(_) => {}
            SignalingEvent::PeerJoined { id, room } => {
                if let Some(room) = room {
                    self.apply_room(room);
                }
                self.on_peer_joined(id).await;
                self.assign_default_layout().await;
            }
            SignalingEvent::PeerLeft { id } => self.on_peer_left(&id).await,
            SignalingEvent::Signal { from, data } => self.on_signal(from, data).await,
            SignalingEvent::State(room) => self.apply_room(room),
            SignalingEvent::SessionEnded { reason } => {
                tracing::info!("relay ended the session: {reason}");
                return Some(reason);
            }
            SignalingEvent::ServerError { message } => {
                tracing::warn!("relay error: {message}");
                self.emitter.emit(BoothEvent::ServerNotice(message));
            }
            SignalingEvent::Disconnected { reason } => {
                return Some(reason.unwrap_or_else(|| "relay disconnected".to_string()));
            }
        }
        None
    }

    async fn on_command(&mut self, command: Command) -> Option<String> {
        match command {
            Command::Propose(patch) => {
                if self.store.propose(patch) {
                    self.emit_room();
                }
            }
            Command::StageSize(stage) => {
                if self.store.set_stage_size(stage) {
                    self.emit_room();
                }
                self.assign_default_layout().await;
            }
            Command::Capture(reply) => return self.capture(reply),
            Command::Leave(ack) => {
                self.leave_ack = Some(ack);
                return Some("left".to_string());
            }
        }
        None
    }

    fn capture(&mut self, reply: oneshot::Sender<Result<CapturedImage, BoothError>>) -> Option<String> {
        if self.role != Role::Master {
            let _ = reply.send(Err(BoothError::Room("only the master can capture".into())));
            return None;
        }

        match self
            .compositor
            .capture(self.store.room(), self.store.stage(), self.capture_format)
        {
            Ok(image) => {
                self.signaling.send(ClientMessage::EndSession {
                    reason: "captured".to_string(),
                });
                let captured_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
                self.emitter.emit(BoothEvent::CaptureReady {
                    image: image.clone(),
                    captured_at,
                });
                let _ = reply.send(Ok(image));
                Some("captured".to_string())
            }
            Err(e) => {
                tracing::warn!("capture failed: {e}");
                let _ = reply.send(Err(e));
                None
            }
        }
    }

    async fn on_peer_joined(&mut self, peer_id: String) {
        if peer_id == self.self_id {
            return;
        }
        if let Err(e) = self.peers.add_peer(&peer_id).await {
            tracing::warn!(peer_id = %peer_id, "could not set up peer link: {e}");
            return;
        }
        self.track_participant(peer_id).await;
    }

    async fn on_signal(&mut self, from: String, data: SignalData) {
        if let Err(e) = self.peers.handle_signal(&from, data).await {
            tracing::warn!(peer_id = %from, "signal handling failed: {e}");
            return;
        }
        self.track_participant(from).await;
    }

    async fn track_participant(&mut self, peer_id: String) {
        let link_state = self.peers.link_state(&peer_id);
        if link_state == LinkState::Absent {
            return;
        }
        let info = ParticipantInfo {
            id: peer_id,
            role: (self.role == Role::Master).then_some(Role::Participant),
            is_local: false,
            link_state,
            has_video: false,
        };
        let added = self.participants.lock().await.add_participant(info.clone());
        if added {
            self.emitter.emit(BoothEvent::ParticipantJoined(info));
        }
    }

    async fn on_peer_left(&mut self, peer_id: &str) {
        let had_link = self.peers.remove_peer(peer_id).await;
        self.compositor.stop(peer_id);
        let removed = self.participants.lock().await.remove_participant(peer_id);
        if had_link || removed.is_some() {
            tracing::info!(peer_id, "participant left");
            self.emitter.emit(BoothEvent::ParticipantLeft(peer_id.to_string()));
        }
        if self.store.forget(peer_id) {
            self.emit_room();
        }
    }

    async fn on_peer_event(&mut self, event: PeerEvent) {
        match self.peers.handle_peer_event(event) {
            Some(PeerUpdate::Media { peer_id, media, kind }) => {
                if kind != TrackKind::Video {
                    return;
                }
                let Some(video) = media.video() else {
                    return;
                };
                self.compositor.start(&peer_id, video, false);
                self.participants.lock().await.set_has_video(&peer_id, true);
                self.emitter.emit(BoothEvent::MediaReady {
                    participant_id: peer_id,
                });
            }
            Some(PeerUpdate::State { peer_id, state }) => {
                self.participants.lock().await.set_link_state(&peer_id, state);
                self.emitter.emit(BoothEvent::PeerStateChanged {
                    participant_id: peer_id,
                    state,
                });
            }
            None => {}
        }
    }

    fn apply_room(&mut self, room: Room) {
        if self.store.apply(room) {
            self.emit_room();
        }
    }

    async fn assign_default_layout(&mut self) {
        let ids = self.participants.lock().await.ids();
        if self.store.assign_default_layout(&ids) {
            self.emit_room();
        }
    }

    fn emit_room(&self) {
        self.emitter
            .emit(BoothEvent::RoomStateChanged(self.store.room().clone()));
    }

    async fn teardown(mut self, reason: String) {
        tracing::info!(reason = %reason, "tearing down session");
        self.peers.close_all().await;
        self.compositor.stop_all();
        self.participants.lock().await.clear();
        set_connection_state(&self.connection_state, &self.emitter, ConnectionState::Disconnected).await;
        self.emitter.emit(BoothEvent::SessionEnded { reason });
        if let Some(ack) = self.leave_ack.take() {
            let _ = ack.send(());
        }
    }
}
