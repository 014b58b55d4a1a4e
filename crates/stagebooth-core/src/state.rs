//! Master-authoritative room state, replicated through the relay.

use std::sync::Arc;

use tokio::sync::watch;

use crate::layout::{LayoutUnits, Room, RoomPatch, StageSize, Tile};
use crate::protocol::{ClientMessage, Role};
use crate::signaling::SignalingClient;

/// Participants per room, master included.
pub const MAX_PARTICIPANTS: usize = 4;

/// Offset between consecutive default tiles, in normalized units.
pub const DEFAULT_TILE_STAGGER: f64 = 0.05;

pub struct RoomStateStore {
    role: Role,
    room: Room,
    stage: Option<StageSize>,
    reference_tile: (u32, u32),
    signaling: SignalingClient,
    published: Arc<watch::Sender<Room>>,
}

impl RoomStateStore {
    /// `reference_tile` is the default tile size in stage pixels.
    pub fn new(
        role: Role,
        signaling: SignalingClient,
        published: Arc<watch::Sender<Room>>,
        reference_tile: (u32, u32),
    ) -> Self {
        let room = published.borrow().clone();
        Self {
            role,
            room,
            stage: None,
            reference_tile,
            signaling,
            published,
        }
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn stage(&self) -> Option<StageSize> {
        self.stage
    }

    /// Replace the local copy with a broadcast. Returns `true` if it changed.
    pub fn apply(&mut self, mut incoming: Room) -> bool {
        if let Some(stage) = self.stage {
            incoming.normalize(stage);
        }
        // IndexMap equality ignores order, but order breaks z ties.
        if incoming == self.room && incoming.layout.keys().eq(self.room.layout.keys()) {
            return false;
        }
        self.room = incoming;
        self.publish();
        true
    }

    /// Merge a master edit and broadcast the result.
    ///
    /// No-op for non-masters: nothing changes and nothing is sent.
    pub fn propose(&mut self, patch: RoomPatch) -> bool {
        if !self.is_master() {
            tracing::debug!("ignoring layout proposal from non-master");
            return false;
        }
        if patch.is_empty() {
            return false;
        }
        if self.room.layout_units == LayoutUnits::Pixel && !self.room.layout.is_empty() {
            tracing::warn!("layout still in pixel units, proposal deferred until the stage size is known");
            return false;
        }

        self.room.merge(patch);
        self.broadcast();
        self.publish();
        true
    }

    /// Record the rendered stage size, migrating a legacy pixel layout once.
    pub fn set_stage_size(&mut self, stage: StageSize) -> bool {
        self.stage = Some(stage);
        if !self.room.normalize(stage) {
            return false;
        }
        tracing::info!(width = stage.width, height = stage.height, "migrated pixel layout to normalized units");
        if self.is_master() {
            self.broadcast();
        }
        self.publish();
        true
    }

    /// Drop a departed participant's tile. Master only.
    pub fn forget(&mut self, participant_id: &str) -> bool {
        if !self.is_master() || self.room.tile(participant_id).is_none() {
            return false;
        }
        self.propose(RoomPatch {
            remove: vec![participant_id.to_string()],
            ..RoomPatch::default()
        })
    }

    /// Give every participant without a tile a default one.
    ///
    /// Only the first [`MAX_PARTICIPANTS`] ids in sorted order get tiles.
    /// Needs the master role and a known stage size.
    pub fn assign_default_layout(&mut self, participant_ids: &[String]) -> bool {
        let Some(stage) = self.stage else {
            return false;
        };
        if !self.is_master() {
            return false;
        }

        let mut ids: Vec<&String> = participant_ids.iter().collect();
        ids.sort();
        ids.dedup();

        let (ref_w, ref_h) = self.reference_tile;
        let w = f64::from(ref_w) / f64::from(stage.width);
        let h = f64::from(ref_h) / f64::from(stage.height);

        let mut patch = RoomPatch::default();
        for (index, id) in ids.into_iter().take(MAX_PARTICIPANTS).enumerate() {
            if self.room.tile(id).is_some() {
                continue;
            }
            let offset = DEFAULT_TILE_STAGGER * index as f64;
            patch
                .layout
                .insert(id.clone(), Tile::new(offset, offset, w, h, index as i32));
        }

        if patch.is_empty() {
            return false;
        }
        tracing::debug!(count = patch.layout.len(), "assigning default tiles");
        self.propose(patch)
    }

    fn broadcast(&self) {
        self.signaling.send(ClientMessage::StateUpdate {
            state: self.room.clone(),
        });
    }

    fn publish(&self) {
        self.published.send_replace(self.room.clone());
    }
}
