use crate::events::ParticipantInfo;
use crate::peers::LinkState;

/// Manages the list of participants in a room.
///
/// Updated by the session loop. Read by UI layers through the controller.
#[derive(Debug, Clone, Default)]
pub struct ParticipantManager {
    participants: Vec<ParticipantInfo>,
}

impl ParticipantManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the participant was already known.
    pub fn add_participant(&mut self, info: ParticipantInfo) -> bool {
        if self.participants.iter().any(|p| p.id == info.id) {
            return false;
        }
        self.participants.push(info);
        true
    }

    pub fn remove_participant(&mut self, id: &str) -> Option<ParticipantInfo> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(index))
    }

    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&ParticipantInfo> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut ParticipantInfo> {
        self.participants.iter_mut().find(|p| p.id == id)
    }

    pub fn set_link_state(&mut self, id: &str, state: LinkState) {
        if let Some(p) = self.participant_mut(id) {
            p.link_state = state;
        }
    }

    pub fn set_has_video(&mut self, id: &str, has_video: bool) {
        if let Some(p) = self.participant_mut(id) {
            p.has_video = has_video;
        }
    }

    /// Every participant id, local included, in id order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.participants.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
