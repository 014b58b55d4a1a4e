use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::errors::BoothError;

static ROOM_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,64}$").unwrap());

/// Builds and parses shareable room links of the form `<base>?room=<id>`.
pub struct RoomLink;

impl RoomLink {
    /// Link a second device can open to join `room_id`.
    pub fn share_link(share_base_url: &str, room_id: &str) -> Result<String, BoothError> {
        let room_id = Self::validate(room_id)?;
        let mut url = Url::parse(share_base_url.trim())
            .map_err(|e| BoothError::Config(format!("invalid share base url '{share_base_url}': {e}")))?;
        url.query_pairs_mut().append_pair("room", &room_id);
        Ok(url.to_string())
    }

    /// Extract and validate the room id from user input.
    ///
    /// Accepts a share link (`https://booth.example.com/join?room=abc123`),
    /// a path-style link (`https://booth.example.com/abc123`) or a bare id.
    pub fn extract_room_id(input: &str) -> Result<String, BoothError> {
        let input = input.trim().trim_end_matches('/');

        if let Ok(url) = Url::parse(input) {
            if let Some((_, room)) = url.query_pairs().find(|(k, _)| k == "room") {
                return Self::validate(&room);
            }
            let last = url
                .path_segments()
                .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
                .unwrap_or("");
            return Self::validate(last);
        }

        let candidate = if input.contains('/') {
            input.rsplit('/').next().unwrap_or("")
        } else {
            input
        };
        Self::validate(candidate)
    }

    /// Fresh random room id.
    pub fn new_room_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn validate(candidate: &str) -> Result<String, BoothError> {
        if ROOM_ID.is_match(candidate) {
            Ok(candidate.to_string())
        } else {
            Err(BoothError::InvalidRoomId(format!(
                "invalid room id format: '{candidate}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_link_appends_room_query() {
        let link = RoomLink::share_link("https://booth.example.com/join", "abc123").unwrap();
        assert_eq!(link, "https://booth.example.com/join?room=abc123");
    }

    #[test]
    fn test_share_link_keeps_existing_query() {
        let link = RoomLink::share_link("https://booth.example.com/join?lang=fr", "abc123").unwrap();
        assert_eq!(link, "https://booth.example.com/join?lang=fr&room=abc123");
    }

    #[test]
    fn test_share_link_rejects_bad_inputs() {
        assert!(matches!(
            RoomLink::share_link("not a url", "abc123"),
            Err(BoothError::Config(_))
        ));
        assert!(matches!(
            RoomLink::share_link("https://booth.example.com", "a b"),
            Err(BoothError::InvalidRoomId(_))
        ));
    }

    #[test]
    fn test_extract_room_id_from_share_link() {
        let id = RoomLink::extract_room_id("https://booth.example.com/join?room=Party_2024").unwrap();
        assert_eq!(id, "Party_2024");
    }

    #[test]
    fn test_share_link_round_trip() {
        let id = RoomLink::new_room_id();
        let link = RoomLink::share_link("https://booth.example.com/join", &id).unwrap();
        assert_eq!(RoomLink::extract_room_id(&link).unwrap(), id);
    }

    #[test]
    fn test_extract_room_id_from_path() {
        let id = RoomLink::extract_room_id("https://booth.example.com/rooms/abc-123/").unwrap();
        assert_eq!(id, "abc-123");
        let id = RoomLink::extract_room_id("booth.example.com/abc-123").unwrap();
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn test_extract_bare_room_id() {
        assert_eq!(RoomLink::extract_room_id("  abc123 ").unwrap(), "abc123");
    }

    #[test]
    fn test_extract_room_id_rejects_invalid() {
        assert!(RoomLink::extract_room_id("ab").is_err());
        assert!(RoomLink::extract_room_id("has space").is_err());
        assert!(RoomLink::extract_room_id("https://booth.example.com/").is_err());
        assert!(RoomLink::extract_room_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_new_room_ids_are_valid_and_distinct() {
        let a = RoomLink::new_room_id();
        let b = RoomLink::new_room_id();
        assert_ne!(a, b);
        assert!(RoomLink::extract_room_id(&a).is_ok());
    }
}
