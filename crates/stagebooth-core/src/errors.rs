use thiserror::Error;

#[derive(Debug, Error)]
pub enum BoothError {
    #[error("relay transport failed: {0}")]
    Transport(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("local media unavailable: {0}")]
    Media(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("room error: {0}")]
    Room(String),
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<stagebooth_video::VideoError> for BoothError {
    fn from(e: stagebooth_video::VideoError) -> Self {
        BoothError::Capture(e.to_string())
    }
}
