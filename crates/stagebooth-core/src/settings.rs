use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use stagebooth_video::ImageFormat;

/// One STUN/TURN server handed to every peer connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    #[default]
    Png,
    Jpeg,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BoothSettings {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default = "default_share_base_url")]
    pub share_base_url: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<IceServer>,
    /// Size of a freshly assigned tile, in stage pixels.
    #[serde(default = "default_tile_width")]
    pub reference_tile_width: u32,
    #[serde(default = "default_tile_height")]
    pub reference_tile_height: u32,
    #[serde(default = "default_matte_fps")]
    pub matte_fps: u32,
    #[serde(default)]
    pub capture_format: CaptureFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_relay_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_share_base_url() -> String {
    "http://localhost:3000/booth".to_string()
}

fn default_ice_servers() -> Vec<IceServer> {
    vec![IceServer::stun("stun:stun.l.google.com:19302")]
}

fn default_tile_width() -> u32 {
    320
}

fn default_tile_height() -> u32 {
    240
}

fn default_matte_fps() -> u32 {
    30
}

fn default_jpeg_quality() -> u8 {
    90
}

impl Default for BoothSettings {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            share_base_url: default_share_base_url(),
            ice_servers: default_ice_servers(),
            reference_tile_width: default_tile_width(),
            reference_tile_height: default_tile_height(),
            matte_fps: default_matte_fps(),
            capture_format: CaptureFormat::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl BoothSettings {
    pub fn image_format(&self) -> ImageFormat {
        match self.capture_format {
            CaptureFormat::Png => ImageFormat::Png,
            CaptureFormat::Jpeg => ImageFormat::Jpeg {
                quality: self.jpeg_quality.clamp(1, 100),
            },
        }
    }
}

pub struct SettingsStore {
    settings: Mutex<BoothSettings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> BoothSettings {
        self.settings.lock().unwrap().clone()
    }

    pub fn set_relay_url(&self, url: String) {
        self.settings.lock().unwrap().relay_url = url;
        self.save();
    }

    pub fn set_share_base_url(&self, url: String) {
        self.settings.lock().unwrap().share_base_url = url;
        self.save();
    }

    pub fn set_ice_servers(&self, servers: Vec<IceServer>) {
        self.settings.lock().unwrap().ice_servers = servers;
        self.save();
    }

    pub fn set_reference_tile_size(&self, width: u32, height: u32) {
        {
            let mut settings = self.settings.lock().unwrap();
            settings.reference_tile_width = width;
            settings.reference_tile_height = height;
        }
        self.save();
    }

    pub fn set_matte_fps(&self, fps: u32) {
        self.settings.lock().unwrap().matte_fps = fps;
        self.save();
    }

    pub fn set_capture_format(&self, format: CaptureFormat, jpeg_quality: Option<u8>) {
        {
            let mut settings = self.settings.lock().unwrap();
            settings.capture_format = format;
            if let Some(q) = jpeg_quality {
                settings.jpeg_quality = q;
            }
        }
        self.save();
    }

    fn save(&self) {
        let settings = self.settings.lock().unwrap().clone();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }

    fn load(path: &PathBuf) -> BoothSettings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                BoothSettings::default()
            }),
            Err(_) => BoothSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_default_settings() {
        let s = BoothSettings::default();
        assert_eq!(s.reference_tile_width, 320);
        assert_eq!(s.reference_tile_height, 240);
        assert_eq!(s.matte_fps, 30);
        assert_eq!(s.capture_format, CaptureFormat::Png);
        assert_eq!(s.image_format(), ImageFormat::Png);
        assert_eq!(s.ice_servers.len(), 1);
    }

    #[test]
    fn test_new_creates_defaults_when_no_file() {
        let dir = temp_dir();
        let store = SettingsStore::new(dir.path().to_str().unwrap());
        assert_eq!(store.get(), BoothSettings::default());
    }

    #[test]
    fn test_setters_persist_across_reloads() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        let turn = IceServer {
            urls: vec!["turn:turn.example.com:3478".to_string()],
            username: Some("booth".to_string()),
            credential: Some("secret".to_string()),
        };
        {
            let store = SettingsStore::new(path);
            store.set_relay_url("wss://relay.example.com".to_string());
            store.set_share_base_url("https://booth.example.com/join".to_string());
            store.set_ice_servers(vec![turn.clone()]);
            store.set_capture_format(CaptureFormat::Jpeg, Some(75));
            store.set_reference_tile_size(400, 300);
            store.set_matte_fps(15);
        }
        let s = SettingsStore::new(path).get();
        assert_eq!(s.relay_url, "wss://relay.example.com");
        assert_eq!(s.share_base_url, "https://booth.example.com/join");
        assert_eq!(s.ice_servers, vec![turn]);
        assert_eq!(s.image_format(), ImageFormat::Jpeg { quality: 75 });
        assert_eq!((s.reference_tile_width, s.reference_tile_height), (400, 300));
        assert_eq!(s.matte_fps, 15);
    }

    #[test]
    fn test_jpeg_quality_is_clamped() {
        let s = BoothSettings {
            capture_format: CaptureFormat::Jpeg,
            jpeg_quality: 0,
            ..BoothSettings::default()
        };
        assert_eq!(s.image_format(), ImageFormat::Jpeg { quality: 1 });
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(dir.path().join("settings.json"), "not json!!!").unwrap();
        let store = SettingsStore::new(path);
        assert_eq!(store.get(), BoothSettings::default());
    }

    #[test]
    fn test_partial_json_uses_serde_defaults() {
        let dir = temp_dir();
        let path = dir.path().to_str().unwrap();
        fs::write(
            dir.path().join("settings.json"),
            r#"{"relay_url":"wss://relay.example.com","capture_format":"jpeg"}"#,
        )
        .unwrap();
        let store = SettingsStore::new(path);
        let s = store.get();
        assert_eq!(s.relay_url, "wss://relay.example.com");
        assert_eq!(s.capture_format, CaptureFormat::Jpeg);
        assert_eq!(s.jpeg_quality, 90);
        assert_eq!(s.matte_fps, 30);
    }
}
