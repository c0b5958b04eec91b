use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::ReconnectPolicy;
use crate::errors::ClassroomError;

const CONFIG_FILE: &str = "classroom.json";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_live_room_hub_url")]
    pub live_room_hub_url: String,
    #[serde(default = "default_notifications_hub_url")]
    pub notifications_hub_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    /// `None` retries forever.
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,
    #[serde(default)]
    pub mic_muted_on_join: bool,
    #[serde(default = "default_true")]
    pub camera_off_on_join: bool,
}

fn default_api_base_url() -> String {
    "https://api.classroom.example.com".to_string()
}

fn default_live_room_hub_url() -> String {
    "wss://api.classroom.example.com/hubs/live-room".to_string()
}

fn default_notifications_hub_url() -> String {
    "wss://api.classroom.example.com/hubs/notifications".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            live_room_hub_url: default_live_room_hub_url(),
            notifications_hub_url: default_notifications_hub_url(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            reconnect_max_attempts: None,
            mic_muted_on_join: false,
            camera_off_on_join: true,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_ms),
            max_delay: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
            max_attempts: self.reconnect_max_attempts,
            ..ReconnectPolicy::default()
        }
    }

    pub fn api_base(&self) -> Result<url::Url, ClassroomError> {
        parse_url(&self.api_base_url)
    }

    pub fn live_room_hub(&self) -> Result<url::Url, ClassroomError> {
        parse_url(&self.live_room_hub_url)
    }

    pub fn notifications_hub(&self) -> Result<url::Url, ClassroomError> {
        parse_url(&self.notifications_hub_url)
    }
}

fn parse_url(raw: &str) -> Result<url::Url, ClassroomError> {
    url::Url::parse(raw).map_err(|e| ClassroomError::Config(format!("invalid url '{raw}': {e}")))
}

/// JSON-file backed client configuration.
pub struct ConfigStore {
    config: Mutex<ClientConfig>,
    file_path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: &str) -> Self {
        let file_path = PathBuf::from(data_dir).join(CONFIG_FILE);
        let config = Self::load(&file_path);
        Self {
            config: Mutex::new(config),
            file_path,
        }
    }

    pub fn get(&self) -> ClientConfig {
        self.lock().clone()
    }

    /// Apply a change and persist it.
    pub fn update(&self, f: impl FnOnce(&mut ClientConfig)) {
        {
            let mut config = self.lock();
            f(&mut *config);
        }
        self.save();
    }

    pub fn set_api_base_url(&self, url: String) {
        self.update(|c| c.api_base_url = url);
    }

    pub fn set_mic_muted_on_join(&self, muted: bool) {
        self.update(|c| c.mic_muted_on_join = muted);
    }

    pub fn set_camera_off_on_join(&self, off: bool) {
        self.update(|c| c.camera_off_on_join = off);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClientConfig> {
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self) {
        let config = self.get();
        if let Some(parent) = self.file_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("failed to write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("failed to encode config: {e}"),
        }
    }

    fn load(path: &Path) -> ClientConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable config {}: {e}", path.display());
                ClientConfig::default()
            }),
            Err(_) => ClientConfig::default(),
        }
    }
}
