use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::media::{MediaConstraints, VideoQuality};

/// Default bound on waiting for the room to acknowledge a hang-up.
pub const DEFAULT_HANGUP_TIMEOUT_MS: u64 = 3_000;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Settings {
    /// Base URL of the consultation API, e.g. `https://clinic.example.com/api/v1`.
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_true")]
    pub mic_enabled_on_join: bool,
    #[serde(default = "default_true")]
    pub camera_enabled_on_join: bool,
    #[serde(default)]
    pub video_quality: VideoQuality,
    #[serde(default = "default_hangup_timeout_ms")]
    pub hangup_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_hangup_timeout_ms() -> u64 {
    DEFAULT_HANGUP_TIMEOUT_MS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            mic_enabled_on_join: true,
            camera_enabled_on_join: true,
            video_quality: VideoQuality::default(),
            hangup_timeout_ms: DEFAULT_HANGUP_TIMEOUT_MS,
        }
    }
}

impl Settings {
    /// Devices to open when joining.
    ///
    /// Both devices are always requested so a participant who joins muted
    /// can unmute later; the `*_enabled_on_join` flags only set the initial
    /// enabled state.
    pub fn media_constraints(&self) -> MediaConstraints {
        MediaConstraints {
            audio: true,
            video: Some(self.video_quality),
        }
    }

    pub fn hangup_timeout(&self) -> Duration {
        Duration::from_millis(self.hangup_timeout_ms)
    }
}

pub struct SettingsStore {
    settings: Mutex<Settings>,
    file_path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("settings.json");
        let settings = Self::load(&file_path);
        Self {
            settings: Mutex::new(settings),
            file_path,
        }
    }

    pub fn get(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `change` and persist the result.
    pub fn update(&self, change: impl FnOnce(&mut Settings)) {
        {
            let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
            change(&mut settings);
        }
        self.save();
    }

    pub fn set_api_base_url(&self, url: Option<String>) {
        self.update(|s| s.api_base_url = url);
    }

    pub fn set_mic_enabled_on_join(&self, enabled: bool) {
        self.update(|s| s.mic_enabled_on_join = enabled);
    }

    pub fn set_camera_enabled_on_join(&self, enabled: bool) {
        self.update(|s| s.camera_enabled_on_join = enabled);
    }

    pub fn set_video_quality(&self, quality: VideoQuality) {
        self.update(|s| s.video_quality = quality);
    }

    pub fn set_hangup_timeout_ms(&self, timeout_ms: u64) {
        self.update(|s| s.hangup_timeout_ms = timeout_ms);
    }

    fn save(&self) {
        let settings = self.get();
        if let Some(parent) = self.file_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("cannot create settings dir {}: {e}", parent.display());
                return;
            }
        }
        match serde_json::to_string_pretty(&settings) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.file_path, json) {
                    tracing::warn!("cannot write {}: {e}", self.file_path.display());
                }
            }
            Err(e) => tracing::warn!("cannot serialize settings: {e}"),
        }
    }

    fn load(path: &Path) -> Settings {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("corrupt settings at {}, using defaults: {e}", path.display());
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }
}
