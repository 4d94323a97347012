//! User-adjustable voice settings and their JSON file store.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub rate: f32,
    pub pitch: f32,
    /// 0.0 - 1.0
    pub volume: f32,
    #[serde(alias = "voice")]
    pub voice_id: String,
    pub language: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 0.7,
            pitch: 1.2,
            volume: 0.8,
            voice_id: String::new(),
            language: "hi-IN".into(),
        }
    }
}

/// Partial settings change. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub rate: Option<f32>,
    pub pitch: Option<f32>,
    pub volume: Option<f32>,
    #[serde(alias = "voice")]
    pub voice_id: Option<String>,
    pub language: Option<String>,
    /// `true` silences output by forcing volume to zero.
    pub muted: Option<bool>,
}

impl VoiceSettings {
    pub fn apply(&mut self, update: &SettingsUpdate) {
        if let Some(rate) = update.rate {
            self.rate = rate;
        }
        if let Some(pitch) = update.pitch {
            self.pitch = pitch;
        }
        if let Some(volume) = update.volume {
            self.volume = volume.clamp(0.0, 1.0);
        }
        if let Some(voice_id) = &update.voice_id {
            self.voice_id = voice_id.clone();
        }
        if let Some(language) = &update.language {
            self.language = language.clone();
        }
        if update.muted == Some(true) {
            self.volume = 0.0;
        }
    }
}

/// Persists `VoiceSettings` as a single JSON document.
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/story-narrator/voice-settings.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("story-narrator/voice-settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved settings, or `None` if nothing usable is stored.
    pub fn load(&self) -> Option<VoiceSettings> {
        let contents = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(settings) => {
                debug!("Loaded voice settings from {}", self.path.display());
                Some(settings)
            }
            Err(e) => {
                warn!("Ignoring unreadable settings {}: {e}", self.path.display());
                None
            }
        }
    }

    pub fn save(&self, settings: &VoiceSettings) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        debug!("Saved voice settings to {}", self.path.display());
        Ok(())
    }
}
