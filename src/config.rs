//! Configuration management for story-narrator.
//!
//! Loads config from YAML files in standard locations. Every section and
//! field is optional; missing values take the defaults below.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::narration::player::PlayerOptions;
use crate::narration::remote::RemoteOptions;
use crate::narration::settings::VoiceSettings;
use crate::narration::voice::{Gender, VoiceCriteria};

/// Voice preference for one backend plus the id used when nothing matches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoicePreference {
    #[serde(flatten)]
    pub criteria: VoiceCriteria,
    /// Tried in order when `criteria` finds nothing. The local path then
    /// takes the catalog's first voice before `fallback`.
    pub alternates: Vec<VoiceCriteria>,
    pub fallback: String,
}

impl Default for VoicePreference {
    fn default() -> Self {
        Self {
            criteria: VoiceCriteria::default(),
            alternates: vec![VoiceCriteria {
                language: String::new(),
                gender: Gender::Female,
            }],
            fallback: "hi".into(),
        }
    }
}

impl VoicePreference {
    pub fn chain(&self) -> Vec<VoiceCriteria> {
        std::iter::once(self.criteria.clone())
            .chain(self.alternates.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Environment variable that overrides `api_key` when set.
    pub api_key_env: String,
    /// Provider's hard per-request character limit.
    pub max_chars: usize,
    pub format: String,
    pub style: String,
    pub rate: i32,
    pub pitch: i32,
    pub timeout_secs: u64,
    pub voice: VoicePreference,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.murf.ai/v1/speech".into(),
            api_key: String::new(),
            api_key_env: "MURF_API_KEY".into(),
            max_chars: 500,
            format: "MP3".into(),
            style: "Conversational".into(),
            rate: -10,
            pitch: 5,
            timeout_secs: 30,
            voice: VoicePreference {
                criteria: VoiceCriteria {
                    language: "hi".into(),
                    gender: Gender::Female,
                },
                alternates: Vec::new(),
                fallback: "en-US-shirley".into(),
            },
        }
    }
}

impl RemoteConfig {
    pub fn resolved_api_key(&self) -> String {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| self.api_key.clone())
    }

    pub fn options(&self) -> RemoteOptions {
        RemoteOptions {
            max_fragment_len: self.max_chars,
            format: self.format.clone(),
            style: self.style.clone(),
            rate: self.rate,
            pitch: self.pitch,
            voice: self.voice.criteria.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub max_fragment_chars: usize,
    pub pause_ms: u64,
    pub espeak_binary: String,
    pub voice: VoicePreference,
    pub settings: VoiceSettings,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            max_fragment_chars: 200,
            pause_ms: 300,
            espeak_binary: "espeak-ng".into(),
            voice: VoicePreference::default(),
            settings: VoiceSettings::default(),
        }
    }
}

impl LocalConfig {
    pub fn player_options(&self) -> PlayerOptions {
        PlayerOptions {
            max_fragment_len: self.max_fragment_chars,
            pause: Duration::from_millis(self.pause_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NarrativeConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    /// System persona prepended to every prompt. Empty uses the built-in one.
    pub persona: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "llama3.2:3b".into(),
            timeout_secs: 120,
            persona: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Empty means `~/.story-narrator-history`.
    pub dir: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub local: LocalConfig,
    pub narrative: NarrativeConfig,
    pub api: ApiConfig,
    pub history: HistoryConfig,
    /// Empty means `~/.config/story-narrator/voice-settings.json`.
    pub settings_path: String,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./narrator.yaml
    /// 2. ~/.config/story-narrator/config.yaml
    /// 3. /etc/story-narrator/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("narrator.yaml")),
                dirs::home_dir().map(|h| h.join(".config/story-narrator/config.yaml")),
                Some(PathBuf::from("/etc/story-narrator/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    pub fn history_dir(&self) -> PathBuf {
        if self.history.dir.is_empty() {
            crate::history::NarrationHistory::default_dir()
        } else {
            PathBuf::from(&self.history.dir)
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        if self.settings_path.is_empty() {
            crate::narration::settings::SettingsStore::default_path()
        } else {
            PathBuf::from(&self.settings_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_limits() {
        let config = Config::default();
        assert_eq!(config.remote.max_chars, 500);
        assert_eq!(config.remote.voice.criteria.gender, Gender::Female);
        assert_eq!(config.remote.voice.fallback, "en-US-shirley");
        assert_eq!(config.local.player_options().pause, Duration::from_millis(300));
        assert_eq!(config.local.settings.language, "hi-IN");
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::parse(
            r#"
remote:
  max_chars: 300
  voice:
    language: ta
    gender: male
local:
  pause_ms: 500
  settings:
    rate: 0.9
"#,
        )
        .unwrap();

        assert_eq!(config.remote.max_chars, 300);
        assert_eq!(config.remote.style, "Conversational");
        assert_eq!(config.remote.voice.criteria.language, "ta");
        assert_eq!(config.remote.voice.criteria.gender, Gender::Male);
        assert_eq!(config.local.pause_ms, 500);
        assert_eq!(config.local.settings.rate, 0.9);
        assert_eq!(config.local.settings.pitch, 1.2);
        assert_eq!(config.api.port, 8768);
    }

    #[test]
    fn local_voice_chain_prefers_hindi_then_female() {
        let voice = LocalConfig::default().voice;
        let chain = voice.chain();
        assert_eq!(chain[0].language, "hi");
        assert_eq!(chain[1].language, "");
        assert_eq!(chain[1].gender, Gender::Female);
        assert_eq!(voice.fallback, "hi");
        assert!(RemoteConfig::default().voice.alternates.is_empty());
    }

    #[test]
    fn options_carry_delivery_settings() {
        let options = RemoteConfig::default().options();
        assert_eq!(options.max_fragment_len, 500);
        assert_eq!(options.rate, -10);
        assert_eq!(options.pitch, 5);
        assert_eq!(options.format, "MP3");
    }
}
