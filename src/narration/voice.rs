//! Voice catalog types and the memoizing voice resolver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{NarrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Gender {
    /// Lenient parse used for catalog data ("Female", "F", "male", ...).
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "female" | "f" => Self::Female,
            "male" | "m" => Self::Male,
            _ => Self::Unspecified,
        }
    }
}

/// One voice offered by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub id: String,
    pub language: String,
    pub gender: Gender,
    #[serde(default)]
    pub styles: Vec<String>,
}

/// What a narration path wants from a voice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceCriteria {
    /// Matched case-insensitively against the start of `VoiceProfile::language`.
    pub language: String,
    /// `Unspecified` accepts any gender.
    pub gender: Gender,
}

impl Default for VoiceCriteria {
    fn default() -> Self {
        Self {
            language: "hi".into(),
            gender: Gender::Unspecified,
        }
    }
}

impl VoiceCriteria {
    pub fn matches(&self, voice: &VoiceProfile) -> bool {
        let language_ok = voice
            .language
            .to_lowercase()
            .starts_with(&self.language.to_lowercase());
        let gender_ok = self.gender == Gender::Unspecified || voice.gender == self.gender;
        language_ok && gender_ok
    }
}

/// Source of available voices for one playback backend.
#[async_trait]
pub trait VoiceCatalog: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<VoiceProfile>>;
}

/// Resolves a preferred voice id per criteria and remembers the answer.
///
/// The catalog is queried at most once per distinct request until `reset`
/// is called. A failed lookup leaves the cache untouched so the next call
/// retries.
pub struct VoiceResolver {
    catalog: Arc<dyn VoiceCatalog>,
    fallback: String,
    cache: AsyncMutex<HashMap<(Vec<VoiceCriteria>, bool), String>>,
}

impl VoiceResolver {
    pub fn new(catalog: Arc<dyn VoiceCatalog>, fallback: impl Into<String>) -> Self {
        Self {
            catalog,
            fallback: fallback.into(),
            cache: AsyncMutex::new(HashMap::new()),
        }
    }

    /// First catalog voice matching `criteria`, else the fallback id.
    pub async fn resolve(&self, criteria: &VoiceCriteria) -> Result<String> {
        self.lookup(std::slice::from_ref(criteria), false).await
    }

    /// Tries each criteria in order, then the first voice the catalog
    /// offers, then the fallback id.
    pub async fn resolve_preferred(&self, preferences: &[VoiceCriteria]) -> Result<String> {
        self.lookup(preferences, true).await
    }

    async fn lookup(&self, preferences: &[VoiceCriteria], first_available: bool) -> Result<String> {
        let key = (preferences.to_vec(), first_available);
        // Held across the lookup so concurrent first callers share one query.
        let mut cache = self.cache.lock().await;
        if let Some(id) = cache.get(&key) {
            debug!("Voice cache hit for {preferences:?}: {id}");
            return Ok(id.clone());
        }

        let voices = self.catalog.list_voices().await.map_err(|e| {
            warn!("Voice catalog lookup failed: {e}");
            match e {
                NarrationError::VoiceCatalogUnavailable(reason) => {
                    NarrationError::VoiceCatalogUnavailable(reason)
                }
                other => NarrationError::VoiceCatalogUnavailable(other.to_string()),
            }
        })?;

        let matched = preferences
            .iter()
            .find_map(|criteria| voices.iter().find(|v| criteria.matches(v)))
            .or_else(|| voices.first().filter(|_| first_available));

        let id = match matched {
            Some(voice) => {
                info!("Resolved voice {} for {preferences:?}", voice.id);
                voice.id.clone()
            }
            None => {
                info!(
                    "No voice in catalog ({} entries) matches {preferences:?}, using {}",
                    voices.len(),
                    self.fallback
                );
                self.fallback.clone()
            }
        };

        cache.insert(key, id.clone());
        Ok(id)
    }

    /// Forget every resolved voice.
    pub async fn reset(&self) {
        self.cache.lock().await.clear();
    }
}
