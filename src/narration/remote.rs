//! Remote fragment sequencer.
//!
//! Turns a narration into per-fragment audio assets from a speech provider
//! that only accepts short texts. Requests are strictly sequential: the next
//! fragment is submitted only after the previous response arrived, so the
//! returned assets are always in fragment order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fragmenter::fragment;
use super::voice::{VoiceCriteria, VoiceResolver};
use crate::error::{NarrationError, Result};

/// Body of one provider generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FragmentAudioRequest {
    pub voice_id: String,
    pub text: String,
    pub format: String,
    pub style: String,
    pub rate: i32,
    pub pitch: i32,
}

/// Audio produced for one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub index: usize,
    pub audio_ref: String,
}

/// A speech-generation service with a hard per-request text limit.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Longest text, in characters, a single request may carry.
    fn max_text_len(&self) -> usize;

    /// Generate audio for one fragment and return a reference to it.
    async fn generate_fragment_audio(&self, request: &FragmentAudioRequest) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub max_fragment_len: usize,
    pub format: String,
    pub style: String,
    pub rate: i32,
    pub pitch: i32,
    pub voice: VoiceCriteria,
}

pub struct RemoteSequencer {
    provider: Arc<dyn SpeechProvider>,
    resolver: Arc<VoiceResolver>,
    options: RemoteOptions,
}

impl RemoteSequencer {
    pub fn new(
        provider: Arc<dyn SpeechProvider>,
        resolver: Arc<VoiceResolver>,
        options: RemoteOptions,
    ) -> Self {
        Self {
            provider,
            resolver,
            options,
        }
    }

    /// Effective fragment limit: never above the provider's hard bound.
    pub fn fragment_limit(&self) -> usize {
        self.options
            .max_fragment_len
            .min(self.provider.max_text_len())
    }

    /// Generate audio for every fragment of `text`, in order.
    ///
    /// On the first failing fragment the remaining ones are not requested and
    /// `FragmentGenerationFailed` carries the assets obtained so far.
    pub async fn generate_audio(&self, text: &str) -> Result<Vec<AudioAsset>> {
        if text.trim().is_empty() {
            return Err(NarrationError::EmptyInput);
        }

        let t0 = Instant::now();
        let voice_id = self.resolver.resolve(&self.options.voice).await?;
        let fragments = fragment(text, self.fragment_limit())?;
        let total = fragments.len();
        info!(
            "Generating remote audio: {} chars → {total} fragments (voice: {voice_id})",
            text.chars().count()
        );

        let mut assets = Vec::with_capacity(total);
        for frag in fragments {
            let request = FragmentAudioRequest {
                voice_id: voice_id.clone(),
                text: frag.text,
                format: self.options.format.clone(),
                style: self.options.style.clone(),
                rate: self.options.rate,
                pitch: self.options.pitch,
            };

            match self.provider.generate_fragment_audio(&request).await {
                Ok(audio_ref) => {
                    debug!("Fragment {}/{total} ready: {audio_ref}", frag.index + 1);
                    assets.push(AudioAsset {
                        index: frag.index,
                        audio_ref,
                    });
                }
                Err(e) => {
                    warn!("Fragment {}/{total} failed: {e}", frag.index + 1);
                    return Err(NarrationError::FragmentGenerationFailed {
                        index: frag.index,
                        total,
                        completed: assets,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Remote audio complete: {total} fragments in {:.0}ms",
            t0.elapsed().as_secs_f64() * 1000.0
        );
        Ok(assets)
    }
}
