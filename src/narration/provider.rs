//! HTTP client for the remote speech-generation provider.
//!
//! Wire format:
//! - `GET  {endpoint}/voices`   → `[{voice_id, language, gender, styles}]`
//! - `POST {endpoint}/generate` ← `{voice_id, text, output_format, style, rate, pitch}`
//!   → `{audio_file}`
//!
//! Every request carries the key in an `api-key` header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::remote::{FragmentAudioRequest, SpeechProvider};
use super::voice::{Gender, VoiceCatalog, VoiceProfile};
use crate::config::RemoteConfig;
use crate::error::{NarrationError, Result};

#[derive(Deserialize)]
struct CatalogVoice {
    voice_id: String,
    language: String,
    #[serde(default)]
    gender: String,
    #[serde(default)]
    styles: Vec<String>,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    voice_id: &'a str,
    text: &'a str,
    output_format: &'a str,
    style: &'a str,
    rate: i32,
    pitch: i32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    audio_file: Option<String>,
}

pub struct RemoteSpeechClient {
    endpoint: String,
    api_key: String,
    max_chars: usize,
    client: Client,
}

impl RemoteSpeechClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.resolved_api_key(),
            max_chars: config.max_chars,
            client,
        })
    }

    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(NarrationError::Provider {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl VoiceCatalog for RemoteSpeechClient {
    async fn list_voices(&self) -> Result<Vec<VoiceProfile>> {
        let url = format!("{}/voices", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .header("api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| NarrationError::VoiceCatalogUnavailable(e.to_string()))?;
        let resp = Self::check(resp)
            .await
            .map_err(|e| NarrationError::VoiceCatalogUnavailable(e.to_string()))?;

        let voices: Vec<CatalogVoice> = resp
            .json()
            .await
            .map_err(|e| NarrationError::VoiceCatalogUnavailable(format!("bad voice list: {e}")))?;
        debug!("Remote catalog lists {} voices", voices.len());

        Ok(voices
            .into_iter()
            .map(|v| VoiceProfile {
                id: v.voice_id,
                language: v.language,
                gender: Gender::parse(&v.gender),
                styles: v.styles,
            })
            .collect())
    }
}

#[async_trait]
impl SpeechProvider for RemoteSpeechClient {
    fn max_text_len(&self) -> usize {
        self.max_chars
    }

    async fn generate_fragment_audio(&self, request: &FragmentAudioRequest) -> Result<String> {
        let url = format!("{}/generate", self.endpoint);
        let body = GenerateBody {
            voice_id: &request.voice_id,
            text: &request.text,
            output_format: &request.format,
            style: &request.style,
            rate: request.rate,
            pitch: request.pitch,
        };

        let resp = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        let data: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| NarrationError::MalformedResponse(e.to_string()))?;
        match data.audio_file {
            Some(audio) if !audio.is_empty() => Ok(audio),
            _ => Err(NarrationError::MalformedResponse(
                "response has no audio_file".into(),
            )),
        }
    }
}
