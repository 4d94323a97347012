//! Error types for story-narrator.

use thiserror::Error;

use crate::narration::player::PlaybackState;
use crate::narration::remote::AudioAsset;

#[derive(Error, Debug)]
pub enum NarrationError {
    #[error("no text to narrate")]
    EmptyInput,

    #[error("fragment length limit must be greater than zero")]
    InvalidFragmentLength,

    #[error("voice catalog unavailable: {0}")]
    VoiceCatalogUnavailable(String),

    /// A remote fragment request failed. `completed` holds the audio obtained
    /// for fragments `0..index`, in order.
    #[error("fragment {index} of {total} failed: {reason}")]
    FragmentGenerationFailed {
        index: usize,
        total: usize,
        completed: Vec<AudioAsset>,
        reason: String,
    },

    #[error("speech synthesis failed: {0}")]
    SynthesisError(String),

    #[error("cannot {action} while {state}")]
    InvalidStateTransition {
        action: &'static str,
        state: PlaybackState,
    },

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NarrationError {
    /// Audio already produced before a remote failure, if any.
    pub fn partial_audio(&self) -> &[AudioAsset] {
        match self {
            Self::FragmentGenerationFailed { completed, .. } => completed,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, NarrationError>;
