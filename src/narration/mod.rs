//! Narration: fragmenting text and sequencing its speech.
//!
//! Components:
//! - `fragmenter`: text → ordered, bounded-length fragments
//! - `voice`: voice catalog trait and the memoizing resolver
//! - `remote`: sequential per-fragment audio generation
//! - `provider`: HTTP client for the remote speech provider
//! - `player`: local utterance state machine (speak/pause/resume/stop)
//! - `engine`: synthesis engine trait + espeak-ng/rodio engine
//! - `settings`: voice settings and their file store
//! - `prosody`: cosmetic per-utterance text shaping

pub mod engine;
pub mod fragmenter;
pub mod player;
pub mod prosody;
pub mod provider;
pub mod remote;
pub mod settings;
pub mod voice;
