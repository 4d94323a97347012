//! story-narrator: fragmented story narration through a remote speech
//! provider or a local synthesis engine.

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod narration;
pub mod narrative;
