//! HTTP API server for story narration.
//!
//! Local playback control plus the remote voice and story generation
//! routes. Binds to 127.0.0.1 on port 8768 (configurable) using axum.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::NarrationError;
use crate::history::{NarrationHistory, NarrationPath, NarrationRecord};
use crate::narration::player::{PlaybackOutcome, PlaybackState, UtterancePlayer};
use crate::narration::remote::RemoteSequencer;
use crate::narration::settings::{SettingsStore, SettingsUpdate, VoiceSettings};
use crate::narrative::{extract_title, NarrativeSource, StoryCategory, FALLBACK_TITLE};

#[derive(Clone)]
pub struct NarratorApiState {
    pub player: UtterancePlayer,
    /// `None` when no provider key is configured.
    pub sequencer: Option<Arc<RemoteSequencer>>,
    pub narrator: Arc<dyn NarrativeSource>,
    pub settings_store: Arc<SettingsStore>,
    pub history: Option<Arc<NarrationHistory>>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct GenerateVoiceRequest {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GenerateStoryRequest {
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    system: Option<String>,
    /// Builds the prompt when `prompt` is blank.
    #[serde(default)]
    category: Option<StoryCategory>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    themes: String,
}

#[derive(Serialize)]
struct Progress {
    cursor: usize,
    total: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<Progress>,
    settings: VoiceSettings,
    remote_configured: bool,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn ok(status: &str) -> Response {
    Json(json!({ "status": status })).into_response()
}

/// Build the axum router.
pub fn router(state: NarratorApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .route("/pause", post(handle_pause))
        .route("/resume", post(handle_resume))
        .route("/stop", post(handle_stop))
        .route("/settings", post(handle_settings))
        .route("/generate-voice", post(handle_generate_voice))
        .route("/generate-story", post(handle_generate_story))
        .with_state(state)
}

/// Serve on an already-bound listener until the server fails.
pub async fn serve(listener: TcpListener, state: NarratorApiState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Start the API server as a background tokio task.
pub async fn start_api(state: NarratorApiState, port: u16) {
    let addr = format!("127.0.0.1:{port}");
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind narrator API on {addr}: {e}");
            return;
        }
    };
    info!("Narrator API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = serve(listener, state).await {
            warn!("Narrator API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<NarratorApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: state.player.state(),
        progress: state
            .player
            .progress()
            .map(|(cursor, total)| Progress { cursor, total }),
        settings: state.player.settings(),
        remote_configured: state.sequencer.is_some(),
    })
}

async fn handle_speak(
    State(state): State<NarratorApiState>,
    Json(req): Json<SpeakRequest>,
) -> Response {
    let t_start = Instant::now();
    let completion = match state.player.speak(&req.text) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let fragments = state.player.progress().map(|(_, total)| total).unwrap_or(0);

    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| extract_title(&req.text, FALLBACK_TITLE));
    let mut record = NarrationRecord::now(NarrationPath::Local, title, &req.text);
    record.fragments = fragments;
    record.voice = state.player.settings().voice_id;

    // Fire-and-forget: record the outcome once the session settles.
    let history = state.history.clone();
    tokio::spawn(async move {
        record.outcome = match completion.wait().await {
            Ok(PlaybackOutcome::Completed { .. }) => "completed".into(),
            Ok(PlaybackOutcome::Stopped { .. }) => "stopped".into(),
            Err(e) => {
                warn!("Narration failed: {e}");
                "failed".into()
            }
        };
        record.duration_ms = t_start.elapsed().as_millis() as i64;
        if let Some(history) = history {
            history.save_record(&record);
        }
    });

    Json(json!({ "status": "speaking", "fragments": fragments })).into_response()
}

fn transition_response(result: crate::error::Result<()>, status: &str) -> Response {
    match result {
        Ok(()) => ok(status),
        Err(e) => error_response(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn handle_pause(State(state): State<NarratorApiState>) -> Response {
    transition_response(state.player.pause(), "paused")
}

async fn handle_resume(State(state): State<NarratorApiState>) -> Response {
    transition_response(state.player.resume(), "speaking")
}

async fn handle_stop(State(state): State<NarratorApiState>) -> Response {
    state.player.stop();
    ok("stopped")
}

async fn handle_settings(
    State(state): State<NarratorApiState>,
    Json(update): Json<SettingsUpdate>,
) -> Response {
    let settings = state.player.update_settings(&update);
    if let Err(e) = state.settings_store.save(&settings) {
        warn!("Failed to persist voice settings: {e}");
    }
    Json(settings).into_response()
}

async fn handle_generate_voice(
    State(state): State<NarratorApiState>,
    Json(req): Json<GenerateVoiceRequest>,
) -> Response {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Text missing");
    }
    let Some(sequencer) = state.sequencer.clone() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "remote speech provider key missing",
        );
    };

    let t_start = Instant::now();
    let mut record = NarrationRecord::now(
        NarrationPath::Remote,
        extract_title(&req.text, FALLBACK_TITLE),
        &req.text,
    );

    let response = match sequencer.generate_audio(&req.text).await {
        Ok(assets) => {
            record.fragments = assets.len();
            record.outcome = "completed".into();
            let urls: Vec<String> = assets.into_iter().map(|a| a.audio_ref).collect();
            Json(json!({ "audio_urls": urls })).into_response()
        }
        Err(NarrationError::EmptyInput) => {
            return error_response(StatusCode::BAD_REQUEST, "Text missing");
        }
        Err(e) => {
            warn!("Remote voice generation failed: {e}");
            let urls: Vec<&str> = e.partial_audio().iter().map(|a| a.audio_ref.as_str()).collect();
            record.fragments = urls.len();
            record.outcome = "fallback".into();
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": e.to_string(),
                    "fallback": true,
                    "audio_urls": urls,
                })),
            )
                .into_response()
        }
    };

    record.duration_ms = t_start.elapsed().as_millis() as i64;
    if let Some(history) = &state.history {
        history.save_record(&record);
    }
    response
}

async fn handle_generate_story(
    State(state): State<NarratorApiState>,
    Json(req): Json<GenerateStoryRequest>,
) -> Response {
    let prompt = match (req.prompt.trim(), req.category) {
        ("", None) => return error_response(StatusCode::BAD_REQUEST, "Prompt is missing."),
        ("", Some(category)) => category.prompt_for(&req.name, &req.themes),
        (prompt, _) => prompt.to_string(),
    };
    let default_title = req
        .category
        .map(|c| c.default_title(&req.name))
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());

    match state.narrator.generate(&prompt, req.system.as_deref()).await {
        Ok(text) => {
            let title = extract_title(&text, &default_title);
            Json(json!({ "text": text, "title": title })).into_response()
        }
        Err(e) => {
            warn!("Story generation failed: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Story generation failed. Please try again.",
            )
        }
    }
}
