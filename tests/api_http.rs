//! Exercises the narrator HTTP API end to end with in-process fakes.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use story_narrator::api::{self, NarratorApiState};
use story_narrator::error::{NarrationError, Result};
use story_narrator::history::NarrationHistory;
use story_narrator::narration::engine::{SynthesisEngine, Utterance, UtteranceEvent};
use story_narrator::narration::player::{PlayerOptions, UtterancePlayer};
use story_narrator::narration::remote::{
    FragmentAudioRequest, RemoteOptions, RemoteSequencer, SpeechProvider,
};
use story_narrator::narration::settings::{SettingsStore, VoiceSettings};
use story_narrator::narration::voice::{Gender, VoiceCatalog, VoiceCriteria, VoiceProfile, VoiceResolver};
use story_narrator::narrative::NarrativeSource;

/// Accepts utterances and never finishes them.
#[derive(Default)]
struct HoldingEngine {
    spoken: Mutex<Vec<Utterance>>,
}

impl SynthesisEngine for HoldingEngine {
    fn speak(&self, utterance: Utterance, _events: UnboundedSender<UtteranceEvent>) {
        self.spoken.lock().unwrap().push(utterance);
    }
    fn pause(&self) {}
    fn resume(&self) {}
    fn cancel_all(&self) {}
}

/// Records prompts. Category prompts get a story with no readable title.
#[derive(Default)]
struct FakeNarrator {
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl NarrativeSource for FakeNarrator {
    async fn generate(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if prompt.starts_with("मेरे") {
            return Ok("जंगल के किनारे एक छोटा सा गाँव था जहाँ हर शाम बच्चे पेड़ों के नीचे खेलते थे और चिड़ियाँ गाती थीं।".into());
        }
        if prompt == "fail" {
            return Err(NarrationError::Provider {
                status: 503,
                body: "model offline".into(),
            });
        }
        Ok("एक बार की बात है, एक गाँव में। सोने की चिड़िया। अंत।".into())
    }
}

/// Numbered audio references; fails on text containing `FAIL`.
struct FakeSpeech;

#[async_trait]
impl VoiceCatalog for FakeSpeech {
    async fn list_voices(&self) -> Result<Vec<VoiceProfile>> {
        Ok(vec![VoiceProfile {
            id: "hi-IN-kavya".into(),
            language: "hi-IN".into(),
            gender: Gender::Female,
            styles: vec![],
        }])
    }
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    fn max_text_len(&self) -> usize {
        20
    }

    async fn generate_fragment_audio(&self, request: &FragmentAudioRequest) -> Result<String> {
        if request.text.contains("FAIL") {
            return Err(NarrationError::Provider {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(format!("mem://{}/{}", request.voice_id, request.text.chars().count()))
    }
}

struct Harness {
    base: String,
    http: reqwest::Client,
    dir: tempfile::TempDir,
    prompts: Arc<Mutex<Vec<String>>>,
}

async fn spawn_api(with_remote: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let player = UtterancePlayer::new(
        Arc::new(HoldingEngine::default()),
        PlayerOptions::default(),
        VoiceSettings::default(),
    );

    let sequencer = with_remote.then(|| {
        let speech = Arc::new(FakeSpeech);
        let resolver = Arc::new(VoiceResolver::new(speech.clone(), "en-US-shirley"));
        Arc::new(RemoteSequencer::new(
            speech,
            resolver,
            RemoteOptions {
                max_fragment_len: 500,
                format: "MP3".into(),
                style: "Conversational".into(),
                rate: -10,
                pitch: 5,
                voice: VoiceCriteria {
                    language: "hi".into(),
                    gender: Gender::Female,
                },
            },
        ))
    });

    let narrator = FakeNarrator::default();
    let prompts = narrator.prompts.clone();
    let state = NarratorApiState {
        player,
        sequencer,
        narrator: Arc::new(narrator),
        settings_store: Arc::new(SettingsStore::new(dir.path().join("settings.json"))),
        history: Some(Arc::new(NarrationHistory::new(dir.path().join("history")))),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(api::serve(listener, state));

    Harness {
        base: format!("http://{addr}"),
        http: reqwest::Client::new(),
        dir,
        prompts,
    }
}

impl Harness {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn status(&self) -> Value {
        self.http
            .get(format!("{}/status", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn playback_controls_follow_state_machine() {
    let h = spawn_api(false).await;

    let (status, body) = h
        .post("/speak", json!({ "text": "एक बार की बात है। राजा बहुत दयालु था।" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["fragments"], 1);
    assert_eq!(h.status().await["state"], "speaking");

    assert_eq!(h.post("/pause", json!({})).await.0, StatusCode::OK);
    assert_eq!(h.status().await["state"], "paused");

    let (status, body) = h.post("/pause", json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("PAUSED"));

    assert_eq!(h.post("/resume", json!({})).await.0, StatusCode::OK);
    assert_eq!(h.post("/stop", json!({})).await.0, StatusCode::OK);

    let status = h.status().await;
    assert_eq!(status["state"], "idle");
    assert!(status.get("progress").is_none());
    assert_eq!(status["remote_configured"], false);

    // The stopped session is recorded once its completion settles.
    let history = NarrationHistory::new(h.dir.path().join("history"));
    for _ in 0..100 {
        if !history.load_records("today").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let records = history.load_records("today");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, "stopped");
}

#[tokio::test]
async fn blank_speak_is_rejected() {
    let h = spawn_api(false).await;
    let (status, _) = h.post("/speak", json!({ "text": "  \n" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.status().await["state"], "idle");
}

#[tokio::test]
async fn settings_update_applies_and_persists() {
    let h = spawn_api(false).await;

    let (status, body) = h
        .post("/settings", json!({ "rate": 0.9, "muted": true }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["volume"], 0.0);

    let stored = SettingsStore::new(h.dir.path().join("settings.json"))
        .load()
        .unwrap();
    assert_eq!(stored.rate, 0.9);
    assert_eq!(stored.volume, 0.0);
    assert_eq!(stored.pitch, 1.2);
}

#[tokio::test]
async fn generate_voice_returns_ordered_urls() {
    let h = spawn_api(true).await;

    let (status, body) = h
        .post("/generate-voice", json!({ "text": "पहला वाक्य है। दूसरा वाक्य है।" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["audio_urls"],
        json!(["mem://hi-IN-kavya/14", "mem://hi-IN-kavya/15"])
    );
}

#[tokio::test]
async fn generate_voice_failure_signals_fallback_with_prefix() {
    let h = spawn_api(true).await;

    let (status, body) = h
        .post("/generate-voice", json!({ "text": "पहला वाक्य है। FAIL यहाँ।" }))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["fallback"], true);
    assert_eq!(body["audio_urls"], json!(["mem://hi-IN-kavya/14"]));
    assert!(body["error"].as_str().unwrap().contains("fragment 1 of 2"));
}

#[tokio::test]
async fn generate_voice_validates_input_and_configuration() {
    let h = spawn_api(false).await;
    assert_eq!(
        h.post("/generate-voice", json!({ "text": "" })).await.0,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        h.post("/generate-voice", json!({ "text": "कहानी।" })).await.0,
        StatusCode::INTERNAL_SERVER_ERROR
    );
}

#[tokio::test]
async fn generate_story_routes() {
    let h = spawn_api(false).await;

    let (status, _) = h.post("/generate-story", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .post("/generate-story", json!({ "prompt": "राजा की कहानी", "system": "दादी" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "सोने की चिड़िया");
    assert!(body["text"].as_str().unwrap().starts_with("एक बार की बात है"));

    let (status, body) = h.post("/generate-story", json!({ "prompt": "fail" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn category_builds_prompt_and_default_title() {
    let h = spawn_api(false).await;

    let (status, body) = h
        .post(
            "/generate-story",
            json!({ "category": "jungle", "name": "आरव" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "जंगल एडवेंचर - आरव");
    {
        let prompts = h.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("मेरे बहादुर आरव के लिए जंगल"));
    }

    let (status, body) = h
        .post(
            "/generate-story",
            json!({ "category": "custom", "name": "मीरा", "themes": "डायनासोर" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "आपकी खास कहानी - मीरा");
    assert!(h.prompts.lock().unwrap()[1].contains("ये चीज़ें हों: डायनासोर।"));

    // An explicit prompt wins over the category.
    let (status, body) = h
        .post(
            "/generate-story",
            json!({ "prompt": "राजा की कहानी", "category": "bedtime" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "सोने की चिड़िया");
    assert_eq!(h.prompts.lock().unwrap()[2], "राजा की कहानी");

    let (status, _) = h
        .post("/generate-story", json!({ "category": "pirates" }))
        .await;
    assert!(status.is_client_error());
}
