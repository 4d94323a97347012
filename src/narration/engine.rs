//! Local synthesis engines.
//!
//! An engine speaks one utterance at a time and reports its progress as
//! `UtteranceEvent`s tagged with the utterance id. Pause, resume and
//! cancel act on the whole engine, not on a single utterance.
//!
//! `EspeakEngine` renders each utterance with espeak-ng and plays the WAV
//! through a rodio sink:
//! 1. Utterance → `espeak-ng --stdout` (voice, speed, pitch)
//! 2. WAV bytes → rodio `Decoder`
//! 3. Decoder → `Sink` with per-utterance volume, polled until drained

use std::io::Cursor;
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::voice::{Gender, VoiceCatalog, VoiceProfile};
use crate::error::{NarrationError, Result};

/// One unit of speech handed to an engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub voice_id: String,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UtteranceSignal {
    Start,
    End,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceEvent {
    pub utterance_id: u64,
    pub signal: UtteranceSignal,
}

impl UtteranceEvent {
    pub fn new(utterance_id: u64, signal: UtteranceSignal) -> Self {
        Self {
            utterance_id,
            signal,
        }
    }
}

/// A single-voice speech resource.
pub trait SynthesisEngine: Send + Sync {
    /// Queue `utterance` and report its start/end/error on `events`.
    /// Utterances discarded by `cancel_all` report nothing further.
    fn speak(&self, utterance: Utterance, events: UnboundedSender<UtteranceEvent>);
    fn pause(&self);
    fn resume(&self);
    fn cancel_all(&self);
}

const ESPEAK_BASE_WPM: f32 = 175.0;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct EspeakShared {
    binary: String,
    // Kept alive for the process lifetime; sinks attach to its mixer.
    output: Option<OutputStream>,
    active_sink: Mutex<Option<Arc<Sink>>>,
    paused: AtomicBool,
    generation: AtomicU64,
}

impl EspeakShared {
    fn sink_slot(&self) -> MutexGuard<'_, Option<Arc<Sink>>> {
        self.active_sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// espeak-ng + rodio engine.
#[derive(Clone)]
pub struct EspeakEngine {
    shared: Arc<EspeakShared>,
}

impl EspeakEngine {
    /// Open the default audio output. Without an output device utterances
    /// report a synthesis error instead of playing.
    pub fn new(binary: &str) -> Self {
        let output = match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Failed to open audio output: {e}");
                None
            }
        };
        Self::with_output(binary, output)
    }

    fn with_output(binary: &str, output: Option<OutputStream>) -> Self {
        Self {
            shared: Arc::new(EspeakShared {
                binary: binary.to_string(),
                output,
                active_sink: Mutex::new(None),
                paused: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Voice catalog backed by `espeak-ng --voices`.
    pub fn catalog(&self) -> EspeakCatalog {
        EspeakCatalog {
            binary: self.shared.binary.clone(),
        }
    }
}

/// Map an utterance onto espeak-ng arguments.
fn espeak_args(utterance: &Utterance) -> Vec<String> {
    let voice = if utterance.voice_id.is_empty() {
        utterance
            .language
            .split(['-', '_'])
            .next()
            .unwrap_or("en")
            .to_lowercase()
    } else {
        utterance.voice_id.clone()
    };
    let wpm = (utterance.rate * ESPEAK_BASE_WPM).clamp(80.0, 450.0).round() as u32;
    let pitch = (utterance.pitch * 50.0).clamp(0.0, 99.0).round() as u32;

    vec![
        "--stdout".into(),
        "-v".into(),
        voice,
        "-s".into(),
        wpm.to_string(),
        "-p".into(),
        pitch.to_string(),
        // Dialogue lines often open with a dash.
        "--".into(),
        utterance.text.clone(),
    ]
}

fn render_wav(binary: &str, utterance: &Utterance) -> std::result::Result<Vec<u8>, String> {
    let output = Command::new(binary)
        .args(espeak_args(utterance))
        .output()
        .map_err(|e| format!("Failed to run {binary}: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "{binary} error: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(output.stdout)
}

impl EspeakShared {
    /// Install `sink` as the active sink, paused if the engine is paused.
    ///
    /// The pause flag is read under the slot lock that `pause`/`resume`
    /// also take, so a pause can never land between the check and the
    /// install. Returns `false` if the utterance was cancelled meanwhile.
    fn attach_sink(&self, sink: &Arc<Sink>, generation: u64) -> bool {
        let mut slot = self.sink_slot();
        if self.generation.load(Ordering::SeqCst) != generation {
            sink.stop();
            return false;
        }
        if self.paused.load(Ordering::SeqCst) {
            sink.pause();
        }
        *slot = Some(sink.clone());
        true
    }

    /// Blocking body of one utterance. Returns the signal to report, or
    /// `None` if the utterance was cancelled.
    fn play(
        &self,
        utterance: &Utterance,
        generation: u64,
        events: &UnboundedSender<UtteranceEvent>,
    ) -> Option<UtteranceSignal> {
        let cancelled = || self.generation.load(Ordering::SeqCst) != generation;

        let wav = match render_wav(&self.binary, utterance) {
            Ok(wav) => wav,
            Err(e) => return Some(UtteranceSignal::Error(e)),
        };
        if cancelled() {
            return None;
        }

        let Some(stream) = &self.output else {
            return Some(UtteranceSignal::Error("No audio output stream".into()));
        };
        let source = match Decoder::new(Cursor::new(wav)) {
            Ok(source) => source,
            Err(e) => return Some(UtteranceSignal::Error(format!("Failed to decode audio: {e}"))),
        };

        let sink = Arc::new(Sink::connect_new(stream.mixer()));
        sink.set_volume(utterance.volume.clamp(0.0, 1.0));
        if !self.attach_sink(&sink, generation) {
            return None;
        }
        sink.append(source);
        let _ = events.send(UtteranceEvent::new(utterance.id, UtteranceSignal::Start));

        loop {
            if cancelled() {
                sink.stop();
                return None;
            }
            if sink.empty() {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let mut slot = self.sink_slot();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &sink)) {
            *slot = None;
        }
        Some(UtteranceSignal::End)
    }
}

impl SynthesisEngine for EspeakEngine {
    fn speak(&self, utterance: Utterance, events: UnboundedSender<UtteranceEvent>) {
        let shared = self.shared.clone();
        let generation = shared.generation.load(Ordering::SeqCst);
        debug!("espeak utterance {}: {} chars", utterance.id, utterance.text.chars().count());

        tokio::task::spawn_blocking(move || {
            if let Some(signal) = shared.play(&utterance, generation, &events) {
                if let UtteranceSignal::Error(e) = &signal {
                    warn!("espeak utterance {} failed: {e}", utterance.id);
                }
                let _ = events.send(UtteranceEvent::new(utterance.id, signal));
            }
        });
    }

    fn pause(&self) {
        let slot = self.shared.sink_slot();
        self.shared.paused.store(true, Ordering::SeqCst);
        if let Some(sink) = slot.as_ref() {
            sink.pause();
        }
    }

    fn resume(&self) {
        let slot = self.shared.sink_slot();
        self.shared.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = slot.as_ref() {
            sink.play();
        }
    }

    fn cancel_all(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        if let Some(sink) = self.shared.sink_slot().take() {
            sink.stop();
        }
        info!("Local speech cancelled");
    }
}

/// Lists voices installed for espeak-ng.
pub struct EspeakCatalog {
    binary: String,
}

/// Parse `espeak-ng --voices` output.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  hi              --/M      Hindi              inc/hi
/// ```
fn parse_voice_table(table: &str) -> Vec<VoiceProfile> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            let gender = cols[2].rsplit('/').next().map_or(Gender::Unspecified, Gender::parse);
            Some(VoiceProfile {
                id: cols[1].to_string(),
                language: cols[1].to_string(),
                gender,
                styles: Vec::new(),
            })
        })
        .collect()
}

#[async_trait]
impl VoiceCatalog for EspeakCatalog {
    async fn list_voices(&self) -> Result<Vec<VoiceProfile>> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--voices")
            .output()
            .await
            .map_err(|e| NarrationError::VoiceCatalogUnavailable(format!("{}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(NarrationError::VoiceCatalogUnavailable(format!(
                "{} --voices exited with {}",
                self.binary, output.status
            )));
        }

        let voices = parse_voice_table(&String::from_utf8_lossy(&output.stdout));
        debug!("espeak-ng lists {} voices", voices.len());
        Ok(voices)
    }
}
