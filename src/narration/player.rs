//! Local utterance player with state machine.
//!
//! IDLE → SPEAKING ⇄ PAUSED → IDLE, with STOPPED and ERRORED as transient
//! states on the way back to IDLE.
//!
//! One fragment is in flight at a time. Each session owns its own event
//! channel and cancellation token, and every utterance id is checked
//! against the active session, so signals that arrive after `stop()` or a
//! newer `speak()` are dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{SynthesisEngine, Utterance, UtteranceSignal};
use super::fragmenter::{fragment, Fragment};
use super::prosody::shape_for_speech;
use super::settings::{SettingsUpdate, VoiceSettings};
use super::voice::{VoiceCriteria, VoiceResolver};
use crate::error::{NarrationError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Speaking,
    Paused,
    Stopped,
    Errored,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Speaking => write!(f, "SPEAKING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Errored => write!(f, "ERRORED"),
        }
    }
}

/// How a narration session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PlaybackOutcome {
    Completed { fragments: usize },
    Stopped { spoken: usize, fragments: usize },
}

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Fragment length for local playback, in characters.
    pub max_fragment_len: usize,
    /// Silence inserted after each fragment.
    pub pause: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            max_fragment_len: 200,
            pause: Duration::from_millis(300),
        }
    }
}

type Callback = Arc<dyn Fn() + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&NarrationError) + Send + Sync>;

/// Session callbacks.
///
/// They run while the player is locked: keep them short and never call
/// back into the player from inside one (spawn a task instead).
#[derive(Clone, Default)]
pub struct PlayerCallbacks {
    on_start: Option<Callback>,
    on_end: Option<Callback>,
    on_error: Option<ErrorCallback>,
}

impl PlayerCallbacks {
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_end(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_end = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&NarrationError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// Resolves when a session completes, is stopped, or fails.
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<Result<PlaybackOutcome>>,
}

impl PlaybackCompletion {
    pub async fn wait(self) -> Result<PlaybackOutcome> {
        self.rx.await.unwrap_or_else(|_| {
            Err(NarrationError::SynthesisError(
                "playback ended without a result".into(),
            ))
        })
    }
}

struct PlaybackSession {
    id: u64,
    fragments: Arc<Vec<Fragment>>,
    cursor: usize,
    cancel: CancellationToken,
    done: Option<oneshot::Sender<Result<PlaybackOutcome>>>,
}

impl PlaybackSession {
    fn finish(&mut self, result: Result<PlaybackOutcome>) {
        self.cancel.cancel();
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

struct PlayerCore {
    state: PlaybackState,
    session: Option<PlaybackSession>,
    settings: VoiceSettings,
    callbacks: PlayerCallbacks,
    next_session_id: u64,
    next_utterance_id: u64,
}

impl PlayerCore {
    fn transition(&mut self, to: PlaybackState) {
        if self.state != to {
            info!("State: {} → {to}", self.state);
            self.state = to;
        }
    }

    fn active(&mut self, session_id: u64) -> Option<&mut PlaybackSession> {
        self.session.as_mut().filter(|s| s.id == session_id)
    }
}

struct Shared {
    engine: Arc<dyn SynthesisEngine>,
    options: PlayerOptions,
    core: Mutex<PlayerCore>,
    resumed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayerCore> {
        self.core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tear down any session and return to IDLE. Caller holds the lock.
    fn stop_locked(&self, core: &mut PlayerCore) {
        if let Some(mut session) = core.session.take() {
            let total = session.fragments.len();
            session.finish(Ok(PlaybackOutcome::Stopped {
                spoken: session.cursor,
                fragments: total,
            }));
            core.transition(PlaybackState::Stopped);
            debug!("Session {} stopped at fragment {}/{total}", session.id, session.cursor);
        }
        self.engine.cancel_all();
        core.transition(PlaybackState::Idle);
    }

    /// State of `session_id`, or `None` once it is no longer active.
    fn session_state(&self, session_id: u64) -> Option<PlaybackState> {
        let mut core = self.lock();
        core.active(session_id)?;
        Some(core.state)
    }

    fn fire_start(&self, session_id: u64) {
        let mut core = self.lock();
        if core.active(session_id).is_some() {
            if let Some(cb) = &core.callbacks.on_start {
                cb();
            }
        }
    }

    fn fail(&self, session_id: u64, reason: String) {
        let mut core = self.lock();
        let Some(mut session) = core.session.take_if(|s| s.id == session_id) else {
            return;
        };
        warn!(
            "Synthesis failed on fragment {}/{}: {reason}",
            session.cursor + 1,
            session.fragments.len()
        );
        core.transition(PlaybackState::Errored);
        let err = NarrationError::SynthesisError(reason);
        if let Some(cb) = &core.callbacks.on_error {
            cb(&err);
        }
        session.finish(Err(err));
        core.transition(PlaybackState::Idle);
    }

    /// Move past the finished fragment. Returns `false` when driving should stop.
    fn advance(&self, session_id: u64) -> bool {
        let mut core = self.lock();
        let Some(session) = core.active(session_id) else {
            return false;
        };
        session.cursor += 1;
        let total = session.fragments.len();
        if session.cursor < total {
            debug!("Fragment {}/{total} next", session.cursor + 1);
            return true;
        }

        if let Some(mut session) = core.session.take() {
            session.finish(Ok(PlaybackOutcome::Completed { fragments: total }));
        }
        core.transition(PlaybackState::Idle);
        if let Some(cb) = &core.callbacks.on_end {
            cb();
        }
        info!("Narration complete: {total} fragments");
        false
    }
}

/// Drives a local synthesis engine through a fragment sequence.
#[derive(Clone)]
pub struct UtterancePlayer {
    shared: Arc<Shared>,
}

impl UtterancePlayer {
    pub fn new(
        engine: Arc<dyn SynthesisEngine>,
        options: PlayerOptions,
        settings: VoiceSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                options,
                core: Mutex::new(PlayerCore {
                    state: PlaybackState::Idle,
                    session: None,
                    settings,
                    callbacks: PlayerCallbacks::default(),
                    next_session_id: 0,
                    next_utterance_id: 0,
                }),
                resumed: Notify::new(),
            }),
        }
    }

    pub fn set_callbacks(&self, callbacks: PlayerCallbacks) {
        self.shared.lock().callbacks = callbacks;
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// `(cursor, total)` of the active session.
    pub fn progress(&self) -> Option<(usize, usize)> {
        let core = self.shared.lock();
        core.session
            .as_ref()
            .map(|s| (s.cursor, s.fragments.len()))
    }

    pub fn settings(&self) -> VoiceSettings {
        self.shared.lock().settings.clone()
    }

    /// Applies to the next utterance; the one in flight keeps its settings.
    pub fn update_settings(&self, update: &SettingsUpdate) -> VoiceSettings {
        let mut core = self.shared.lock();
        core.settings.apply(update);
        core.settings.clone()
    }

    /// Fill in the resolver's preferred voice when no voice is set.
    pub async fn adopt_preferred_voice(
        &self,
        resolver: &VoiceResolver,
        preferences: &[VoiceCriteria],
    ) -> Result<String> {
        let current = self.settings().voice_id;
        if !current.is_empty() {
            return Ok(current);
        }
        let id = resolver.resolve_preferred(preferences).await?;
        let mut core = self.shared.lock();
        if core.settings.voice_id.is_empty() {
            core.settings.voice_id = id;
        }
        Ok(core.settings.voice_id.clone())
    }

    /// Start narrating `text`, replacing any active session.
    ///
    /// Blank text is rejected without touching the current session. Must be
    /// called from within a tokio runtime.
    pub fn speak(&self, text: &str) -> Result<PlaybackCompletion> {
        let fragments = Arc::new(fragment(text, self.shared.options.max_fragment_len)?);
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let session_id = {
            let mut core = self.shared.lock();
            self.shared.stop_locked(&mut core);
            core.next_session_id += 1;
            let id = core.next_session_id;
            core.session = Some(PlaybackSession {
                id,
                fragments: fragments.clone(),
                cursor: 0,
                cancel: cancel.clone(),
                done: Some(tx),
            });
            core.transition(PlaybackState::Speaking);
            id
        };
        info!(
            "Speaking {} chars in {} fragments (session {session_id})",
            text.chars().count(),
            fragments.len()
        );

        tokio::spawn(drive(self.shared.clone(), session_id, fragments, cancel));
        Ok(PlaybackCompletion { rx })
    }

    pub fn pause(&self) -> Result<()> {
        let mut core = self.shared.lock();
        if core.state != PlaybackState::Speaking {
            return Err(NarrationError::InvalidStateTransition {
                action: "pause",
                state: core.state,
            });
        }
        self.shared.engine.pause();
        core.transition(PlaybackState::Paused);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        let mut core = self.shared.lock();
        if core.state != PlaybackState::Paused {
            return Err(NarrationError::InvalidStateTransition {
                action: "resume",
                state: core.state,
            });
        }
        self.shared.engine.resume();
        core.transition(PlaybackState::Speaking);
        self.shared.resumed.notify_one();
        Ok(())
    }

    /// Valid in every state; never waits on the engine.
    pub fn stop(&self) {
        let mut core = self.shared.lock();
        self.shared.stop_locked(&mut core);
    }
}

async fn drive(
    shared: Arc<Shared>,
    session_id: u64,
    fragments: Arc<Vec<Fragment>>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    loop {
        // Hold between fragments while paused.
        loop {
            match shared.session_state(session_id) {
                None => return,
                Some(PlaybackState::Paused) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = shared.resumed.notified() => {}
                    }
                }
                Some(_) => break,
            }
        }

        let (utterance_id, cursor) = {
            let mut core = shared.lock();
            let Some(cursor) = core.active(session_id).map(|s| s.cursor) else {
                return;
            };
            core.next_utterance_id += 1;
            let settings = &core.settings;
            let utterance = Utterance {
                id: core.next_utterance_id,
                text: shape_for_speech(&fragments[cursor].text),
                voice_id: settings.voice_id.clone(),
                rate: settings.rate,
                pitch: settings.pitch,
                volume: settings.volume,
                language: settings.language.clone(),
            };
            let id = utterance.id;
            // Submitted under the lock so a concurrent stop() cannot slip
            // between the session check and the engine call.
            shared.engine.speak(utterance, tx.clone());
            (id, cursor)
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return,
                event = rx.recv() => event,
            };
            let Some(event) = event else { return };
            if event.utterance_id != utterance_id {
                continue;
            }
            match event.signal {
                UtteranceSignal::Start => {
                    if cursor == 0 {
                        shared.fire_start(session_id);
                    }
                }
                UtteranceSignal::End => break,
                UtteranceSignal::Error(reason) => {
                    shared.fail(session_id, reason);
                    return;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(shared.options.pause) => {}
        }

        if !shared.advance(session_id) {
            return;
        }
    }
}
