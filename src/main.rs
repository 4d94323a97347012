//! story-narrator: narrate stories with local or remote speech synthesis.

use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use story_narrator::api::{self, NarratorApiState};
use story_narrator::config::Config;
use story_narrator::history::{NarrationHistory, NarrationPath, NarrationRecord};
use story_narrator::narration::engine::EspeakEngine;
use story_narrator::narration::fragmenter::fragment;
use story_narrator::narration::player::{PlaybackOutcome, UtterancePlayer};
use story_narrator::narration::provider::RemoteSpeechClient;
use story_narrator::narration::remote::RemoteSequencer;
use story_narrator::narration::settings::SettingsStore;
use story_narrator::narration::voice::{VoiceCatalog, VoiceResolver};
use story_narrator::narrative::{
    extract_title, NarrativeSource, OllamaNarrator, StoryCategory, DEFAULT_LISTENER,
    FALLBACK_STORY, FALLBACK_TITLE,
};

#[derive(Parser, Debug)]
#[command(name = "story-narrator", about = "Fragmented story narration")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API until interrupted
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Narrate text through the local engine
    Speak(TextInput),
    /// Generate remote audio for text and print one reference per fragment
    GenerateVoice(TextInput),
    /// Print the fragments text would be split into
    Fragment {
        #[command(flatten)]
        input: TextInput,
        /// Maximum fragment length in characters [default: local.max_fragment_chars]
        #[arg(short, long)]
        max: Option<usize>,
    },
    /// List voices from the local engine or the remote provider
    Voices {
        #[arg(long)]
        remote: bool,
    },
    /// Generate a story, optionally narrating it
    Story {
        /// Prompt to send as is; built from --category when omitted
        prompt: Option<String>,
        /// raja-rani, pariyon, jungle, janwar, mystery, moral, festival, bedtime or custom
        #[arg(long, default_value = "moral")]
        category: StoryCategory,
        /// Listener's name, woven into the story
        #[arg(long, default_value = DEFAULT_LISTENER)]
        name: String,
        /// Themes for the custom category
        #[arg(long, default_value = "")]
        themes: String,
        /// Narrate the story after generating it
        #[arg(long)]
        speak: bool,
    },
    /// Print the narration report for a date
    Report {
        /// YYYY-MM-DD or "today"
        #[arg(default_value = "today")]
        date: String,
        /// List dates that have history instead
        #[arg(long)]
        list: bool,
    },
}

#[derive(clap::Args, Debug)]
struct TextInput {
    /// Text to use; read from --file or stdin when omitted
    text: Option<String>,
    #[arg(short, long)]
    file: Option<PathBuf>,
}

impl TextInput {
    fn read(&self) -> std::io::Result<String> {
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }
        if let Some(path) = &self.file {
            return std::fs::read_to_string(path);
        }
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    }
}

fn history_for(config: &Config) -> Option<Arc<NarrationHistory>> {
    config
        .history
        .enabled
        .then(|| Arc::new(NarrationHistory::new(config.history_dir())))
}

/// Remote sequencer, or `None` when no provider key is available.
fn build_sequencer(config: &Config) -> Result<Option<Arc<RemoteSequencer>>, Box<dyn std::error::Error>> {
    if config.remote.resolved_api_key().is_empty() {
        info!(
            "No remote speech key (set {} or remote.api_key), remote voice disabled",
            config.remote.api_key_env
        );
        return Ok(None);
    }
    let client = Arc::new(RemoteSpeechClient::new(&config.remote)?);
    let resolver = Arc::new(VoiceResolver::new(
        client.clone(),
        config.remote.voice.fallback.clone(),
    ));
    Ok(Some(Arc::new(RemoteSequencer::new(
        client,
        resolver,
        config.remote.options(),
    ))))
}

/// Local player with persisted settings and the preferred voice adopted.
async fn build_player(config: &Config, store: &SettingsStore) -> UtterancePlayer {
    let engine = Arc::new(EspeakEngine::new(&config.local.espeak_binary));
    let settings = store.load().unwrap_or_else(|| config.local.settings.clone());
    let resolver = VoiceResolver::new(
        Arc::new(engine.catalog()),
        config.local.voice.fallback.clone(),
    );
    let player = UtterancePlayer::new(engine, config.local.player_options(), settings);

    match player
        .adopt_preferred_voice(&resolver, &config.local.voice.chain())
        .await
    {
        Ok(voice) => info!("Local voice: {voice}"),
        Err(e) => warn!("No preferred local voice ({e}), using engine default"),
    }
    player
}

async fn narrate_locally(
    player: &UtterancePlayer,
    text: &str,
    title: String,
    history: Option<Arc<NarrationHistory>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let t_start = std::time::Instant::now();
    let completion = player.speak(text)?;
    let mut record = NarrationRecord::now(NarrationPath::Local, title, text);
    record.fragments = player.progress().map(|(_, total)| total).unwrap_or(0);
    record.voice = player.settings().voice_id;

    let stopper = player.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping narration");
            stopper.stop();
        }
    });

    let result = completion.wait().await;
    interrupt.abort();
    record.duration_ms = t_start.elapsed().as_millis() as i64;
    record.outcome = match &result {
        Ok(PlaybackOutcome::Completed { .. }) => "completed",
        Ok(PlaybackOutcome::Stopped { .. }) => "stopped",
        Err(_) => "failed",
    }
    .into();
    if let Some(history) = history {
        history.save_record(&record);
    }

    let outcome = result?;
    info!("Narration finished: {outcome:?}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());
    let history = history_for(&config);

    match args.command {
        Command::Serve { port } => {
            let store = Arc::new(SettingsStore::new(config.settings_path()));
            let player = build_player(&config, &store).await;
            let state = NarratorApiState {
                player: player.clone(),
                sequencer: build_sequencer(&config)?,
                narrator: Arc::new(OllamaNarrator::new(&config.narrative)?),
                settings_store: store,
                history,
            };

            if !config.api.enabled && port.is_none() {
                warn!("API disabled in config; pass --port to serve anyway");
                return Ok(());
            }
            api::start_api(state, port.unwrap_or(config.api.port)).await;
            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            player.stop();
        }

        Command::Speak(input) => {
            let text = input.read()?;
            let store = SettingsStore::new(config.settings_path());
            let player = build_player(&config, &store).await;
            narrate_locally(&player, &text, extract_title(&text, FALLBACK_TITLE), history).await?;
        }

        Command::GenerateVoice(input) => {
            let text = input.read()?;
            let Some(sequencer) = build_sequencer(&config)? else {
                return Err("remote speech provider key missing".into());
            };

            let t_start = std::time::Instant::now();
            let mut record =
                NarrationRecord::now(NarrationPath::Remote, extract_title(&text, FALLBACK_TITLE), &text);
            let result = sequencer.generate_audio(&text).await;
            record.duration_ms = t_start.elapsed().as_millis() as i64;

            match result {
                Ok(assets) => {
                    record.fragments = assets.len();
                    record.outcome = "completed".into();
                    for asset in &assets {
                        println!("{}", asset.audio_ref);
                    }
                    if let Some(history) = &history {
                        history.save_record(&record);
                    }
                }
                Err(e) => {
                    for asset in e.partial_audio() {
                        println!("{}", asset.audio_ref);
                    }
                    record.fragments = e.partial_audio().len();
                    record.outcome = "fallback".into();
                    if let Some(history) = &history {
                        history.save_record(&record);
                    }
                    return Err(e.into());
                }
            }
        }

        Command::Fragment { input, max } => {
            let text = input.read()?;
            let max = max.unwrap_or(config.local.max_fragment_chars);
            for f in fragment(&text, max)? {
                println!("[{}] ({} chars) {}", f.index, f.text.chars().count(), f.text);
            }
        }

        Command::Voices { remote } => {
            let voices = if remote {
                RemoteSpeechClient::new(&config.remote)?.list_voices().await?
            } else {
                EspeakEngine::new(&config.local.espeak_binary)
                    .catalog()
                    .list_voices()
                    .await?
            };
            for v in voices {
                println!("{:<24} {:<10} {:?}", v.id, v.language, v.gender);
            }
        }

        Command::Story {
            prompt,
            category,
            name,
            themes,
            speak,
        } => {
            let narrator = OllamaNarrator::new(&config.narrative)?;
            let prompt = prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| category.prompt_for(&name, &themes));
            let (text, title) = match narrator.generate(&prompt, None).await {
                Ok(text) => {
                    let title = extract_title(&text, &category.default_title(&name));
                    (text, title)
                }
                Err(e) => {
                    warn!("Story generation failed: {e}");
                    (FALLBACK_STORY.to_string(), FALLBACK_TITLE.to_string())
                }
            };
            println!("# {title}\n\n{text}");

            if speak {
                let store = SettingsStore::new(config.settings_path());
                let player = build_player(&config, &store).await;
                narrate_locally(&player, &text, title, history).await?;
            }
        }

        Command::Report { date, list } => {
            let history = NarrationHistory::new(config.history_dir());
            if list {
                for d in history.list_dates() {
                    println!("{d}");
                }
            } else {
                println!("{}", history.generate_report(&date));
            }
        }
    }

    Ok(())
}
