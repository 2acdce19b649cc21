use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use parley::config::SpeechProvider;
use parley::db::{self, LocalMessageRepo, ProgressRepo};
use parley::pipeline::MessagePersistence;
use parley::services::openai::{OpenAiSynthesizer, WhisperTranscriber};
use parley::services::{
    AnnotationKind, AnnotationService, ConversationStore, SpeechSynthesizer, Transcriber,
};
use parley::session::{
    Formality, Sender, SessionCommand, SessionDevices, SessionNotice, SessionOptions,
    SessionPreferences, SessionServices, SessionSetup, SessionUpdate, SharedSession,
    open_conversation,
};
use parley::suggestions::{Direction, SuggestionCarousel, SuggestionItem};
use parley::tts::AudioSink;
use parley::voice::{AudioInput, CpalInput, CpalSink, SpeechEndDetector, calculate_energy};
use parley::{
    CachedPreferences, Config, ConversationValidator, GoalCatalog, HttpBackend, PracticeSession,
    ProgressEvaluator, Validation, ValidatorPolicy,
};

/// Parley - spoken-language conversation practice
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Language to practice (e.g. "ja", "es")
    #[arg(short, long, env = "PARLEY_LANGUAGE")]
    language: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a practice session (the default)
    Practice {
        /// Record hands-free: stop on silence, re-arm after each reply
        #[arg(long)]
        autospeak: bool,
        /// Continue a stored conversation
        #[arg(long)]
        resume: Option<String>,
        /// Conversation topic
        #[arg(long, default_value = "free conversation")]
        topic: String,
        /// Optional scenario within the topic
        #[arg(long)]
        scenario: Option<String>,
        /// casual, polite or formal
        #[arg(long, default_value = "polite")]
        formality: Formality,
        /// Learning goal to focus on
        #[arg(long)]
        goal: Option<String>,
    },
    /// Check whether a stored conversation can be resumed
    Validate {
        /// Conversation id
        id: String,
    },
    /// Show learning-goal progress
    Progress,
    /// List the learning-goal catalog
    Goals,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech synthesizer.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(language) = cli.language {
        config.practice.language = language;
    }
    tracing::debug!(?config, "loaded configuration");

    let command = cli.command.unwrap_or(Command::Practice {
        autospeak: config.practice.autospeak,
        resume: None,
        topic: "free conversation".to_string(),
        scenario: None,
        formality: Formality::default(),
        goal: None,
    });

    match command {
        Command::Practice {
            autospeak,
            resume,
            topic,
            scenario,
            formality,
            goal,
        } => {
            let setup = SessionSetup {
                topic,
                scenario,
                formality,
                goal,
            };
            let autospeak = autospeak || config.practice.autospeak;
            practice(config, setup, autospeak, resume.as_deref()).await
        }
        Command::Validate { id } => validate(&config, &id).await,
        Command::Progress => show_progress(&config),
        Command::Goals => list_goals(&config),
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

fn load_catalog(config: &Config) -> anyhow::Result<GoalCatalog> {
    Ok(match &config.goals_path {
        Some(path) => GoalCatalog::load(path)?,
        None => GoalCatalog::bundled()?,
    })
}

const fn validator_policy(config: &Config) -> ValidatorPolicy {
    ValidatorPolicy {
        max_attempts: config.timing.validator_attempts,
        delay: config.timing.validator_delay,
    }
}

/// Speech services for the configured provider
fn speech_services(
    config: &Config,
    backend: &Arc<HttpBackend>,
) -> anyhow::Result<(Arc<dyn Transcriber>, Arc<dyn SpeechSynthesizer>)> {
    Ok(match config.speech.provider {
        SpeechProvider::Backend => (
            Arc::clone(backend) as Arc<dyn Transcriber>,
            Arc::clone(backend) as Arc<dyn SpeechSynthesizer>,
        ),
        SpeechProvider::OpenAi => (
            Arc::new(WhisperTranscriber::new(
                config.speech.openai_api_key.clone(),
                config.speech.stt_model.clone(),
            )?),
            Arc::new(OpenAiSynthesizer::new(
                config.speech.openai_api_key.clone(),
                config.speech.tts_model.clone(),
                config.speech.tts_voice.clone(),
                config.speech.tts_speed,
            )?),
        ),
    })
}

fn backend(config: &Config) -> anyhow::Result<Arc<HttpBackend>> {
    Ok(Arc::new(
        HttpBackend::from_config(&config.backend)?
            .with_voice(Some(config.speech.tts_voice.clone())),
    ))
}

/// Run an interactive practice session on stdin/stdout
#[allow(clippy::future_not_send)]
async fn practice(
    config: Config,
    setup: SessionSetup,
    autospeak: bool,
    resume: Option<&str>,
) -> anyhow::Result<()> {
    setup.validate()?;

    let backend = backend(&config)?;
    let (transcriber, synthesizer) = speech_services(&config, &backend)?;
    let store: Arc<dyn ConversationStore> = Arc::clone(&backend) as Arc<dyn ConversationStore>;
    let annotations: Arc<dyn AnnotationService> = Arc::clone(&backend) as Arc<dyn AnnotationService>;

    let user_id = config.practice.user_id.clone();
    let language = config.practice.language.clone();

    let pool = db::init(config.db_path())?;
    let persistence = MessagePersistence::new(
        Some(Arc::clone(&store)),
        Some(LocalMessageRepo::new(pool.clone())),
        user_id.clone(),
    );

    let preferences_service = CachedPreferences::new(Arc::clone(&backend) as _);
    let mut preferences = preferences_service
        .session_preferences(&user_id, &language)
        .await;
    if preferences.level == SessionPreferences::default().level {
        preferences.level.clone_from(&config.practice.level);
    }
    setup.apply_to(&mut preferences);

    let conversation = open_conversation(
        Some(Arc::clone(&store)),
        &persistence,
        resume,
        &language,
        preferences,
        validator_policy(&config),
    )
    .await;

    let progress = ProgressEvaluator::new(
        Arc::new(load_catalog(&config)?),
        ProgressRepo::new(pool),
        Arc::clone(&annotations),
    );

    let sink: Arc<dyn AudioSink> = match CpalSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            tracing::warn!(error = %e, "no audio output, replies will be text only");
            Arc::new(SilentSink)
        }
    };

    let devices = SessionDevices {
        input: Box::new(CpalInput::new()),
        detector: Some(SpeechEndDetector::default()),
        sink,
    };
    let services = SessionServices {
        transcriber,
        responder: Arc::clone(&backend) as _,
        annotations,
        synthesizer,
        store: Some(store),
    };
    let options = SessionOptions {
        user_id,
        autospeak,
        short_feedback: config.practice.short_feedback,
        suggestion_count: config.practice.suggestion_count,
        timing: config.timing,
    };

    let (mut session, updates) =
        PracticeSession::new(conversation, devices, services, persistence, Some(progress), options);

    print_history(session.session());
    println!("{HELP}");

    let (commands_tx, commands_rx) = mpsc::channel(16);
    let input = tokio::spawn(read_commands(
        commands_tx,
        session.session().clone(),
        session.suggestions().clone(),
    ));
    let output = tokio::spawn(print_updates(updates, session.session().clone()));

    let report = session.run(commands_rx).await?;
    input.abort();
    drop(session);
    let _ = output.await;

    if let Some(id) = &report.conversation_id {
        println!("Conversation id: {id}");
    }
    println!("{} messages this session", report.message_count);
    for level_up in &report.level_ups {
        println!(
            "Level up! {} reached level {}: {}",
            level_up.subgoal_id, level_up.new_level, level_up.new_description
        );
    }
    Ok(())
}

const HELP: &str = "Type to speak in text. Commands:
  /rec /stop /redo          record, send, discard
  /suggest /next /prev      suggestions; /explain, /use the one shown
  /check /breakdown         feedback on your last message, breakdown of the reply
  /translate /replay        translate or replay the last reply
  /quiet                    stop playback
  /autospeak on|off         hands-free mode
  /end                      end the session";

fn last_message(session: &SharedSession, sender: Sender) -> Option<Uuid> {
    session.with(|s| {
        s.messages()
            .iter()
            .rev()
            .find(|m| m.sender == sender && !m.is_processing)
            .map(|m| m.local_id)
    })
}

/// Map a line of input to a command
fn parse_command(
    line: &str,
    session: &SharedSession,
    suggestions: &SuggestionCarousel,
) -> Option<SessionCommand> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return (!line.is_empty()).then(|| SessionCommand::SendText(line.to_string()));
    };

    let (name, arg) = rest.split_once(' ').unwrap_or((rest, ""));
    let command = match name {
        "rec" => SessionCommand::StartRecording,
        "stop" => SessionCommand::StopRecording,
        "redo" => SessionCommand::RedoRecording,
        "suggest" => SessionCommand::FetchSuggestions,
        "next" => SessionCommand::NavigateSuggestions(Direction::Next),
        "prev" => SessionCommand::NavigateSuggestions(Direction::Prev),
        "explain" => SessionCommand::ExplainSuggestion(suggestions.current()?.index),
        "use" => SessionCommand::SelectSuggestion,
        "check" => SessionCommand::Annotate {
            message: last_message(session, Sender::User)?,
            kind: AnnotationKind::DetailedFeedback,
        },
        "breakdown" => SessionCommand::Annotate {
            message: last_message(session, Sender::Ai)?,
            kind: AnnotationKind::DetailedBreakdown,
        },
        "translate" => SessionCommand::Annotate {
            message: last_message(session, Sender::Ai)?,
            kind: AnnotationKind::QuickTranslation,
        },
        "replay" => SessionCommand::Replay(last_message(session, Sender::Ai)?),
        "quiet" => SessionCommand::StopPlayback,
        "autospeak" => SessionCommand::SetAutospeak(arg.trim() != "off"),
        "end" | "quit" => SessionCommand::EndSession,
        _ => {
            println!("{HELP}");
            return None;
        }
    };
    Some(command)
}

async fn read_commands(
    commands: mpsc::Sender<SessionCommand>,
    session: SharedSession,
    suggestions: SuggestionCarousel,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "failed to read input");
                break;
            }
        };
        if let Some(command) = parse_command(&line, &session, &suggestions) {
            if commands.send(command).await.is_err() {
                return;
            }
        }
    }
    let _ = commands.send(SessionCommand::EndSession).await;
}

fn print_history(session: &SharedSession) {
    for message in session.messages() {
        println!("{:>6}: {}", message.sender.as_str(), message.text);
    }
}

fn print_suggestion(item: &SuggestionItem) {
    println!("  [{}/{}] {}", item.index + 1, item.total, item.text);
    if let Some(romanized) = &item.romanized_text {
        println!("        {romanized}");
    }
    if let Some(explanation) = &item.explanation {
        println!("        {explanation}");
    }
    if let Some(translation) = &item.translation {
        println!("        = {translation}");
    }
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>, session: SharedSession) {
    while let Some(update) = updates.recv().await {
        match update {
            SessionUpdate::Recording(status) => {
                println!("[recorder: {:?}, {:?}]", status.state, status.mode);
            }
            SessionUpdate::RecordingRefused => println!("[wait for playback to finish]"),
            SessionUpdate::TurnRefused => println!("[still answering the last turn]"),
            SessionUpdate::Message(parley::pipeline::TurnUpdate::MessageUpdated(id)) => {
                let message = session.with(|s| s.get(id).cloned());
                if let Some(message) = message.filter(|m| !m.is_processing) {
                    println!("{:>6}: {}", message.sender.as_str(), message.text);
                    if let Some(romanized) = &message.romanized_text {
                        println!("        {romanized}");
                    }
                }
            }
            SessionUpdate::Message(_) | SessionUpdate::TurnComplete(_) => {}
            SessionUpdate::Playback(event) => tracing::debug!(?event, "playback"),
            SessionUpdate::Suggestions(items) => items.iter().for_each(print_suggestion),
            SessionUpdate::Suggestion(item) => print_suggestion(&item),
            SessionUpdate::Annotated { annotation, .. } => {
                println!("  > {}", annotation.text);
                if let Some(corrected) = &annotation.corrected {
                    println!("  > {corrected}");
                }
                for span in &annotation.spans {
                    println!("    - {} ({}): {}", span.span, span.category, span.explanation);
                }
            }
            SessionUpdate::Notice(SessionNotice::CapabilityUnavailable(m)) => {
                println!("Recording is not available here: {m}");
            }
            SessionUpdate::Notice(SessionNotice::PermissionDenied(m)) => {
                println!("Microphone access was denied: {m}");
            }
            SessionUpdate::Warning(m) => println!("[{m}]"),
            SessionUpdate::Ended(_) => break,
        }
    }
}

/// Sink used when the host has no output device
struct SilentSink;

#[async_trait::async_trait]
impl AudioSink for SilentSink {
    async fn play(&self, _audio: parley::tts::AudioRef) -> parley::Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Check a conversation id against the backend
async fn validate(config: &Config, id: &str) -> anyhow::Result<()> {
    let validator =
        ConversationValidator::with_policy(backend(config)? as _, validator_policy(config));
    match validator.validate(id).await {
        Validation::Valid(record) => {
            println!(
                "Conversation {} ({}): {} messages",
                record.id,
                record.language,
                record.messages.len()
            );
            Ok(())
        }
        Validation::NotFound => anyhow::bail!("conversation not found: {id}"),
    }
}

/// Print stored progress for every subgoal of the catalog
fn show_progress(config: &Config) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    let repo = ProgressRepo::new(db::init(config.db_path())?);
    let stored = repo.load(&config.practice.user_id, &config.practice.language)?;

    println!(
        "Progress for {} ({})",
        config.practice.user_id, config.practice.language
    );
    for goal in catalog.goals() {
        println!("{}", goal.title);
        for subgoal in &goal.subgoals {
            let (level, percentage) = stored
                .iter()
                .find(|p| p.subgoal_id == subgoal.id)
                .map_or((0, 0), |p| (p.level, p.percentage));
            println!(
                "  {:<32} level {level} {percentage:>3}%  {}",
                subgoal.id,
                subgoal.level_description(level)
            );
        }
    }
    Ok(())
}

fn list_goals(config: &Config) -> anyhow::Result<()> {
    let catalog = load_catalog(config)?;
    for goal in catalog.goals() {
        println!("{}: {}", goal.id, goal.title);
        for subgoal in &goal.subgoals {
            println!("  {}: {}", subgoal.id, subgoal.description);
        }
    }
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut input = CpalInput::new();
    input.open()?;
    println!("Sample rate: {} Hz", input.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = input.drain();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    input.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sink = CpalSink::new()?;

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    sink.play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    Ok(())
}

/// Synthesize and play a phrase
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let backend = backend(config)?;
    let (_, synthesizer) = speech_services(config, &backend)?;

    println!("Synthesizing speech...");
    let audio = synthesizer
        .synthesize(text, &config.practice.language)
        .await?;
    println!("Got {} bytes of audio data", audio.len());

    let sink = CpalSink::new()?;
    sink.play(Arc::from(audio)).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");
    Ok(())
}
