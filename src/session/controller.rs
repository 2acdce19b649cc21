//! Practice session event loop
//!
//! One loop owns the recorder and reacts to learner commands, internal
//! events and a capture poll tick. Turns, suggestion and annotation requests,
//! synthesis and playback run on their own tasks and report back over the
//! internal event queue, so the loop stays responsive while they are in
//! flight. Ending the session cancels whatever is still running.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::conversation::{ConversationSession, SharedSession};
use super::message::Annotation;
use crate::config::TimingConfig;
use crate::conversation::{ConversationValidator, Validation, ValidatorPolicy, resume_session};
use crate::pipeline::{
    FeedbackGuard, MessagePersistence, TurnInput, TurnOptions, TurnOutcome, TurnPipeline,
    TurnServices, TurnUpdate,
};
use crate::progress::{LevelUpEvent, ProgressEvaluator};
use crate::services::{
    AnnotationKind, AnnotationService, ConversationStore, HistoryEntry, ResponseService,
    SpeechSynthesizer, SuggestionRequest, Transcriber,
};
use crate::session::SessionPreferences;
use crate::suggestions::{Direction, SuggestionCarousel, SuggestionItem};
use crate::tts::{AudioSink, PlaybackCoordinator, PlaybackEvent, PlaybackStatus, TtsCache};
use crate::voice::{
    AudioInput, CaptureMode, CaptureSession, RecordingStatus, SpeechEndDetector, StartOutcome,
};
use crate::{Error, Result};

/// What the learner asks the session to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    StartRecording,
    StopRecording,
    /// Throw the current recording away
    RedoRecording,
    SendText(String),
    /// Send the suggestion in view as the learner's utterance
    SelectSuggestion,
    FetchSuggestions,
    NavigateSuggestions(Direction),
    ExplainSuggestion(usize),
    Annotate { message: Uuid, kind: AnnotationKind },
    Replay(Uuid),
    StopPlayback,
    SetAutospeak(bool),
    EndSession,
}

/// Internal events feeding the loop
#[derive(Debug)]
pub enum SessionEvent {
    Playback(PlaybackEvent),
    TurnFinished(Result<TurnOutcome>),
    SuggestionsFetched(Result<bool>),
    SuggestionExplained(Result<Option<SuggestionItem>>),
    Annotated {
        message: Uuid,
        result: Result<Annotation>,
    },
}

/// Failures the learner must act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// The device or host cannot record (or detect speech end)
    CapabilityUnavailable(String),
    /// Microphone access was denied
    PermissionDenied(String),
}

impl SessionNotice {
    /// Notice for errors that surface to the learner
    #[must_use]
    pub fn from_error(error: &Error) -> Option<Self> {
        match error {
            Error::Capability(m) => Some(Self::CapabilityUnavailable(m.clone())),
            Error::Permission(m) => Some(Self::PermissionDenied(m.clone())),
            _ => None,
        }
    }
}

/// Summary produced by "end session"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub conversation_id: Option<String>,
    /// Messages created during this session
    pub message_count: usize,
    /// Time since the session's first message
    pub duration: Option<Duration>,
    pub level_ups: Vec<LevelUpEvent>,
}

/// Updates streamed to the UI
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    Recording(RecordingStatus),
    /// A start was ignored because audio is playing
    RecordingRefused,
    /// Input arrived while the previous turn was still running
    TurnRefused,
    Message(TurnUpdate),
    TurnComplete(TurnOutcome),
    Playback(PlaybackEvent),
    Suggestions(Vec<SuggestionItem>),
    Suggestion(SuggestionItem),
    Annotated {
        message: Uuid,
        annotation: Annotation,
    },
    Notice(SessionNotice),
    /// A non-fatal failure outside a turn
    Warning(String),
    Ended(SessionReport),
}

/// Backends used by a session
#[derive(Clone)]
pub struct SessionServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn ResponseService>,
    pub annotations: Arc<dyn AnnotationService>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub store: Option<Arc<dyn ConversationStore>>,
}

/// Audio hardware used by a session
pub struct SessionDevices {
    pub input: Box<dyn AudioInput>,
    /// `None` where speech-end detection is unavailable
    pub detector: Option<SpeechEndDetector>,
    pub sink: Arc<dyn AudioSink>,
}

/// Per-session switches
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_id: String,
    pub autospeak: bool,
    pub short_feedback: bool,
    pub suggestion_count: usize,
    pub timing: TimingConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_id: "local".to_string(),
            autospeak: false,
            short_feedback: true,
            suggestion_count: 3,
            timing: TimingConfig::default(),
        }
    }
}

/// Open the conversation to practice in.
///
/// A resume id is validated first; an unknown id falls back to a fresh
/// session. Without a resume id, messages kept locally from an earlier
/// unassociated session are restored.
pub async fn open_conversation(
    store: Option<Arc<dyn ConversationStore>>,
    persistence: &MessagePersistence,
    resume: Option<&str>,
    language: &str,
    preferences: SessionPreferences,
    policy: ValidatorPolicy,
) -> ConversationSession {
    if let (Some(id), Some(store)) = (resume, store) {
        let validator = ConversationValidator::with_policy(store, policy);
        match validator.validate(id).await {
            Validation::Valid(record) => {
                tracing::info!(conversation_id = %record.id, "resuming conversation");
                return resume_session(record, preferences);
            }
            Validation::NotFound => {
                tracing::warn!(conversation_id = %id, "conversation not found, starting fresh");
                return ConversationSession::new(language, preferences);
            }
        }
    }

    let history = persistence.restore_local(language);
    if history.is_empty() {
        ConversationSession::new(language, preferences)
    } else {
        tracing::info!(messages = history.len(), "restored local messages");
        ConversationSession::restored(language, preferences, history)
    }
}

/// A running practice session
pub struct PracticeSession {
    session: SharedSession,
    capture: CaptureSession,
    pipeline: Arc<TurnPipeline>,
    playback: PlaybackCoordinator,
    carousel: SuggestionCarousel,
    progress: Option<ProgressEvaluator>,
    options: SessionOptions,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    /// The turn in flight, at most one
    turn: Option<JoinHandle<()>>,
    /// Suggestion and annotation requests in flight
    requests: JoinSet<()>,
    background: Vec<JoinHandle<()>>,
}

impl PracticeSession {
    /// Wire a session together.
    ///
    /// Must be called inside a tokio runtime. Returns the session and the
    /// stream of UI updates.
    #[must_use]
    pub fn new(
        conversation: ConversationSession,
        devices: SessionDevices,
        services: SessionServices,
        persistence: MessagePersistence,
        progress: Option<ProgressEvaluator>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timing = options.timing;

        let session = SharedSession::new(conversation);
        let status = PlaybackStatus::default();
        let cache = TtsCache::new(timing.tts_ttl);
        let sweeper = cache.spawn_sweeper(timing.tts_sweep);

        // Playback events are re-queued for the loop
        let (playback_tx, mut playback_rx) = mpsc::unbounded_channel();
        let playback_events = events_tx.clone();
        let forward_playback = tokio::spawn(async move {
            while let Some(event) = playback_rx.recv().await {
                if playback_events.send(SessionEvent::Playback(event)).is_err() {
                    break;
                }
            }
        });

        let playback = PlaybackCoordinator::with_rearm_delay(
            Arc::clone(&services.synthesizer),
            devices.sink,
            cache,
            status.clone(),
            Some(playback_tx),
            timing.rearm_delay,
        );
        playback.set_autospeak(options.autospeak);

        // Turn updates go straight to the UI as the turn task produces them
        let (turn_tx, mut turn_rx) = mpsc::unbounded_channel();
        let ui = updates_tx.clone();
        let forward_turns = tokio::spawn(async move {
            while let Some(update) = turn_rx.recv().await {
                if ui.send(SessionUpdate::Message(update)).is_err() {
                    break;
                }
            }
        });

        let pipeline = Arc::new(
            TurnPipeline::new(
            session.clone(),
            TurnServices {
                transcriber: services.transcriber,
                responder: services.responder,
                annotations: Arc::clone(&services.annotations),
            },
            playback.clone(),
            persistence,
        )
            .with_feedback_guard(FeedbackGuard::new(timing.feedback_window))
            .with_updates(turn_tx),
        );

        let capture = CaptureSession::new(devices.input, devices.detector, status)
            .with_ceiling(timing.autospeak_ceiling);

        let this = Self {
            session,
            capture,
            pipeline,
            playback,
            carousel: SuggestionCarousel::new(services.annotations),
            progress,
            options,
            events_tx,
            events: events_rx,
            updates: updates_tx,
            turn: None,
            requests: JoinSet::new(),
            background: vec![sweeper, forward_playback, forward_turns],
        };
        (this, updates_rx)
    }

    /// The conversation being practiced
    #[must_use]
    pub const fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Playback status flags
    #[must_use]
    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback.status()
    }

    /// Recorder status
    #[must_use]
    pub fn recording_status(&self) -> RecordingStatus {
        self.capture.status()
    }

    /// The suggestion carousel
    #[must_use]
    pub const fn suggestions(&self) -> &SuggestionCarousel {
        &self.carousel
    }

    fn emit(&self, update: SessionUpdate) {
        // The UI may have gone away; the session keeps running
        let _ = self.updates.send(update);
    }

    const fn capture_mode(&self) -> CaptureMode {
        if self.options.autospeak {
            CaptureMode::Autospeak
        } else {
            CaptureMode::Manual
        }
    }

    /// Drive the session until `EndSession` or until `commands` closes
    ///
    /// # Errors
    ///
    /// Currently infallible; reserved for fatal loop failures
    #[allow(clippy::future_not_send)]
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) -> Result<SessionReport> {
        if self.options.autospeak {
            self.start_recording();
        }

        let mut tick = tokio::time::interval(self.options.timing.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::EndSession) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "session request task failed");
                    }
                }
                _ = tick.tick() => self.poll_capture(),
            }
        }

        Ok(self.end_session().await)
    }

    fn handle_command(&mut self, command: SessionCommand) {
        tracing::debug!(?command, "session command");
        match command {
            SessionCommand::StartRecording => self.start_recording(),
            SessionCommand::StopRecording => {
                if let Some(clip) = self.capture.stop(false) {
                    self.emit(SessionUpdate::Recording(self.capture.status()));
                    if clip.is_empty() {
                        tracing::debug!("empty recording ignored");
                    } else {
                        self.start_turn(TurnInput::Audio(clip));
                    }
                }
            }
            SessionCommand::RedoRecording => {
                self.capture.stop(true);
                self.emit(SessionUpdate::Recording(self.capture.status()));
            }
            SessionCommand::SendText(text) => {
                if !text.trim().is_empty() {
                    self.start_turn(TurnInput::Text(text));
                }
            }
            SessionCommand::SelectSuggestion => {
                if let Some(item) = self.carousel.current() {
                    self.start_turn(TurnInput::Text(item.text));
                }
            }
            SessionCommand::FetchSuggestions => self.fetch_suggestions(),
            SessionCommand::NavigateSuggestions(direction) => {
                if let Some(item) = self.carousel.navigate(direction) {
                    self.emit(SessionUpdate::Suggestion(item));
                }
            }
            SessionCommand::ExplainSuggestion(index) => {
                let carousel = self.carousel.clone();
                self.spawn_request(async move {
                    SessionEvent::SuggestionExplained(carousel.explain(index).await)
                });
            }
            SessionCommand::Annotate { message, kind } => {
                let pipeline = Arc::clone(&self.pipeline);
                self.spawn_request(async move {
                    let result = pipeline.annotate(message, kind).await;
                    SessionEvent::Annotated { message, result }
                });
            }
            SessionCommand::Replay(message) => {
                if let Err(e) = self.pipeline.replay(message) {
                    self.emit(SessionUpdate::Warning(e.to_string()));
                }
            }
            SessionCommand::StopPlayback => self.playback.stop(),
            SessionCommand::SetAutospeak(enabled) => {
                self.options.autospeak = enabled;
                self.playback.set_autospeak(enabled);
                tracing::info!(enabled, "autospeak toggled");
                if enabled && !self.capture.is_recording() {
                    self.start_recording();
                }
            }
            // Handled by the loop
            SessionCommand::EndSession => {}
        }
    }

    fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Playback(PlaybackEvent::RearmCapture) => {
                if self.options.autospeak && !self.capture.is_recording() {
                    tracing::debug!("re-arming recorder after playback");
                    self.start_recording();
                }
            }
            SessionEvent::Playback(event) => self.emit(SessionUpdate::Playback(event)),
            SessionEvent::TurnFinished(Ok(outcome)) => {
                self.emit(SessionUpdate::TurnComplete(outcome));
            }
            SessionEvent::TurnFinished(Err(e)) => {
                tracing::warn!(error = %e, "turn rejected");
                self.emit(SessionUpdate::Warning(e.to_string()));
            }
            SessionEvent::SuggestionsFetched(Ok(true)) => {
                self.emit(SessionUpdate::Suggestions(self.carousel.items()));
            }
            SessionEvent::SuggestionsFetched(Ok(false))
            | SessionEvent::SuggestionExplained(Ok(None)) => {}
            SessionEvent::SuggestionsFetched(Err(e)) => {
                tracing::warn!(error = %e, "suggestions unavailable");
                self.emit(SessionUpdate::Warning(e.to_string()));
            }
            SessionEvent::SuggestionExplained(Ok(Some(item))) => {
                self.emit(SessionUpdate::Suggestion(item));
            }
            SessionEvent::Annotated {
                message,
                result: Ok(annotation),
            } => self.emit(SessionUpdate::Annotated {
                message,
                annotation,
            }),
            SessionEvent::SuggestionExplained(Err(e))
            | SessionEvent::Annotated { result: Err(e), .. } => {
                self.emit(SessionUpdate::Warning(e.to_string()));
            }
        }
    }

    fn start_recording(&mut self) {
        match self.capture.start(self.capture_mode()) {
            Ok(StartOutcome::Started) => {
                self.emit(SessionUpdate::Recording(self.capture.status()));
            }
            Ok(StartOutcome::PlaybackActive) => self.emit(SessionUpdate::RecordingRefused),
            Ok(StartOutcome::AlreadyRecording) => {}
            Err(e) => {
                if let Some(notice) = SessionNotice::from_error(&e) {
                    tracing::error!(error = %e, "recording unavailable");
                    self.emit(SessionUpdate::Notice(notice));
                } else {
                    tracing::warn!(error = %e, "recording failed to start");
                    self.emit(SessionUpdate::Warning(e.to_string()));
                }
            }
        }
    }

    fn poll_capture(&mut self) {
        let Some(reason) = self.capture.poll() else {
            return;
        };
        tracing::debug!(?reason, "recording stop requested");
        if let Some(clip) = self.capture.stop(false) {
            self.emit(SessionUpdate::Recording(self.capture.status()));
            self.start_turn(TurnInput::Audio(clip));
        }
    }

    fn turn_in_flight(&self) -> bool {
        self.turn.as_ref().is_some_and(|turn| !turn.is_finished())
    }

    /// Run a turn on its own task; refused while another turn is running
    fn start_turn(&mut self, input: TurnInput) {
        if self.turn_in_flight() {
            tracing::debug!("turn already in flight, input refused");
            self.emit(SessionUpdate::TurnRefused);
            return;
        }

        // Suggestions describe the previous turn
        self.carousel.clear();

        let options = TurnOptions {
            autospeak: self.options.autospeak,
            short_feedback: self.options.short_feedback,
        };
        let pipeline = Arc::clone(&self.pipeline);
        let events = self.events_tx.clone();
        self.turn = Some(tokio::spawn(async move {
            let result = pipeline.run(input, options).await;
            let _ = events.send(SessionEvent::TurnFinished(result));
        }));
    }

    /// Run a request on its own task, reporting back through the event queue
    fn spawn_request<F>(&mut self, request: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        let events = self.events_tx.clone();
        self.requests.spawn(async move {
            let _ = events.send(request.await);
        });
    }

    fn fetch_suggestions(&mut self) {
        let request = self.session.with(|s| SuggestionRequest {
            language: s.language.clone(),
            context: s.recent(crate::pipeline::ANNOTATION_CONTEXT)
                .iter()
                .map(HistoryEntry::from)
                .collect(),
            count: self.options.suggestion_count,
            formality: s.formality(),
            level: s.preferences.level.clone(),
        });

        let carousel = self.carousel.clone();
        self.spawn_request(async move {
            SessionEvent::SuggestionsFetched(carousel.fetch(&request).await)
        });
    }

    /// Stop everything, evaluate progress and report
    #[allow(clippy::future_not_send)]
    async fn end_session(&mut self) -> SessionReport {
        self.capture.stop(true);

        // Work still in flight is cancelled; its results are never applied
        if let Some(turn) = self.turn.take() {
            turn.abort();
            let _ = turn.await;
        }
        self.requests.shutdown().await;
        let discarded = self.session.with(ConversationSession::discard_placeholders);
        if discarded > 0 {
            tracing::info!(discarded, "cancelled turn left unanswered");
        }

        self.playback.stop();
        self.carousel.clear();

        let snapshot = self.session.snapshot();
        let level_ups = match &self.progress {
            Some(progress) => progress
                .evaluate_session(&self.options.user_id, &snapshot)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "progress evaluation failed");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        let report = SessionReport {
            conversation_id: snapshot.id.clone(),
            message_count: snapshot.session_messages().count(),
            duration: snapshot
                .session_start_time()
                .and_then(|start| (Utc::now() - start).to_std().ok()),
            level_ups,
        };
        tracing::info!(
            messages = report.message_count,
            level_ups = report.level_ups.len(),
            "session ended"
        );
        self.emit(SessionUpdate::Ended(report.clone()));
        report
    }
}

impl Drop for PracticeSession {
    fn drop(&mut self) {
        if let Some(turn) = &self.turn {
            turn.abort();
        }
        self.playback.stop();
        for task in &self.background {
            task.abort();
        }
    }
}
