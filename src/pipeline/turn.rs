//! One conversational turn, from utterance to spoken reply

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::feedback::{FeedbackClaim, FeedbackGuard};
use super::persist::MessagePersistence;
use crate::services::{
    AnnotationKind, AnnotationRequest, AnnotationService, HistoryEntry, ResponseRequest,
    ResponseService, Transcriber,
};
use crate::session::{Annotation, ChatMessage, Sender, SharedSession};
use crate::tts::{PlaybackCoordinator, cache_key};
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Transcript recorded when nothing intelligible was heard
pub const NO_SPEECH_TRANSCRIPT: &str = "(no speech detected)";

/// Reply shown when the response service fails
pub const FALLBACK_REPLY: &str = "Sorry, I didn't catch that. Could you say it again?";

/// Messages of context sent with annotation requests
pub const ANNOTATION_CONTEXT: usize = 4;

/// Identity of one turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TurnToken(Uuid);

impl TurnToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the learner said
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// A finished recording
    Audio(AudioClip),
    /// Typed text or a selected suggestion
    Text(String),
}

/// Per-turn switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnOptions {
    pub autospeak: bool,
    pub short_feedback: bool,
}

/// Step of a turn that can fail on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStep {
    Transcription,
    ShortFeedback,
    Response,
}

/// A step that failed and was substituted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: TurnStep,
    pub error: String,
}

/// Progressive message updates for the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnUpdate {
    MessageAdded(Uuid),
    MessageUpdated(Uuid),
}

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub token: TurnToken,
    pub user_message: Uuid,
    pub feedback_message: Option<Uuid>,
    pub ai_message: Uuid,
    pub transcript: String,
    pub reply: String,
    pub failures: Vec<StepFailure>,
}

/// Backends a turn talks to
#[derive(Clone)]
pub struct TurnServices {
    pub transcriber: Arc<dyn Transcriber>,
    pub responder: Arc<dyn ResponseService>,
    pub annotations: Arc<dyn AnnotationService>,
}

/// Drives transcription, feedback, response and playback for one turn
pub struct TurnPipeline {
    session: SharedSession,
    services: TurnServices,
    playback: PlaybackCoordinator,
    persistence: MessagePersistence,
    feedback: Mutex<FeedbackGuard>,
    updates: Option<mpsc::UnboundedSender<TurnUpdate>>,
}

impl TurnPipeline {
    /// Create a pipeline over `session`
    #[must_use]
    pub fn new(
        session: SharedSession,
        services: TurnServices,
        playback: PlaybackCoordinator,
        persistence: MessagePersistence,
    ) -> Self {
        Self {
            session,
            services,
            playback,
            persistence,
            feedback: Mutex::new(FeedbackGuard::default()),
            updates: None,
        }
    }

    /// Use a custom feedback de-duplication guard
    #[must_use]
    pub fn with_feedback_guard(mut self, guard: FeedbackGuard) -> Self {
        self.feedback = Mutex::new(guard);
        self
    }

    /// Stream message updates to `updates`
    #[must_use]
    pub fn with_updates(mut self, updates: mpsc::UnboundedSender<TurnUpdate>) -> Self {
        self.updates = Some(updates);
        self
    }

    /// The session this pipeline writes to
    #[must_use]
    pub const fn session(&self) -> &SharedSession {
        &self.session
    }

    /// The persistence layer
    #[must_use]
    pub const fn persistence(&self) -> &MessagePersistence {
        &self.persistence
    }

    fn notify(&self, update: TurnUpdate) {
        if let Some(updates) = &self.updates {
            let _ = updates.send(update);
        }
    }

    fn context(&self) -> Vec<HistoryEntry> {
        self.session.with(|s| {
            s.recent(ANNOTATION_CONTEXT)
                .iter()
                .map(HistoryEntry::from)
                .collect()
        })
    }

    /// Run one turn.
    ///
    /// Every step that fails is substituted and reported in the outcome;
    /// no message is left processing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if another turn still has a placeholder pending
    pub async fn run(&self, input: TurnInput, options: TurnOptions) -> Result<TurnOutcome> {
        let token = TurnToken::new();
        let mut failures = Vec::new();

        // 1. User placeholder
        let user_id = self.session.with(|s| s.insert_placeholder(Sender::User))?;
        self.notify(TurnUpdate::MessageAdded(user_id));
        tracing::debug!(turn = %token, "turn started");

        self.persistence.ensure_conversation(&self.session).await;
        let language = self.session.language();

        // 2. Transcript
        let transcript = match input {
            TurnInput::Audio(clip) => {
                match self.services.transcriber.transcribe(&clip, &language).await {
                    Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                    Ok(_) => NO_SPEECH_TRANSCRIPT.to_string(),
                    Err(e) => {
                        tracing::warn!(turn = %token, error = %e, "transcription failed");
                        failures.push(StepFailure {
                            step: TurnStep::Transcription,
                            error: e.to_string(),
                        });
                        NO_SPEECH_TRANSCRIPT.to_string()
                    }
                }
            }
            TurnInput::Text(text) if !text.trim().is_empty() => text.trim().to_string(),
            TurnInput::Text(_) => NO_SPEECH_TRANSCRIPT.to_string(),
        };
        self.session.with(|s| {
            s.replace(user_id, ChatMessage::new(Sender::User, transcript.clone()))
        });
        self.notify(TurnUpdate::MessageUpdated(user_id));
        self.persistence.persist(&self.session, user_id).await;

        // 3. Short feedback, claimed until the turn ends
        let claim = self.claim_feedback(token, &transcript, options);
        let feedback_message = if claim.is_some() {
            match self.short_feedback(user_id, &transcript, &language).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(turn = %token, error = %e, "short feedback failed");
                    failures.push(StepFailure {
                        step: TurnStep::ShortFeedback,
                        error: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        // 4. AI reply
        let ai_id = self.session.with(|s| s.insert_placeholder(Sender::Ai))?;
        self.notify(TurnUpdate::MessageAdded(ai_id));

        let request = self.response_request();
        let mut reply = match self.services.responder.respond(&request).await {
            Ok(reply) if !reply.text.trim().is_empty() => {
                ChatMessage::new(Sender::Ai, reply.text.trim()).with_romanized(reply.romanized_text)
            }
            Ok(_) => ChatMessage::new(Sender::Ai, FALLBACK_REPLY),
            Err(e) => {
                tracing::warn!(turn = %token, error = %e, "response failed");
                failures.push(StepFailure {
                    step: TurnStep::Response,
                    error: e.to_string(),
                });
                ChatMessage::new(Sender::Ai, FALLBACK_REPLY)
            }
        };
        let reply_text = reply.text.clone();
        let key = cache_key(&reply_text, &language);
        reply.tts_key = Some(key.clone());
        self.session.with(|s| s.replace(ai_id, reply));
        self.notify(TurnUpdate::MessageUpdated(ai_id));

        // 5. Persist and speak
        self.persistence.persist(&self.session, ai_id).await;
        self.playback.enqueue(&reply_text, &language, Some(&key));

        drop(claim);
        tracing::info!(turn = %token, failures = failures.len(), "turn complete");
        Ok(TurnOutcome {
            token,
            user_message: user_id,
            feedback_message,
            ai_message: ai_id,
            transcript,
            reply: reply_text,
            failures,
        })
    }

    fn claim_feedback(
        &self,
        token: TurnToken,
        transcript: &str,
        options: TurnOptions,
    ) -> Option<FeedbackClaim<'_>> {
        if !options.short_feedback || !options.autospeak || transcript == NO_SPEECH_TRANSCRIPT {
            return None;
        }
        FeedbackClaim::acquire(&self.feedback, token, transcript)
    }

    /// Turns currently holding a short-feedback claim
    #[must_use]
    pub fn feedback_claims(&self) -> usize {
        self.feedback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live_claims()
    }

    async fn short_feedback(
        &self,
        user_id: Uuid,
        transcript: &str,
        language: &str,
    ) -> Result<Option<Uuid>> {
        let request = AnnotationRequest {
            kind: AnnotationKind::ShortFeedback,
            text: transcript.to_string(),
            language: language.to_string(),
            context: self.context(),
        };
        let annotation = self.services.annotations.annotate(&request).await?;
        if annotation.is_empty() {
            return Ok(None);
        }

        let spoken = annotation.text.clone();
        self.session.with(|s| {
            s.update(user_id, |m| m.short_feedback = Some(annotation.clone()));
        });
        self.notify(TurnUpdate::MessageUpdated(user_id));

        let mut message = ChatMessage::new(Sender::System, spoken.clone());
        message.short_feedback = Some(annotation);
        message.tts_key = Some(cache_key(&spoken, language));
        let feedback_id = self.session.with(|s| s.push(message));
        self.notify(TurnUpdate::MessageAdded(feedback_id));

        self.playback.enqueue_interim(&spoken, language, None);
        Ok(Some(feedback_id))
    }

    fn response_request(&self) -> ResponseRequest {
        self.session.with(|s| ResponseRequest {
            conversation_id: s.id.clone(),
            language: s.language.clone(),
            history: s
                .messages()
                .iter()
                .filter(|m| !m.is_processing && m.sender != Sender::System)
                .map(HistoryEntry::from)
                .collect(),
            formality: s.formality(),
            topics: s.preferences.topics.clone(),
            learning_goal_ids: s.preferences.learning_goal_ids.clone(),
            level: s.preferences.level.clone(),
            uses_persona: s.uses_persona,
        })
    }

    /// Fetch an on-demand annotation for a displayed message and store it.
    ///
    /// On failure the message is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown message, or the service error
    pub async fn annotate(&self, local_id: Uuid, kind: AnnotationKind) -> Result<Annotation> {
        let (text, language) = self
            .session
            .with(|s| {
                s.get(local_id)
                    .filter(|m| !m.is_processing)
                    .map(|m| (m.text.clone(), s.language.clone()))
            })
            .ok_or_else(|| Error::NotFound(format!("message {local_id}")))?;

        let request = AnnotationRequest {
            kind,
            text,
            language,
            context: self.context(),
        };
        let annotation = self.services.annotations.annotate(&request).await?;

        let stored = annotation.clone();
        self.session.with(|s| {
            s.update(local_id, |m| match kind {
                AnnotationKind::ShortFeedback => m.short_feedback = Some(stored),
                AnnotationKind::DetailedFeedback | AnnotationKind::DetailedBreakdown => {
                    m.detailed_feedback = Some(stored);
                }
                AnnotationKind::QuickTranslation => m.translation = Some(stored.text),
            })
        });
        self.notify(TurnUpdate::MessageUpdated(local_id));
        Ok(annotation)
    }

    /// Play a displayed message again
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown message
    pub fn replay(&self, local_id: Uuid) -> Result<String> {
        let (text, key, language) = self
            .session
            .with(|s| {
                s.get(local_id)
                    .filter(|m| !m.is_processing)
                    .map(|m| (m.text.clone(), m.tts_key.clone(), s.language.clone()))
            })
            .ok_or_else(|| Error::NotFound(format!("message {local_id}")))?;
        Ok(self.playback.enqueue(&text, &language, key.as_deref()))
    }
}
