//! Backend collaborators consumed by the orchestration layer
//!
//! Every remote capability sits behind a trait so the pipeline can be driven
//! by the HTTP backend, the `OpenAI` speech endpoints, or test doubles.

pub mod http;
pub mod openai;
mod preferences;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use preferences::CachedPreferences;

use crate::Result;
use crate::session::{Annotation, ChatMessage, Formality, Sender};
use crate::voice::AudioClip;

/// One line of conversation history as sent to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
}

impl From<&ChatMessage> for HistoryEntry {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender: message.sender,
            text: message.text.clone(),
        }
    }
}

/// Request for the AI's next turn
#[derive(Debug, Clone, Serialize)]
pub struct ResponseRequest {
    pub conversation_id: Option<String>,
    pub language: String,
    pub history: Vec<HistoryEntry>,
    pub formality: Formality,
    pub topics: Vec<String>,
    pub learning_goal_ids: Vec<String>,
    pub level: String,
    pub uses_persona: bool,
}

/// The AI's reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(default)]
    pub romanized_text: Option<String>,
}

/// Kind of annotation to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// One-line correction spoken back in autospeak
    ShortFeedback,
    /// Full correction with per-span explanations
    DetailedFeedback,
    /// Word-by-word breakdown of a sentence
    DetailedBreakdown,
    /// Translation into the learner's language
    QuickTranslation,
}

impl AnnotationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortFeedback => "short_feedback",
            Self::DetailedFeedback => "detailed_feedback",
            Self::DetailedBreakdown => "detailed_breakdown",
            Self::QuickTranslation => "quick_translation",
        }
    }
}

/// Annotation request for one message
#[derive(Debug, Clone, Serialize)]
pub struct AnnotationRequest {
    pub kind: AnnotationKind,
    pub text: String,
    pub language: String,
    pub context: Vec<HistoryEntry>,
}

/// Request for suggested next utterances
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionRequest {
    pub language: String,
    pub context: Vec<HistoryEntry>,
    pub count: usize,
    pub formality: Formality,
    pub level: String,
}

/// Candidate utterance from the suggestion service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuggestionCandidate {
    pub text: String,
    #[serde(default)]
    pub romanized_text: Option<String>,
}

/// Lazily fetched explanation of a suggestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SuggestionExplanation {
    pub explanation: String,
    #[serde(default)]
    pub translation: Option<String>,
}

/// Subgoal reference sent with a summary request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubgoalRef {
    pub id: String,
    pub description: String,
}

/// Request to score the session against its subgoals
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub conversation_id: Option<String>,
    pub language: String,
    pub messages: Vec<HistoryEntry>,
    pub subgoals: Vec<SubgoalRef>,
}

/// Per-subgoal percentages, in request order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConversationSummary {
    #[serde(default)]
    pub subgoal_percentages: Vec<u32>,
}

/// Payload for creating a conversation record
#[derive(Debug, Clone, Serialize)]
pub struct NewConversation {
    pub language: String,
    pub formality: Formality,
    pub topics: Vec<String>,
    pub learning_goal_ids: Vec<String>,
    pub uses_persona: bool,
}

/// Message as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub romanized_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Conversation as stored by the backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub language: String,
    #[serde(default)]
    pub formality: Option<Formality>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub learning_goal_ids: Vec<String>,
    #[serde(default)]
    pub uses_persona: bool,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// Message body for create/update calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageDraft {
    pub sender: Sender,
    pub text: String,
    pub romanized_text: Option<String>,
}

impl From<&ChatMessage> for MessageDraft {
    fn from(message: &ChatMessage) -> Self {
        Self {
            sender: message.sender,
            text: message.text.clone(),
            romanized_text: message.romanized_text.clone(),
        }
    }
}

/// Dashboard preferences per (user, language)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DashboardPreferences {
    #[serde(default)]
    pub formality: Option<Formality>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub learning_goal_ids: Vec<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub show_romanization: bool,
}

/// Speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a finished recording
    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<String>;
}

/// AI conversation partner
#[async_trait]
pub trait ResponseService: Send + Sync {
    /// Produce the AI's next turn
    async fn respond(&self, request: &ResponseRequest) -> Result<Reply>;
}

/// Feedback, translation, suggestion and summary calls
#[async_trait]
pub trait AnnotationService: Send + Sync {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation>;

    async fn suggestions(&self, request: &SuggestionRequest) -> Result<Vec<SuggestionCandidate>>;

    async fn explain_suggestion(&self, text: &str, language: &str)
    -> Result<SuggestionExplanation>;

    async fn summarize(&self, request: &SummaryRequest) -> Result<ConversationSummary>;
}

/// Text-to-speech
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` as MP3 bytes
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}

/// Conversation and message records
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation, returning its id
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<String>;

    /// Fetch a conversation; `Error::NotFound` when it does not exist
    async fn get_conversation(&self, id: &str) -> Result<ConversationRecord>;

    /// Store a message, returning its record id
    async fn save_message(&self, conversation_id: &str, message: &MessageDraft) -> Result<String>;

    /// Overwrite a stored message
    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: &MessageDraft,
    ) -> Result<()>;
}

/// Per-user dashboard preferences
#[async_trait]
pub trait PreferencesService: Send + Sync {
    async fn preferences(&self, user_id: &str, language: &str) -> Result<DashboardPreferences>;
}
