//! Chat messages shown in a practice session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Text shown while a message's real content is being fetched
pub const PLACEHOLDER_TEXT: &str = "...";

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    System,
}

impl Sender {
    /// Wire/storage name of the sender
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ai => "ai",
            Self::System => "system",
        }
    }

    /// Parse a stored sender name
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "ai" | "assistant" => Some(Self::Ai),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One highlighted span inside a feedback annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedSpan {
    /// Exact text of the span in the annotated utterance
    pub span: String,
    /// Category label (e.g. "grammar", "vocabulary", "particle")
    pub category: String,
    /// Short explanation for the learner
    pub explanation: String,
}

/// Structured feedback returned by the annotation services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Free-form feedback text
    pub text: String,
    /// Corrected version of the utterance, when the service proposes one
    #[serde(default)]
    pub corrected: Option<String>,
    /// Highlighted spans
    #[serde(default)]
    pub spans: Vec<AnnotatedSpan>,
}

impl Annotation {
    /// Annotation carrying only text
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            corrected: None,
            spans: Vec::new(),
        }
    }

    /// Whether the annotation has nothing to show
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.corrected.is_none() && self.spans.is_empty()
    }
}

/// A message in the session's conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-side identity, stable across placeholder replacement
    pub local_id: Uuid,
    /// Backend record id once persisted
    #[serde(default)]
    pub id: Option<String>,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub romanized_text: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_processing: bool,
    #[serde(default)]
    is_from_original_conversation: bool,
    #[serde(default)]
    pub detailed_feedback: Option<Annotation>,
    #[serde(default)]
    pub short_feedback: Option<Annotation>,
    #[serde(default)]
    pub translation: Option<String>,
    /// Key of the synthesized audio in the TTS cache
    #[serde(default)]
    pub tts_key: Option<String>,
}

impl ChatMessage {
    /// Create a finished message authored in this session
    #[must_use]
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            id: None,
            sender,
            text: text.into(),
            romanized_text: None,
            timestamp: Utc::now(),
            is_processing: false,
            is_from_original_conversation: false,
            detailed_feedback: None,
            short_feedback: None,
            translation: None,
            tts_key: None,
        }
    }

    /// Create a processing placeholder for `sender`
    #[must_use]
    pub fn placeholder(sender: Sender) -> Self {
        Self {
            is_processing: true,
            ..Self::new(sender, PLACEHOLDER_TEXT)
        }
    }

    /// Create a message loaded from a prior conversation
    #[must_use]
    pub fn from_history(
        id: Option<String>,
        sender: Sender,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            timestamp,
            is_from_original_conversation: true,
            ..Self::new(sender, text)
        }
    }

    /// Whether this message belongs to the prior history rather than this session
    #[must_use]
    pub const fn is_from_original_conversation(&self) -> bool {
        self.is_from_original_conversation
    }

    /// Take over the identity of `placeholder` so the replacement lands in its slot
    #[must_use]
    pub(crate) fn replacing(mut self, placeholder: &Self) -> Self {
        self.local_id = placeholder.local_id;
        self.is_from_original_conversation = placeholder.is_from_original_conversation;
        self.is_processing = false;
        self
    }

    /// Builder: attach romanized text
    #[must_use]
    pub fn with_romanized(mut self, romanized: Option<String>) -> Self {
        self.romanized_text = romanized;
        self
    }
}
