//! Conversation session state and learner preferences

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{ChatMessage, Sender};
use crate::{Error, Result};

/// Register the AI partner speaks in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Formality {
    Casual,
    #[default]
    Polite,
    Formal,
}

impl Formality {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Casual => "casual",
            Self::Polite => "polite",
            Self::Formal => "formal",
        }
    }
}

impl std::str::FromStr for Formality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "casual" => Ok(Self::Casual),
            "polite" => Ok(Self::Polite),
            "formal" => Ok(Self::Formal),
            other => Err(Error::InvalidInput(format!("unknown formality: {other}"))),
        }
    }
}

/// Choices made in the session selection wizard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub topic: String,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub formality: Formality,
    #[serde(default)]
    pub goal: Option<String>,
}

impl SessionSetup {
    /// Check the selection is complete enough to start a session
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if no topic was chosen
    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(Error::InvalidInput("a topic is required".to_string()));
        }
        if self.scenario.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::InvalidInput("scenario must not be blank".to_string()));
        }
        Ok(())
    }

    /// Topics forwarded to the response service; the scenario rides along as a hint
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![self.topic.trim().to_string()];
        if let Some(scenario) = &self.scenario {
            topics.push(format!("scenario: {}", scenario.trim()));
        }
        topics
    }

    /// Overlay the wizard's choices onto dashboard-derived preferences
    pub fn apply_to(&self, preferences: &mut SessionPreferences) {
        preferences.formality = self.formality;
        preferences.topics = self.topics();
        if let Some(goal) = self.goal.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            if !preferences.learning_goal_ids.iter().any(|g| g == goal) {
                preferences.learning_goal_ids.insert(0, goal.to_string());
            }
        }
    }
}

/// Preferences sent along with every AI response request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPreferences {
    pub formality: Formality,
    pub topics: Vec<String>,
    pub learning_goal_ids: Vec<String>,
    /// Proficiency level label (e.g. "beginner", "N4")
    pub level: String,
    pub show_romanization: bool,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            formality: Formality::default(),
            topics: Vec::new(),
            learning_goal_ids: Vec::new(),
            level: "beginner".to_string(),
            show_romanization: false,
        }
    }
}

/// The live conversation of one practice session
#[derive(Debug, Clone)]
pub struct ConversationSession {
    /// Backend conversation id; `None` for unauthenticated sessions
    pub id: Option<String>,
    pub language: String,
    pub preferences: SessionPreferences,
    pub uses_persona: bool,
    messages: Vec<ChatMessage>,
    session_start_time: Option<DateTime<Utc>>,
}

impl ConversationSession {
    /// Start a fresh session
    #[must_use]
    pub fn new(language: impl Into<String>, preferences: SessionPreferences) -> Self {
        Self {
            id: None,
            language: language.into(),
            preferences,
            uses_persona: false,
            messages: Vec::new(),
            session_start_time: Some(Utc::now()),
        }
    }

    /// Resume a conversation; `history` is marked as prior conversation
    #[must_use]
    pub fn resumed(
        id: impl Into<String>,
        language: impl Into<String>,
        preferences: SessionPreferences,
        history: Vec<ChatMessage>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            language: language.into(),
            preferences,
            uses_persona: false,
            messages: history,
            session_start_time: None,
        }
    }

    /// Restore an unassociated session from the local fallback copy
    #[must_use]
    pub fn restored(
        language: impl Into<String>,
        preferences: SessionPreferences,
        history: Vec<ChatMessage>,
    ) -> Self {
        Self {
            id: None,
            language: language.into(),
            preferences,
            uses_persona: false,
            messages: history,
            session_start_time: None,
        }
    }

    /// Formality shortcut
    #[must_use]
    pub const fn formality(&self) -> Formality {
        self.preferences.formality
    }

    /// All messages in display order
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages created during this session
    pub fn session_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| !m.is_from_original_conversation())
    }

    /// The last `n` finished messages
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let finished: Vec<&ChatMessage> =
            self.messages.iter().filter(|m| !m.is_processing).collect();
        finished[finished.len().saturating_sub(n)..]
            .iter()
            .map(|m| (*m).clone())
            .collect()
    }

    /// When this session started producing messages
    #[must_use]
    pub const fn session_start_time(&self) -> Option<DateTime<Utc>> {
        self.session_start_time
    }

    /// Look up a message by local id
    #[must_use]
    pub fn get(&self, local_id: Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.local_id == local_id)
    }

    /// Number of messages still marked processing for `sender`
    #[must_use]
    pub fn processing_count(&self, sender: Sender) -> usize {
        self.messages
            .iter()
            .filter(|m| m.sender == sender && m.is_processing)
            .count()
    }

    /// Append a message
    pub fn push(&mut self, message: ChatMessage) -> Uuid {
        if self.session_start_time.is_none() && !message.is_from_original_conversation() {
            self.session_start_time = Some(message.timestamp);
        }
        let id = message.local_id;
        self.messages.push(message);
        id
    }

    /// Append a processing placeholder for `sender`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `sender` already has a pending placeholder
    pub fn insert_placeholder(&mut self, sender: Sender) -> Result<Uuid> {
        if self.processing_count(sender) > 0 {
            return Err(Error::InvalidInput(format!(
                "{} placeholder already pending",
                sender.as_str()
            )));
        }
        Ok(self.push(ChatMessage::placeholder(sender)))
    }

    /// Replace the message owning `local_id`, keeping its slot and identity.
    ///
    /// Returns `false` if the message is gone (e.g. the session was cleared).
    pub fn replace(&mut self, local_id: Uuid, message: ChatMessage) -> bool {
        match self.messages.iter_mut().find(|m| m.local_id == local_id) {
            Some(slot) => {
                let replacement = message.replacing(slot);
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Mutate the message owning `local_id` in place
    pub fn update(&mut self, local_id: Uuid, f: impl FnOnce(&mut ChatMessage)) -> bool {
        match self.messages.iter_mut().find(|m| m.local_id == local_id) {
            Some(slot) => {
                f(slot);
                true
            }
            None => false,
        }
    }

    /// Remove placeholders a cancelled turn left behind.
    ///
    /// Returns how many were removed.
    pub fn discard_placeholders(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_processing);
        before - self.messages.len()
    }

    /// Drop every message
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Session shared between the event loop and in-flight tasks.
///
/// The lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<ConversationSession>>,
}

impl SharedSession {
    /// Wrap a session for sharing
    #[must_use]
    pub fn new(session: ConversationSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationSession> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut ConversationSession) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone the current state
    #[must_use]
    pub fn snapshot(&self) -> ConversationSession {
        self.lock().clone()
    }

    /// Clone the message list
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages().to_vec()
    }

    /// Current language
    #[must_use]
    pub fn language(&self) -> String {
        self.lock().language.clone()
    }

    /// Current preferences
    #[must_use]
    pub fn preferences(&self) -> SessionPreferences {
        self.lock().preferences.clone()
    }

    /// Backend conversation id, if associated
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.lock().id.clone()
    }
}
