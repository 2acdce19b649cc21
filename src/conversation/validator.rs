//! Conversation id validation with bounded retry

use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::services::{ConversationRecord, ConversationStore};

/// Retry policy for conversation lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(300),
        }
    }
}

/// Outcome of validating a conversation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// The backend knows the conversation
    Valid(ConversationRecord),
    /// Missing, or the lookup failed; the caller clears the session
    NotFound,
}

impl Validation {
    /// Backend identifier when valid
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Valid(record) => Some(&record.id),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Verifies conversation ids against the backend.
///
/// A freshly created conversation can take a moment to become readable, so
/// 404s are retried; any other failure gives up at once.
pub struct ConversationValidator {
    store: Arc<dyn ConversationStore>,
    policy: ValidatorPolicy,
}

impl ConversationValidator {
    /// Create a validator with the default policy
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self::with_policy(store, ValidatorPolicy::default())
    }

    /// Create a validator with a custom policy
    #[must_use]
    pub fn with_policy(store: Arc<dyn ConversationStore>, policy: ValidatorPolicy) -> Self {
        Self { store, policy }
    }

    /// Check that `id` exists
    pub async fn validate(&self, id: &str) -> Validation {
        let id = id.trim();
        if id.is_empty() {
            return Validation::NotFound;
        }

        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.get_conversation(id).await {
                Ok(record) => {
                    tracing::debug!(conversation_id = %record.id, attempt, "conversation validated");
                    return Validation::Valid(record);
                }
                Err(Error::NotFound(_)) if attempt < attempts => {
                    tracing::debug!(conversation_id = %id, attempt, "conversation not found yet, retrying");
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(Error::NotFound(_)) => {
                    tracing::warn!(conversation_id = %id, attempts, "conversation not found");
                    return Validation::NotFound;
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "conversation lookup failed");
                    return Validation::NotFound;
                }
            }
        }
        Validation::NotFound
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::Result;
    use crate::services::{MessageDraft, NewConversation};

    /// Answers from a script, recording when each call happened
    struct ScriptedStore {
        script: Mutex<Vec<Result<ConversationRecord>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedStore {
        fn new(mut script: Vec<Result<ConversationRecord>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    fn record(id: &str) -> ConversationRecord {
        ConversationRecord {
            id: id.to_string(),
            language: "ja".to_string(),
            formality: None,
            topics: Vec::new(),
            learning_goal_ids: Vec::new(),
            uses_persona: false,
            messages: Vec::new(),
        }
    }

    #[async_trait]
    impl ConversationStore for ScriptedStore {
        async fn create_conversation(&self, _c: &NewConversation) -> Result<String> {
            unreachable!()
        }

        async fn get_conversation(&self, id: &str) -> Result<ConversationRecord> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(Error::NotFound(id.to_string())))
        }

        async fn save_message(&self, _c: &str, _m: &MessageDraft) -> Result<String> {
            unreachable!()
        }

        async fn update_message(&self, _c: &str, _id: &str, _m: &MessageDraft) -> Result<()> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_bounded_and_spaced() {
        let store = ScriptedStore::new(Vec::new());
        let validator = ConversationValidator::new(store.clone());

        assert_eq!(validator.validate("c1").await, Validation::NotFound);

        let calls = store.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_on_second_attempt() {
        let store = ScriptedStore::new(vec![
            Err(Error::NotFound("c1".to_string())),
            Ok(record("c1")),
        ]);
        let validator = ConversationValidator::new(store.clone());

        let validation = validator.validate("c1").await;
        assert_eq!(validation.id(), Some("c1"));
        assert_eq!(store.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_gives_up_immediately() {
        let store = ScriptedStore::new(vec![Err(Error::Service("500".to_string()))]);
        let validator = ConversationValidator::new(store.clone());

        assert!(!validator.validate("c1").await.is_valid());
        assert_eq!(store.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_id_skips_lookup() {
        let store = ScriptedStore::new(Vec::new());
        let validator = ConversationValidator::new(store.clone());

        assert_eq!(validator.validate("  ").await, Validation::NotFound);
        assert!(store.calls.lock().unwrap().is_empty());
    }
}
