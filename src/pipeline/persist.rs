//! Best-effort message persistence
//!
//! Messages go to the backend once the session has a conversation id, and to
//! the device-local fallback store otherwise. Failures are logged and never
//! interrupt a turn.

use std::sync::Arc;

use uuid::Uuid;

use crate::db::LocalMessageRepo;
use crate::services::{ConversationStore, MessageDraft, NewConversation};
use crate::session::{ChatMessage, SharedSession};

/// Where finished messages are written
#[derive(Clone)]
pub struct MessagePersistence {
    store: Option<Arc<dyn ConversationStore>>,
    local: Option<LocalMessageRepo>,
    user_id: String,
}

impl MessagePersistence {
    /// Create a persistence layer; either sink may be absent
    #[must_use]
    pub fn new(
        store: Option<Arc<dyn ConversationStore>>,
        local: Option<LocalMessageRepo>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            local,
            user_id: user_id.into(),
        }
    }

    /// Persist nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, None, String::new())
    }

    /// Create the backend conversation if the session has none yet.
    ///
    /// On success the local fallback copy is cleared. Returns the
    /// conversation id, or `None` when the session stays local.
    pub async fn ensure_conversation(&self, session: &SharedSession) -> Option<String> {
        if let Some(id) = session.conversation_id() {
            return Some(id);
        }
        let store = self.store.as_ref()?;

        let (new, language) = session.with(|s| {
            (
                NewConversation {
                    language: s.language.clone(),
                    formality: s.formality(),
                    topics: s.preferences.topics.clone(),
                    learning_goal_ids: s.preferences.learning_goal_ids.clone(),
                    uses_persona: s.uses_persona,
                },
                s.language.clone(),
            )
        });

        match store.create_conversation(&new).await {
            Ok(id) => {
                session.with(|s| s.id = Some(id.clone()));
                self.clear_local(&language);
                Some(id)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not create conversation, keeping messages local");
                None
            }
        }
    }

    /// Write the message owning `local_id`
    pub async fn persist(&self, session: &SharedSession, local_id: Uuid) {
        let Some((message, conversation_id, language)) = session.with(|s| {
            s.get(local_id)
                .filter(|m| !m.is_processing)
                .map(|m| (m.clone(), s.id.clone(), s.language.clone()))
        }) else {
            return;
        };

        match (conversation_id, &self.store) {
            (Some(conversation_id), Some(store)) => {
                self.persist_remote(store.as_ref(), session, &conversation_id, &message)
                    .await;
            }
            _ => self.persist_local(&language, &message),
        }
    }

    async fn persist_remote(
        &self,
        store: &dyn ConversationStore,
        session: &SharedSession,
        conversation_id: &str,
        message: &ChatMessage,
    ) {
        let draft = MessageDraft::from(message);
        let result = match &message.id {
            Some(id) => store.update_message(conversation_id, id, &draft).await,
            None => store
                .save_message(conversation_id, &draft)
                .await
                .map(|id| {
                    session.with(|s| s.update(message.local_id, |m| m.id = Some(id)));
                }),
        };
        if let Err(e) = result {
            tracing::warn!(
                conversation_id,
                local_id = %message.local_id,
                error = %e,
                "failed to persist message"
            );
        }
    }

    fn persist_local(&self, language: &str, message: &ChatMessage) {
        let Some(local) = &self.local else {
            return;
        };
        if let Err(e) = local.save(&self.user_id, language, message) {
            tracing::warn!(local_id = %message.local_id, error = %e, "failed to save local message");
        }
    }

    /// Messages kept locally from an earlier unauthenticated session
    #[must_use]
    pub fn restore_local(&self, language: &str) -> Vec<ChatMessage> {
        let Some(local) = &self.local else {
            return Vec::new();
        };
        local.load(&self.user_id, language).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to restore local messages");
            Vec::new()
        })
    }

    /// Drop the local fallback copy
    pub fn clear_local(&self, language: &str) {
        if let Some(local) = &self.local {
            match local.clear(&self.user_id, language) {
                Ok(removed) if removed > 0 => {
                    tracing::debug!(removed, "cleared local message copy");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to clear local messages"),
            }
        }
    }
}
