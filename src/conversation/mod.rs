//! Conversation lookup and resume

mod validator;

pub use validator::{ConversationValidator, Validation, ValidatorPolicy};

use crate::services::ConversationRecord;
use crate::session::{ChatMessage, ConversationSession, SessionPreferences};

/// Build a session from a validated backend record.
///
/// The record's stored messages become prior history; choices stored with
/// the conversation take precedence over `preferences`.
#[must_use]
pub fn resume_session(
    record: ConversationRecord,
    mut preferences: SessionPreferences,
) -> ConversationSession {
    if let Some(formality) = record.formality {
        preferences.formality = formality;
    }
    if !record.topics.is_empty() {
        preferences.topics = record.topics;
    }
    if !record.learning_goal_ids.is_empty() {
        preferences.learning_goal_ids = record.learning_goal_ids;
    }

    let history = record
        .messages
        .into_iter()
        .map(|m| {
            ChatMessage::from_history(Some(m.id), m.sender, m.text, m.created_at)
                .with_romanized(m.romanized_text)
        })
        .collect();

    let mut session = ConversationSession::resumed(record.id, record.language, preferences, history);
    session.uses_persona = record.uses_persona;
    session
}
