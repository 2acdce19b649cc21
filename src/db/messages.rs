//! Fallback message store for sessions without a backend conversation

use chrono::{DateTime, Utc};

use super::{DbPool, connection};
use crate::session::{ChatMessage, Sender};
use crate::{Error, Result};

/// Device-local copy of an unauthenticated session's messages
#[derive(Clone)]
pub struct LocalMessageRepo {
    pool: DbPool,
}

impl LocalMessageRepo {
    /// Create a new local message repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite a message, keyed by its local id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn save(&self, user_id: &str, language: &str, message: &ChatMessage) -> Result<()> {
        let conn = connection(&self.pool)?;

        conn.execute(
            "INSERT INTO local_messages (local_id, user_id, language, sender, text, romanized_text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(local_id) DO UPDATE SET text = ?5, romanized_text = ?6",
            rusqlite::params![
                message.local_id.to_string(),
                user_id,
                language,
                message.sender.as_str(),
                message.text,
                message.romanized_text,
                message.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Restore the stored list in insertion order.
    ///
    /// Restored messages count as prior conversation.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load(&self, user_id: &str, language: &str) -> Result<Vec<ChatMessage>> {
        let conn = connection(&self.pool)?;

        let mut stmt = conn
            .prepare(
                "SELECT sender, text, romanized_text, created_at FROM local_messages
                 WHERE user_id = ?1 AND language = ?2 ORDER BY seq",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let messages = stmt
            .query_map([user_id, language], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .filter_map(|(sender, text, romanized, created_at)| {
                let sender = Sender::parse(&sender)?;
                Some(
                    ChatMessage::from_history(None, sender, text, parse_datetime(&created_at))
                        .with_romanized(romanized),
                )
            })
            .collect();

        Ok(messages)
    }

    /// Drop the stored list, returning how many rows were removed
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear(&self, user_id: &str, language: &str) -> Result<usize> {
        let conn = connection(&self.pool)?;

        let removed = conn
            .execute(
                "DELETE FROM local_messages WHERE user_id = ?1 AND language = ?2",
                [user_id, language],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(removed)
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
