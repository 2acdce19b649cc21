//! Subgoal progress repository

use chrono::Utc;

use super::{DbPool, connection};
use crate::progress::SubgoalProgress;
use crate::{Error, Result};

/// Device-local subgoal progress keyed by (user, language)
#[derive(Clone)]
pub struct ProgressRepo {
    pool: DbPool,
}

impl ProgressRepo {
    /// Create a new progress repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Load every stored subgoal for the user and language
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load(&self, user_id: &str, language: &str) -> Result<Vec<SubgoalProgress>> {
        let conn = connection(&self.pool)?;

        let mut stmt = conn
            .prepare(
                "SELECT subgoal_id, percentage, level FROM subgoal_progress
                 WHERE user_id = ?1 AND language = ?2 ORDER BY subgoal_id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let progress = stmt
            .query_map([user_id, language], |row| {
                Ok(SubgoalProgress {
                    subgoal_id: row.get(0)?,
                    percentage: row.get(1)?,
                    level: row.get(2)?,
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(progress)
    }

    /// Look up one subgoal
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(
        &self,
        user_id: &str,
        language: &str,
        subgoal_id: &str,
    ) -> Result<Option<SubgoalProgress>> {
        let conn = connection(&self.pool)?;

        let progress = conn
            .query_row(
                "SELECT subgoal_id, percentage, level FROM subgoal_progress
                 WHERE user_id = ?1 AND language = ?2 AND subgoal_id = ?3",
                [user_id, language, subgoal_id],
                |row| {
                    Ok(SubgoalProgress {
                        subgoal_id: row.get(0)?,
                        percentage: row.get(1)?,
                        level: row.get(2)?,
                    })
                },
            )
            .ok();

        Ok(progress)
    }

    /// Upsert the given entries in one transaction
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails; nothing is written then
    pub fn save_all(&self, user_id: &str, language: &str, entries: &[SubgoalProgress]) -> Result<()> {
        let mut conn = connection(&self.pool)?;
        let now = Utc::now().to_rfc3339();

        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        for entry in entries {
            tx.execute(
                "INSERT INTO subgoal_progress (user_id, language, subgoal_id, percentage, level, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, language, subgoal_id)
                 DO UPDATE SET percentage = ?4, level = ?5, updated_at = ?6",
                rusqlite::params![
                    user_id,
                    language,
                    entry.subgoal_id,
                    entry.percentage,
                    entry.level,
                    now
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        }
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(user_id, language, count = entries.len(), "progress saved");
        Ok(())
    }
}
