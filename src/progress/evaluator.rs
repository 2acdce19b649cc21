//! Subgoal leveling

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::goals::{GoalCatalog, Subgoal};
use super::{LevelUpEvent, SubgoalProgress};
use crate::Result;
use crate::db::ProgressRepo;
use crate::services::{AnnotationService, HistoryEntry, SubgoalRef, SummaryRequest};
use crate::session::ConversationSession;

/// Percentage at which a subgoal levels up
pub const LEVEL_UP_THRESHOLD: u32 = 100;

/// Result of applying one batch of percentages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Entries touched by the batch, in evaluation order
    pub updated: Vec<SubgoalProgress>,
    pub level_ups: Vec<LevelUpEvent>,
}

/// Apply `percentages` (one per subgoal, in order) onto `stored` progress.
///
/// A shorter percentage list evaluates only the matching prefix. A subgoal
/// levels up at most once per batch.
#[must_use]
pub fn apply_percentages(
    subgoals: &[&Subgoal],
    percentages: &[u32],
    stored: &[SubgoalProgress],
) -> Evaluation {
    let mut current: HashMap<&str, SubgoalProgress> = stored
        .iter()
        .map(|p| (p.subgoal_id.as_str(), p.clone()))
        .collect();
    let mut incremented: HashSet<&str> = HashSet::new();
    let mut order: Vec<&str> = Vec::new();
    let mut level_ups = Vec::new();

    for (subgoal, &new) in subgoals.iter().zip(percentages) {
        let id = subgoal.id.as_str();
        let entry = current
            .entry(id)
            .or_insert_with(|| SubgoalProgress::new(id));

        if new >= LEVEL_UP_THRESHOLD && incremented.insert(id) {
            let old_level = entry.level;
            entry.level += 1;
            entry.percentage = (new - LEVEL_UP_THRESHOLD).min(LEVEL_UP_THRESHOLD - 1);
            level_ups.push(LevelUpEvent {
                subgoal_id: id.to_string(),
                old_level,
                new_level: entry.level,
                new_description: subgoal.level_description(entry.level),
            });
        } else {
            entry.percentage = new.min(LEVEL_UP_THRESHOLD);
        }

        if !order.contains(&id) {
            order.push(id);
        }
    }

    let updated = order
        .into_iter()
        .filter_map(|id| current.remove(id))
        .collect();

    Evaluation { updated, level_ups }
}

/// Scores a finished session and levels subgoals
pub struct ProgressEvaluator {
    catalog: Arc<GoalCatalog>,
    repo: ProgressRepo,
    annotations: Arc<dyn AnnotationService>,
}

impl ProgressEvaluator {
    /// Create an evaluator
    #[must_use]
    pub fn new(
        catalog: Arc<GoalCatalog>,
        repo: ProgressRepo,
        annotations: Arc<dyn AnnotationService>,
    ) -> Self {
        Self {
            catalog,
            repo,
            annotations,
        }
    }

    /// Stored progress for the user and language
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    pub fn progress(&self, user_id: &str, language: &str) -> Result<Vec<SubgoalProgress>> {
        self.repo.load(user_id, language)
    }

    /// Evaluate the session's own messages against its learning goals.
    ///
    /// Only messages from this session count. Progress that cannot be saved
    /// is logged and the level-ups are still returned.
    ///
    /// # Errors
    ///
    /// Returns error if the summary service or the progress store fails to load
    pub async fn evaluate_session(
        &self,
        user_id: &str,
        session: &ConversationSession,
    ) -> Result<Vec<LevelUpEvent>> {
        let subgoals = self.catalog.expand(&session.preferences.learning_goal_ids);
        if subgoals.is_empty() {
            tracing::debug!("no learning goals to evaluate");
            return Ok(Vec::new());
        }

        let messages: Vec<HistoryEntry> = session
            .session_messages()
            .filter(|m| !m.is_processing)
            .map(HistoryEntry::from)
            .collect();
        if messages.is_empty() {
            tracing::debug!("session has no messages to evaluate");
            return Ok(Vec::new());
        }

        let request = SummaryRequest {
            conversation_id: session.id.clone(),
            language: session.language.clone(),
            messages,
            subgoals: subgoals
                .iter()
                .map(|s| SubgoalRef {
                    id: s.id.clone(),
                    description: s.description.clone(),
                })
                .collect(),
        };
        let summary = self.annotations.summarize(&request).await?;
        if summary.subgoal_percentages.len() < subgoals.len() {
            tracing::debug!(
                expected = subgoals.len(),
                received = summary.subgoal_percentages.len(),
                "summary covers a prefix of the subgoals"
            );
        }

        let stored = self.repo.load(user_id, &session.language)?;
        let evaluation = apply_percentages(&subgoals, &summary.subgoal_percentages, &stored);

        if let Err(e) = self
            .repo
            .save_all(user_id, &session.language, &evaluation.updated)
        {
            tracing::warn!(error = %e, "failed to save subgoal progress");
        }

        for event in &evaluation.level_ups {
            tracing::info!(
                subgoal = %event.subgoal_id,
                old_level = event.old_level,
                new_level = event.new_level,
                "subgoal leveled up"
            );
        }
        Ok(evaluation.level_ups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subgoal(id: &str) -> Subgoal {
        Subgoal {
            id: id.to_string(),
            description: format!("{id} description"),
            levels: vec!["start".to_string(), "first".to_string(), "second".to_string()],
        }
    }

    fn stored(id: &str, percentage: u32, level: u32) -> SubgoalProgress {
        SubgoalProgress {
            subgoal_id: id.to_string(),
            percentage,
            level,
        }
    }

    #[test]
    fn test_crossing_threshold_levels_up_once() {
        let s = subgoal("a");
        let eval = apply_percentages(&[&s], &[100], &[stored("a", 80, 0)]);
        assert_eq!(
            eval.level_ups,
            vec![LevelUpEvent {
                subgoal_id: "a".to_string(),
                old_level: 0,
                new_level: 1,
                new_description: "first".to_string(),
            }]
        );
        assert_eq!(eval.updated, vec![stored("a", 0, 1)]);
    }

    #[test]
    fn test_below_threshold_stores_percentage() {
        let s = subgoal("a");
        let eval = apply_percentages(&[&s], &[95], &[stored("a", 80, 0)]);
        assert!(eval.level_ups.is_empty());
        assert_eq!(eval.updated, vec![stored("a", 95, 0)]);
    }

    #[test]
    fn test_remainder_is_clamped() {
        let s = subgoal("a");
        let eval = apply_percentages(&[&s], &[130], &[]);
        assert_eq!(eval.updated, vec![stored("a", 30, 1)]);

        let eval = apply_percentages(&[&s], &[250], &[]);
        assert_eq!(eval.updated, vec![stored("a", 99, 1)]);
        assert_eq!(eval.level_ups.len(), 1);
    }

    #[test]
    fn test_short_list_evaluates_prefix() {
        let (a, b, c) = (subgoal("a"), subgoal("b"), subgoal("c"));
        let eval = apply_percentages(&[&a, &b, &c], &[10, 20], &[stored("c", 50, 2)]);
        assert_eq!(eval.updated, vec![stored("a", 10, 0), stored("b", 20, 0)]);
    }

    #[test]
    fn test_repeated_subgoal_levels_once() {
        let a = subgoal("a");
        let eval = apply_percentages(&[&a, &a], &[100, 100], &[]);
        assert_eq!(eval.level_ups.len(), 1);
        assert_eq!(eval.updated.len(), 1);
        assert_eq!(eval.updated[0].level, 1);
    }

    #[test]
    fn test_lazy_creation_and_description_fallback() {
        let s = Subgoal {
            id: "x".to_string(),
            description: "x".to_string(),
            levels: Vec::new(),
        };
        let eval = apply_percentages(&[&s], &[100], &[]);
        assert_eq!(eval.level_ups[0].new_description, "Level 1");
    }
}
