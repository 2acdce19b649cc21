//! Learning progress: goal catalog and subgoal leveling

mod evaluator;
mod goals;

use serde::{Deserialize, Serialize};

pub use evaluator::{Evaluation, LEVEL_UP_THRESHOLD, ProgressEvaluator, apply_percentages};
pub use goals::{GoalCatalog, LearningGoal, Subgoal};

/// Stored progress of one subgoal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgoalProgress {
    pub subgoal_id: String,
    /// 0 to 100
    pub percentage: u32,
    pub level: u32,
}

impl SubgoalProgress {
    /// Fresh entry at level 0
    #[must_use]
    pub fn new(subgoal_id: impl Into<String>) -> Self {
        Self {
            subgoal_id: subgoal_id.into(),
            percentage: 0,
            level: 0,
        }
    }
}

/// A subgoal reached a new level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelUpEvent {
    pub subgoal_id: String,
    pub old_level: u32,
    pub new_level: u32,
    pub new_description: String,
}
