//! Learning goal catalog

use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

const BUNDLED_GOALS: &str = include_str!("../../assets/goals.toml");

/// Leaf learning objective
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subgoal {
    pub id: String,
    pub description: String,
    /// `levels[n]` describes level n
    #[serde(default)]
    pub levels: Vec<String>,
}

impl Subgoal {
    /// Description of `level`, with a generic label past the last one
    #[must_use]
    pub fn level_description(&self, level: u32) -> String {
        usize::try_from(level)
            .ok()
            .and_then(|i| self.levels.get(i))
            .cloned()
            .unwrap_or_else(|| format!("Level {level}"))
    }
}

/// Learning goal made of ordered subgoals
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LearningGoal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subgoals: Vec<Subgoal>,
}

/// All known learning goals
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalCatalog {
    #[serde(default)]
    goals: Vec<LearningGoal>,
}

impl GoalCatalog {
    /// The catalog compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if the bundled catalog does not parse
    pub fn bundled() -> Result<Self> {
        Self::from_toml(BUNDLED_GOALS)
    }

    /// Parse a catalog from TOML
    ///
    /// # Errors
    ///
    /// Returns error on invalid TOML or duplicate subgoal ids
    pub fn from_toml(content: &str) -> Result<Self> {
        let catalog: Self = toml::from_str(content)?;

        let mut seen = std::collections::HashSet::new();
        for subgoal in catalog.goals.iter().flat_map(|g| &g.subgoals) {
            if !seen.insert(subgoal.id.as_str()) {
                return Err(Error::Config(format!("duplicate subgoal id: {}", subgoal.id)));
            }
        }
        Ok(catalog)
    }

    /// Load a catalog file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Every goal in catalog order
    #[must_use]
    pub fn goals(&self) -> &[LearningGoal] {
        &self.goals
    }

    /// Look up a goal
    #[must_use]
    pub fn goal(&self, id: &str) -> Option<&LearningGoal> {
        self.goals.iter().find(|g| g.id == id)
    }

    /// Expand goal ids into their subgoals, preserving goal order.
    ///
    /// Unknown goal ids are skipped.
    #[must_use]
    pub fn expand(&self, goal_ids: &[String]) -> Vec<&Subgoal> {
        goal_ids
            .iter()
            .filter_map(|id| {
                let goal = self.goal(id);
                if goal.is_none() {
                    tracing::warn!(goal_id = %id, "unknown learning goal");
                }
                goal
            })
            .flat_map(|g| &g.subgoals)
            .collect()
    }
}
