//! Cached dashboard preferences

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mini_moka::sync::Cache;

use super::{DashboardPreferences, PreferencesService};
use crate::Result;
use crate::session::SessionPreferences;

/// Default lifetime of a cached preferences entry
pub const PREFERENCES_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
struct PreferencesKey {
    user_id: String,
    language: String,
}

/// Preferences service wrapper that fetches once per (user, language)
#[derive(Clone)]
pub struct CachedPreferences {
    inner: Arc<dyn PreferencesService>,
    cache: Cache<PreferencesKey, DashboardPreferences>,
}

impl CachedPreferences {
    /// Wrap `inner` with the default TTL
    #[must_use]
    pub fn new(inner: Arc<dyn PreferencesService>) -> Self {
        Self::with_ttl(inner, PREFERENCES_TTL)
    }

    /// Wrap `inner` with a custom TTL
    #[must_use]
    pub fn with_ttl(inner: Arc<dyn PreferencesService>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder().max_capacity(64).time_to_live(ttl).build(),
        }
    }

    /// Preferences for the session, falling back to defaults when the
    /// service is unreachable
    pub async fn session_preferences(&self, user_id: &str, language: &str) -> SessionPreferences {
        match self.preferences(user_id, language).await {
            Ok(dashboard) => dashboard.to_session_preferences(),
            Err(e) => {
                tracing::warn!(user_id, language, error = %e, "preferences unavailable, using defaults");
                SessionPreferences::default()
            }
        }
    }

    /// Forget the cached entry, e.g. after the user edits their dashboard
    pub fn invalidate(&self, user_id: &str, language: &str) {
        self.cache.invalidate(&PreferencesKey {
            user_id: user_id.to_string(),
            language: language.to_string(),
        });
    }
}

#[async_trait]
impl PreferencesService for CachedPreferences {
    async fn preferences(&self, user_id: &str, language: &str) -> Result<DashboardPreferences> {
        let key = PreferencesKey {
            user_id: user_id.to_string(),
            language: language.to_string(),
        };
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let fetched = self.inner.preferences(user_id, language).await?;
        tracing::debug!(user_id, language, "preferences fetched");
        self.cache.insert(key, fetched.clone());
        Ok(fetched)
    }
}

impl DashboardPreferences {
    /// Fold dashboard preferences into session preferences
    #[must_use]
    pub fn to_session_preferences(&self) -> SessionPreferences {
        let defaults = SessionPreferences::default();
        SessionPreferences {
            formality: self.formality.unwrap_or(defaults.formality),
            topics: self.topics.clone(),
            learning_goal_ids: self.learning_goal_ids.clone(),
            level: self
                .level
                .clone()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or(defaults.level),
            show_romanization: self.show_romanization,
        }
    }
}
