//! Suggested next utterances
//!
//! A small carousel the learner can page through, with explanations fetched
//! per item on demand. Replacing or clearing the contents starts a new
//! generation; explanations issued under an older generation are dropped.
//! A failed fetch leaves the contents, and their generation, untouched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::services::{
    AnnotationService, SuggestionCandidate, SuggestionExplanation, SuggestionRequest,
};
use crate::{Error, Result};

/// Paging direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// Lazy explanation state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplainState {
    #[default]
    NotRequested,
    Loading,
    Ready,
    Failed,
}

/// A suggestion as displayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionItem {
    pub text: String,
    pub romanized_text: Option<String>,
    pub explanation: Option<String>,
    pub translation: Option<String>,
    pub explain_state: ExplainState,
    pub index: usize,
    pub total: usize,
}

#[derive(Debug)]
struct Entry {
    candidate: SuggestionCandidate,
    explain: ExplainState,
    explanation: Option<SuggestionExplanation>,
}

#[derive(Debug, Default)]
struct State {
    /// Bumped whenever `items` is replaced or cleared
    generation: u64,
    /// Bumped by every fetch and clear; only the latest fetch may land
    fetch_ticket: u64,
    language: String,
    items: Vec<Entry>,
    index: usize,
}

impl State {
    fn item(&self, index: usize) -> Option<SuggestionItem> {
        let entry = self.items.get(index)?;
        Some(SuggestionItem {
            text: entry.candidate.text.clone(),
            romanized_text: entry.candidate.romanized_text.clone(),
            explanation: entry.explanation.as_ref().map(|e| e.explanation.clone()),
            translation: entry
                .explanation
                .as_ref()
                .and_then(|e| e.translation.clone()),
            explain_state: entry.explain,
            index,
            total: self.items.len(),
        })
    }
}

/// Cyclic set of suggestions.
///
/// Cloning yields another handle onto the same carousel.
#[derive(Clone)]
pub struct SuggestionCarousel {
    service: Arc<dyn AnnotationService>,
    state: Arc<Mutex<State>>,
}

impl SuggestionCarousel {
    /// Create an empty carousel
    #[must_use]
    pub fn new(service: Arc<dyn AnnotationService>) -> Self {
        Self {
            service,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the contents with fresh suggestions and rewind to the first.
    ///
    /// Returns `false` when a newer fetch or a clear superseded this one.
    ///
    /// # Errors
    ///
    /// Returns the service error; the current contents are kept
    pub async fn fetch(&self, request: &SuggestionRequest) -> Result<bool> {
        let ticket = {
            let mut state = self.lock();
            state.fetch_ticket += 1;
            state.fetch_ticket
        };

        let candidates = self.service.suggestions(request).await?;

        let mut state = self.lock();
        if state.fetch_ticket != ticket {
            tracing::debug!("dropping superseded suggestions");
            return Ok(false);
        }
        state.generation += 1;
        state.items = candidates
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .take(request.count.max(1))
            .map(|candidate| Entry {
                candidate,
                explain: ExplainState::NotRequested,
                explanation: None,
            })
            .collect();
        state.index = 0;
        state.language.clone_from(&request.language);
        tracing::debug!(count = state.items.len(), "suggestions loaded");
        Ok(true)
    }

    /// Move one item left or right, wrapping around
    pub fn navigate(&self, direction: Direction) -> Option<SuggestionItem> {
        let mut state = self.lock();
        let total = state.items.len();
        if total > 1 {
            state.index = match direction {
                Direction::Next => (state.index + 1) % total,
                Direction::Prev => (state.index + total - 1) % total,
            };
        }
        let index = state.index;
        state.item(index)
    }

    /// The item in view
    #[must_use]
    pub fn current(&self) -> Option<SuggestionItem> {
        let state = self.lock();
        state.item(state.index)
    }

    /// Every item in order
    #[must_use]
    pub fn items(&self) -> Vec<SuggestionItem> {
        let state = self.lock();
        (0..state.items.len()).filter_map(|i| state.item(i)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch the explanation and translation of item `index`.
    ///
    /// Returns the item as it stands afterwards, or `None` if the carousel
    /// was refreshed or cleared while the request was in flight. An item
    /// already explained or loading is returned without a new request.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an index out of range, or the service error
    pub async fn explain(&self, index: usize) -> Result<Option<SuggestionItem>> {
        let (generation, text, language) = {
            let mut state = self.lock();
            let total = state.items.len();
            let Some(entry) = state.items.get_mut(index) else {
                return Err(Error::InvalidInput(format!(
                    "suggestion {index} out of range ({total} items)"
                )));
            };
            if matches!(entry.explain, ExplainState::Ready | ExplainState::Loading) {
                return Ok(state.item(index));
            }
            entry.explain = ExplainState::Loading;
            let text = entry.candidate.text.clone();
            (state.generation, text, state.language.clone())
        };

        let result = self.service.explain_suggestion(&text, &language).await;

        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!(index, "dropping stale suggestion explanation");
            return Ok(None);
        }
        let Some(entry) = state.items.get_mut(index) else {
            return Ok(None);
        };
        match result {
            Ok(explanation) => {
                entry.explain = ExplainState::Ready;
                entry.explanation = Some(explanation);
                Ok(state.item(index))
            }
            Err(e) => {
                entry.explain = ExplainState::Failed;
                tracing::warn!(index, error = %e, "suggestion explanation failed");
                Err(e)
            }
        }
    }

    /// Discard everything, including explanation state
    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.fetch_ticket += 1;
        state.items.clear();
        state.index = 0;
    }
}
