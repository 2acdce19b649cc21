//! Short-feedback de-duplication

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::turn::TurnToken;

/// Window in which an identical transcript gets no second feedback
pub const FEEDBACK_WINDOW: Duration = Duration::from_secs(5);

/// Grants at most one short-feedback request per live turn, and none for a
/// transcript that already received feedback inside the window.
///
/// A token stays claimed until its turn releases it, so only turns still in
/// flight are tracked.
#[derive(Debug)]
pub struct FeedbackGuard {
    window: Duration,
    recent: HashMap<String, Instant>,
    live: HashSet<TurnToken>,
}

impl Default for FeedbackGuard {
    fn default() -> Self {
        Self::new(FEEDBACK_WINDOW)
    }
}

impl FeedbackGuard {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: HashMap::new(),
            live: HashSet::new(),
        }
    }

    /// Claim the feedback request for `token`.
    ///
    /// Returns `false` while `token` already holds a claim, or when the
    /// transcript got feedback within the window.
    pub fn try_claim(&mut self, token: TurnToken, transcript: &str) -> bool {
        let now = Instant::now();
        self.recent
            .retain(|_, at| now.duration_since(*at) < self.window);

        if self.live.contains(&token) {
            tracing::debug!(turn = %token, "feedback already claimed for this turn");
            return false;
        }

        let key = transcript.trim().to_lowercase();
        if self.recent.contains_key(&key) {
            tracing::debug!(turn = %token, "identical transcript got feedback recently");
            return false;
        }

        self.live.insert(token);
        self.recent.insert(key, now);
        true
    }

    /// End the claim held by `token`
    pub fn release(&mut self, token: TurnToken) {
        self.live.remove(&token);
    }

    /// Number of turns currently holding a claim
    #[must_use]
    pub fn live_claims(&self) -> usize {
        self.live.len()
    }
}

/// A turn's claim on short feedback, released when dropped.
///
/// Dropping covers completion and cancellation alike.
#[derive(Debug)]
pub struct FeedbackClaim<'a> {
    guard: &'a Mutex<FeedbackGuard>,
    token: TurnToken,
}

impl<'a> FeedbackClaim<'a> {
    /// Claim feedback for `token` through a shared guard
    #[must_use]
    pub fn acquire(
        guard: &'a Mutex<FeedbackGuard>,
        token: TurnToken,
        transcript: &str,
    ) -> Option<Self> {
        let claimed = guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_claim(token, transcript);
        claimed.then_some(Self { guard, token })
    }

    #[must_use]
    pub const fn token(&self) -> TurnToken {
        self.token
    }
}

impl Drop for FeedbackClaim<'_> {
    fn drop(&mut self) {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_live_token_cannot_claim_twice() {
        let mut guard = FeedbackGuard::default();
        let token = TurnToken::new();
        assert!(guard.try_claim(token, "hola"));
        assert!(!guard.try_claim(token, "something else"));

        guard.release(token);
        assert_eq!(guard.live_claims(), 0);
        assert!(guard.try_claim(token, "something else"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_transcript_window() {
        let mut guard = FeedbackGuard::default();
        assert!(guard.try_claim(TurnToken::new(), "Hola amigo"));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!guard.try_claim(TurnToken::new(), " hola amigo "));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(guard.try_claim(TurnToken::new(), "hola amigo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_is_released_on_drop() {
        let guard = Mutex::new(FeedbackGuard::default());
        let token = TurnToken::new();

        let claim = FeedbackClaim::acquire(&guard, token, "buenos dias").unwrap();
        assert_eq!(claim.token(), token);
        assert!(FeedbackClaim::acquire(&guard, token, "otra cosa").is_none());

        drop(claim);
        assert_eq!(guard.lock().unwrap().live_claims(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_stays_bounded_over_many_turns() {
        let guard = Mutex::new(FeedbackGuard::default());
        for i in 0..1000 {
            let claim = FeedbackClaim::acquire(&guard, TurnToken::new(), &format!("frase {i}"));
            assert!(claim.is_some());
            drop(claim);
            tokio::time::advance(Duration::from_secs(6)).await;
        }

        let guard = guard.lock().unwrap();
        assert_eq!(guard.live_claims(), 0);
        assert!(guard.recent.len() <= 1);
    }
}
