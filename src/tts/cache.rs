//! Content-addressed cache of synthesized speech

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::AudioRef;

/// Lifetime of a cached synthesis (5 minutes)
pub const TTS_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Interval of the background sweep (10 minutes)
pub const TTS_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Derive the cache key for `text` spoken in `language`
#[must_use]
pub fn cache_key(text: &str, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.trim().to_lowercase().as_bytes());
    hasher.update([0x1f]);
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    audio: AudioRef,
    created_at: Instant,
}

#[derive(Debug)]
struct Shared {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Shared {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.created_at) < self.ttl);
        before - entries.len()
    }
}

/// TTL cache mapping (text, language) to synthesized audio.
///
/// Cloning shares the underlying store. Writes are last-write-wins per key.
#[derive(Debug, Clone)]
pub struct TtsCache {
    shared: Arc<Shared>,
}

impl Default for TtsCache {
    fn default() -> Self {
        Self::new(TTS_CACHE_TTL)
    }
}

impl TtsCache {
    /// Create an empty cache with the given entry lifetime
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Look up a live entry; expired entries are evicted on the way
    #[must_use]
    pub fn get(&self, key: &str) -> Option<AudioRef> {
        let mut entries = self.shared.entries();
        match entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < self.shared.ttl => {
                Some(Arc::clone(&entry.audio))
            }
            Some(_) => {
                entries.remove(key);
                tracing::trace!(key, "tts cache entry expired");
                None
            }
            None => None,
        }
    }

    /// Store synthesized audio under `key`
    pub fn insert(&self, key: impl Into<String>, audio: AudioRef) {
        self.shared.entries().insert(
            key.into(),
            CacheEntry {
                audio,
                created_at: Instant::now(),
            },
        );
    }

    /// Whether a live entry exists
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of stored entries, live or not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Drop everything
    pub fn clear(&self) {
        self.shared.entries().clear();
    }

    /// Spawn the periodic sweep.
    ///
    /// The task ends on its own once every handle to the cache is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let removed = shared.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "swept expired tts cache entries");
                }
            }
        })
    }
}
