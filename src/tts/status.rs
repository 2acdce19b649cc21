//! Per-key generating/playing flags shared with the recorder and the UI

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StatusInner {
    generating: HashMap<String, usize>,
    playing: Option<(u64, String)>,
    next_token: u64,
}

/// Shared playback status.
///
/// Flags are raised through guards and lowered when the guard drops, so they
/// clear on success, error, and task cancellation alike.
#[derive(Debug, Clone, Default)]
pub struct PlaybackStatus {
    inner: Arc<Mutex<StatusInner>>,
}

/// Point-in-time copy of the status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackSnapshot {
    pub generating: Vec<String>,
    pub playing: Option<String>,
}

impl PlaybackStatus {
    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as being synthesized until the guard drops
    #[must_use = "the flag clears when the guard drops"]
    pub fn begin_generating(&self, key: &str) -> StatusGuard {
        *self.lock().generating.entry(key.to_string()).or_insert(0) += 1;
        StatusGuard {
            status: self.clone(),
            flag: Flag::Generating(key.to_string()),
        }
    }

    /// Mark `key` as the audio currently playing until the guard drops
    #[must_use = "the flag clears when the guard drops"]
    pub fn begin_playing(&self, key: &str) -> StatusGuard {
        let mut inner = self.lock();
        inner.next_token += 1;
        let token = inner.next_token;
        inner.playing = Some((token, key.to_string()));
        StatusGuard {
            status: self.clone(),
            flag: Flag::Playing(token),
        }
    }

    /// Whether any audio is playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.lock().playing.is_some()
    }

    /// Whether audio is playing or about to play
    #[must_use]
    pub fn is_active(&self) -> bool {
        let inner = self.lock();
        inner.playing.is_some() || !inner.generating.is_empty()
    }

    /// Whether `key` is being synthesized
    #[must_use]
    pub fn is_generating(&self, key: &str) -> bool {
        self.lock().generating.contains_key(key)
    }

    /// Whether `key` is the audio playing
    #[must_use]
    pub fn is_playing_key(&self, key: &str) -> bool {
        self.lock()
            .playing
            .as_ref()
            .is_some_and(|(_, playing)| playing == key)
    }

    /// Copy the current flags
    #[must_use]
    pub fn snapshot(&self) -> PlaybackSnapshot {
        let inner = self.lock();
        let mut generating: Vec<String> = inner.generating.keys().cloned().collect();
        generating.sort();
        PlaybackSnapshot {
            generating,
            playing: inner.playing.as_ref().map(|(_, key)| key.clone()),
        }
    }
}

#[derive(Debug)]
enum Flag {
    Generating(String),
    Playing(u64),
}

/// Lowers its flag on drop
#[derive(Debug)]
pub struct StatusGuard {
    status: PlaybackStatus,
    flag: Flag,
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        let mut inner = self.status.lock();
        match &self.flag {
            Flag::Generating(key) => {
                if let Some(count) = inner.generating.get_mut(key) {
                    *count -= 1;
                    if *count == 0 {
                        inner.generating.remove(key);
                    }
                }
            }
            Flag::Playing(token) => {
                // A newer playback may already own the slot
                if inner.playing.as_ref().is_some_and(|(t, _)| t == token) {
                    inner.playing = None;
                }
            }
        }
    }
}
