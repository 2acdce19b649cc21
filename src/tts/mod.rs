//! Text-to-speech caching and playback coordination

mod cache;
mod playback;
mod status;

use std::sync::Arc;

pub use cache::{TTS_CACHE_TTL, TTS_SWEEP_INTERVAL, TtsCache, cache_key};
pub use playback::{AudioSink, PlaybackCoordinator, PlaybackEvent, REARM_DELAY};
pub use status::{PlaybackSnapshot, PlaybackStatus, StatusGuard};

/// Synthesized audio as returned by the TTS service (MP3 bytes)
pub type AudioRef = Arc<[u8]>;
