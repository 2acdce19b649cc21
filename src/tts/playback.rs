//! Playback coordination
//!
//! Serializes synthesis and playback so that one clip plays at a time, and
//! closes the autospeak loop by asking the session to re-arm the recorder
//! once a clip ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::cache::{TtsCache, cache_key};
use super::status::PlaybackStatus;
use super::AudioRef;
use crate::Result;
use crate::services::SpeechSynthesizer;

/// Delay between the end of playback and re-arming the recorder
pub const REARM_DELAY: Duration = Duration::from_millis(300);

/// Speaker output
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Play the clip to completion
    async fn play(&self, audio: AudioRef) -> Result<()>;

    /// Cut off whatever is playing
    fn stop(&self);
}

/// Events emitted back to the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback of `key` ran to completion
    Finished { key: String },
    /// Synthesis or playback of `key` failed
    Failed { key: String, error: String },
    /// Autospeak: time to start the next recording
    RearmCapture,
}

struct Inner {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn AudioSink>,
    cache: TtsCache,
    status: PlaybackStatus,
    autospeak: AtomicBool,
    rearm_delay: Duration,
    current: Mutex<Option<JoinHandle<()>>>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl Inner {
    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            // The session may already be gone
            let _ = events.send(event);
        }
    }

    async fn synthesize_and_play(&self, text: &str, language: &str, key: &str) -> Result<()> {
        let audio = if let Some(audio) = self.cache.get(key) {
            tracing::debug!(key, "tts cache hit");
            audio
        } else {
            let _generating = self.status.begin_generating(key);
            let bytes = self.synthesizer.synthesize(text, language).await?;
            let audio: AudioRef = bytes.into();
            self.cache.insert(key, Arc::clone(&audio));
            tracing::debug!(key, bytes = audio.len(), "tts synthesized");
            audio
        };

        let _playing = self.status.begin_playing(key);
        self.sink.play(audio).await
    }
}

/// Serializes TTS requests and playback.
///
/// Cloning yields another handle onto the same coordinator.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    /// Create a coordinator.
    ///
    /// `events` receives completion and re-arm notifications; pass `None`
    /// when nothing listens.
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        cache: TtsCache,
        status: PlaybackStatus,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    ) -> Self {
        Self::with_rearm_delay(synthesizer, sink, cache, status, events, REARM_DELAY)
    }

    /// Create a coordinator with a custom re-arm delay
    #[must_use]
    pub fn with_rearm_delay(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn AudioSink>,
        cache: TtsCache,
        status: PlaybackStatus,
        events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
        rearm_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                synthesizer,
                sink,
                cache,
                status,
                autospeak: AtomicBool::new(false),
                rearm_delay,
                current: Mutex::new(None),
                events,
            }),
        }
    }

    /// Switch the autospeak loop on or off
    pub fn set_autospeak(&self, enabled: bool) {
        self.inner.autospeak.store(enabled, Ordering::SeqCst);
    }

    /// Whether playback end re-arms the recorder
    #[must_use]
    pub fn autospeak(&self) -> bool {
        self.inner.autospeak.load(Ordering::SeqCst)
    }

    /// Shared status flags
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        self.inner.status.clone()
    }

    /// The synthesis cache
    #[must_use]
    pub fn cache(&self) -> &TtsCache {
        &self.inner.cache
    }

    /// Synthesize (or fetch from cache) and play `text`.
    ///
    /// Replaces anything currently playing. In autospeak mode the recorder
    /// is re-armed once the clip ends. Returns the cache key used.
    pub fn enqueue(&self, text: &str, language: &str, key: Option<&str>) -> String {
        self.spawn_playback(text, language, key, true)
    }

    /// Like [`enqueue`](Self::enqueue), but never re-arms the recorder.
    ///
    /// For audio that precedes more audio within the same turn (spoken
    /// feedback ahead of the reply).
    pub fn enqueue_interim(&self, text: &str, language: &str, key: Option<&str>) -> String {
        self.spawn_playback(text, language, key, false)
    }

    fn spawn_playback(&self, text: &str, language: &str, key: Option<&str>, rearm: bool) -> String {
        let key = key.map_or_else(|| cache_key(text, language), ToString::to_string);

        let mut current = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            if !previous.is_finished() {
                tracing::debug!("replacing current playback");
                previous.abort();
                self.inner.sink.stop();
            }
        }

        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        let language = language.to_string();
        let task_key = key.clone();
        *current = Some(tokio::spawn(async move {
            if text.trim().is_empty() {
                inner.emit(PlaybackEvent::Finished { key: task_key });
                return;
            }

            match inner.synthesize_and_play(&text, &language, &task_key).await {
                Ok(()) => inner.emit(PlaybackEvent::Finished { key: task_key }),
                Err(e) => {
                    tracing::warn!(key = %task_key, error = %e, "playback failed");
                    inner.emit(PlaybackEvent::Failed {
                        key: task_key,
                        error: e.to_string(),
                    });
                }
            }

            if rearm && inner.autospeak.load(Ordering::SeqCst) {
                tokio::time::sleep(inner.rearm_delay).await;
                inner.emit(PlaybackEvent::RearmCapture);
            }
        }));

        key
    }

    /// Stop playback without re-arming the recorder
    pub fn stop(&self) {
        if let Some(current) = self
            .inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            current.abort();
        }
        self.inner.sink.stop();
    }

    /// Synthesize without playing, warming the cache
    ///
    /// # Errors
    ///
    /// Returns the synthesis error
    pub async fn prefetch(&self, text: &str, language: &str) -> Result<String> {
        let key = cache_key(text, language);
        if self.inner.cache.contains(&key) {
            return Ok(key);
        }
        let _generating = self.inner.status.begin_generating(&key);
        let bytes = self.inner.synthesizer.synthesize(text, language).await?;
        self.inner.cache.insert(key.clone(), bytes.into());
        Ok(key)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(current) = self
            .current
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            current.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;
    use crate::Error;

    struct CountingSynth {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SpeechSynthesizer for CountingSynth {
        async fn synthesize(&self, text: &str, _language: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Tts("503".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    struct HoldingSink {
        duration: Duration,
        played: Mutex<Vec<Vec<u8>>>,
        stops: AtomicUsize,
        started: Notify,
    }

    impl HoldingSink {
        fn new(duration: Duration) -> Self {
            Self {
                duration,
                played: Mutex::new(Vec::new()),
                stops: AtomicUsize::new(0),
                started: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl AudioSink for HoldingSink {
        async fn play(&self, audio: AudioRef) -> Result<()> {
            self.played.lock().unwrap().push(audio.to_vec());
            self.started.notify_one();
            tokio::time::sleep(self.duration).await;
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn coordinator(
        synth: Arc<CountingSynth>,
        sink: Arc<HoldingSink>,
    ) -> (PlaybackCoordinator, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = PlaybackCoordinator::new(
            synth,
            sink,
            TtsCache::default(),
            PlaybackStatus::default(),
            Some(tx),
        );
        (coordinator, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_then_hit() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_millis(10)));
        let (coordinator, mut rx) = coordinator(Arc::clone(&synth), Arc::clone(&sink));

        let key = coordinator.enqueue("hola", "es", None);
        assert_eq!(
            rx.recv().await,
            Some(PlaybackEvent::Finished { key: key.clone() })
        );
        coordinator.enqueue("hola", "es", Some(&key));
        assert_eq!(rx.recv().await, Some(PlaybackEvent::Finished { key }));

        assert_eq!(synth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.played.lock().unwrap().len(), 2);
        assert!(!coordinator.status().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_playback_replaces_current() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_secs(5)));
        let (coordinator, mut rx) = coordinator(synth, Arc::clone(&sink));

        let first = coordinator.enqueue("first", "en", None);
        sink.started.notified().await;
        assert!(coordinator.status().is_playing_key(&first));

        let second = coordinator.enqueue("second", "en", None);
        assert_eq!(
            rx.recv().await,
            Some(PlaybackEvent::Finished { key: second })
        );
        assert_eq!(sink.stops.load(Ordering::SeqCst), 1);
        assert!(!coordinator.status().is_playing());
        // The replaced clip never reports completion
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autospeak_rearms_after_delay() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_millis(100)));
        let (coordinator, mut rx) = coordinator(synth, sink);
        coordinator.set_autospeak(true);

        coordinator.enqueue("listo", "es", None);
        assert!(matches!(
            rx.recv().await,
            Some(PlaybackEvent::Finished { .. })
        ));
        let finished_at = tokio::time::Instant::now();
        assert_eq!(rx.recv().await, Some(PlaybackEvent::RearmCapture));
        assert!(finished_at.elapsed() >= REARM_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_clears_flags_and_still_rearms() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_millis(100)));
        let (coordinator, mut rx) = coordinator(synth, Arc::clone(&sink));
        coordinator.set_autospeak(true);

        let key = coordinator.enqueue("oops", "en", None);
        assert!(matches!(
            rx.recv().await,
            Some(PlaybackEvent::Failed { key: k, .. }) if k == key
        ));
        assert!(!coordinator.status().is_generating(&key));
        assert_eq!(rx.recv().await, Some(PlaybackEvent::RearmCapture));
        assert!(sink.played.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interim_playback_does_not_rearm() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_millis(100)));
        let (coordinator, mut rx) = coordinator(synth, sink);
        coordinator.set_autospeak(true);

        coordinator.enqueue_interim("good job", "en", None);
        assert!(matches!(
            rx.recv().await,
            Some(PlaybackEvent::Finished { .. })
        ));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_without_rearm() {
        let synth = Arc::new(CountingSynth {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let sink = Arc::new(HoldingSink::new(Duration::from_secs(5)));
        let (coordinator, mut rx) = coordinator(synth, Arc::clone(&sink));
        coordinator.set_autospeak(true);

        coordinator.enqueue("long", "en", None);
        sink.started.notified().await;
        coordinator.stop();
        tokio::task::yield_now().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!coordinator.status().is_playing());
        assert!(rx.try_recv().is_err());
    }
}
