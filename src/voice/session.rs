//! Recording state machine
//!
//! `Idle → Requesting → Recording → Stopping → Idle`, or through
//! `Interrupted` when a recording is thrown away for a redo.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::capture::{AudioInput, samples_to_wav};
use super::detector::{SpeechEndDetector, calculate_energy};
use crate::tts::PlaybackStatus;
use crate::{Error, Result};

/// Hard ceiling for an autospeak recording
pub const AUTOSPEAK_CEILING: Duration = Duration::from_secs(10);

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Recording,
    Stopping,
    Interrupted,
}

/// How recordings are started and stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// The learner presses start and stop
    #[default]
    Manual,
    /// Speech-end detection stops the recording and playback re-arms it
    Autospeak,
}

/// Result of a `start` call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new recording is running
    Started,
    /// A recording is already in progress
    AlreadyRecording,
    /// Audio is playing; recording is refused
    PlaybackActive,
}

/// Why a recording asked to be stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The speech-end detector found an utterance boundary
    SpeechEnded,
    /// The autospeak ceiling elapsed
    Ceiling,
}

/// A finished, immutable recording
#[derive(Debug, Clone)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioClip {
    /// Wrap recorded samples
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the recording
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }

    /// Encode as 16-bit mono WAV
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }
}

/// Snapshot of the recorder for UI display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingStatus {
    pub state: CaptureState,
    pub mode: CaptureMode,
    pub elapsed: Option<Duration>,
    /// RMS level of the most recent chunk
    pub level: f32,
}

/// Owns the microphone stream and the recording state machine
pub struct CaptureSession {
    input: Box<dyn AudioInput>,
    detector: Option<SpeechEndDetector>,
    playback: PlaybackStatus,
    state: CaptureState,
    mode: CaptureMode,
    buffer: Vec<f32>,
    started_at: Option<Instant>,
    ceiling: Duration,
    level: f32,
}

impl CaptureSession {
    /// Create a recorder.
    ///
    /// `detector` is `None` when the host has no speech-end detection, in
    /// which case autospeak recordings cannot start.
    #[must_use]
    pub fn new(
        input: Box<dyn AudioInput>,
        detector: Option<SpeechEndDetector>,
        playback: PlaybackStatus,
    ) -> Self {
        Self {
            input,
            detector,
            playback,
            state: CaptureState::Idle,
            mode: CaptureMode::Manual,
            buffer: Vec::new(),
            started_at: None,
            ceiling: AUTOSPEAK_CEILING,
            level: 0.0,
        }
    }

    /// Override the autospeak ceiling
    #[must_use]
    pub const fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether a recording is running
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    /// Status snapshot
    #[must_use]
    pub fn status(&self) -> RecordingStatus {
        RecordingStatus {
            state: self.state,
            mode: self.mode,
            elapsed: self.started_at.map(|t| t.elapsed()),
            level: self.level,
        }
    }

    /// Start a recording.
    ///
    /// A no-op while playback is active, meaning speech is being synthesized
    /// or audio is playing: the state stays `Idle` and the device is not
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns `Capability` if the capture device (or, in autospeak mode, the
    /// speech-end detector) is unavailable, and `Permission` if the device
    /// refuses access
    pub fn start(&mut self, mode: CaptureMode) -> Result<StartOutcome> {
        if self.playback.is_active() {
            tracing::debug!("playback active, recording refused");
            return Ok(StartOutcome::PlaybackActive);
        }

        match self.state {
            CaptureState::Idle => {}
            CaptureState::Recording => return Ok(StartOutcome::AlreadyRecording),
            other => {
                tracing::warn!(state = ?other, "start requested mid-transition");
                return Ok(StartOutcome::AlreadyRecording);
            }
        }

        if !self.input.is_available() {
            return Err(Error::Capability("audio capture is not supported".to_string()));
        }
        if mode == CaptureMode::Autospeak && self.detector.is_none() {
            return Err(Error::Capability(
                "speech-end detection is not supported".to_string(),
            ));
        }

        self.state = CaptureState::Requesting;
        if let Err(e) = self.input.open() {
            tracing::error!(error = %e, "failed to acquire microphone");
            self.release();
            self.state = CaptureState::Idle;
            return Err(e);
        }

        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
        self.mode = mode;
        self.buffer.clear();
        self.level = 0.0;
        self.started_at = Some(Instant::now());
        self.state = CaptureState::Recording;

        tracing::info!(?mode, "recording started");
        Ok(StartOutcome::Started)
    }

    /// Pull buffered audio from the device.
    ///
    /// In autospeak mode returns the reason the recording should stop, once
    /// the detector fires or the ceiling elapses.
    pub fn poll(&mut self) -> Option<StopReason> {
        if self.state != CaptureState::Recording {
            return None;
        }

        let chunk = self.input.drain();
        if !chunk.is_empty() {
            self.level = calculate_energy(&chunk);
            self.buffer.extend_from_slice(&chunk);
        }

        if self.mode != CaptureMode::Autospeak {
            return None;
        }

        if let Some(detector) = self.detector.as_mut() {
            if detector.process(&chunk) {
                return Some(StopReason::SpeechEnded);
            }
        }

        if self.started_at.is_some_and(|t| t.elapsed() >= self.ceiling) {
            tracing::debug!(ceiling = ?self.ceiling, "recording ceiling reached");
            return Some(StopReason::Ceiling);
        }

        None
    }

    /// Stop the current recording.
    ///
    /// With `interrupted` the buffered audio is discarded and nothing is
    /// emitted. The device is released on every path.
    pub fn stop(&mut self, interrupted: bool) -> Option<AudioClip> {
        if !matches!(
            self.state,
            CaptureState::Recording | CaptureState::Requesting
        ) {
            self.release();
            return None;
        }

        self.state = CaptureState::Stopping;

        // Whatever arrived after the last poll still belongs to the take
        let tail = self.input.drain();
        let sample_rate = self.input.sample_rate();
        self.release();

        let clip = if interrupted {
            self.state = CaptureState::Interrupted;
            self.buffer.clear();
            tracing::info!("recording discarded");
            None
        } else {
            self.buffer.extend_from_slice(&tail);
            let clip = AudioClip::new(std::mem::take(&mut self.buffer), sample_rate);
            tracing::info!(duration = ?clip.duration(), "recording finished");
            Some(clip)
        };

        self.started_at = None;
        self.level = 0.0;
        self.state = CaptureState::Idle;
        clip
    }

    fn release(&mut self) {
        if self.input.is_open() {
            self.input.close();
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
