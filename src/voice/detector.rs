//! Speech-end detection
//!
//! Energy-based utterance boundary detection used in autospeak mode: the
//! detector waits for speech, then reports the first stretch of trailing
//! silence long enough to count as the end of the utterance.

use super::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech before a boundary counts (0.3 s)
const MIN_SPEECH_SAMPLES: usize = (SAMPLE_RATE as usize * 3) / 10;

/// Trailing silence that ends an utterance (0.8 s)
const SILENCE_SAMPLES: usize = (SAMPLE_RATE as usize * 8) / 10;

/// State of the speech-end detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// No speech heard yet
    Waiting,
    /// Speech in progress
    Speaking,
    /// Utterance boundary reached
    Ended,
}

/// Detects the end of a spoken utterance
#[derive(Debug, Clone)]
pub struct SpeechEndDetector {
    state: DetectorState,
    threshold: f32,
    speech_samples: usize,
    silence_samples: usize,
}

impl Default for SpeechEndDetector {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl SpeechEndDetector {
    /// Create a detector with a custom RMS energy threshold
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            state: DetectorState::Waiting,
            threshold,
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Feed a chunk of samples.
    ///
    /// Returns `true` exactly once, on the chunk that completes the utterance.
    pub fn process(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }

        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            DetectorState::Waiting => {
                if is_speech {
                    self.state = DetectorState::Speaking;
                    self.speech_samples = samples.len();
                    self.silence_samples = 0;
                    tracing::trace!(energy, "speech detected");
                }
            }
            DetectorState::Speaking => {
                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += samples.len();
                }

                if self.silence_samples >= SILENCE_SAMPLES
                    && self.speech_samples >= MIN_SPEECH_SAMPLES
                {
                    tracing::debug!(
                        speech = self.speech_samples,
                        silence = self.silence_samples,
                        "utterance boundary"
                    );
                    self.state = DetectorState::Ended;
                    return true;
                }

                // A blip too short to be speech followed by long silence
                if self.silence_samples >= SILENCE_SAMPLES {
                    tracing::trace!("speech too short, waiting again");
                    self.reset();
                }
            }
            DetectorState::Ended => {}
        }

        false
    }

    /// Reset to the waiting state
    pub const fn reset(&mut self) {
        self.state = DetectorState::Waiting;
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
