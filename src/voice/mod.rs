//! Voice processing module
//!
//! Handles microphone capture, speech-end detection, the recording state
//! machine, and speaker playback.

mod capture;
mod detector;
mod playback;
mod session;

pub use capture::{AudioInput, CpalInput, SAMPLE_RATE, samples_to_wav};
pub use detector::{DetectorState, SpeechEndDetector, calculate_energy};
pub use playback::{CpalSink, decode_mp3};
pub use session::{
    AUTOSPEAK_CEILING, AudioClip, CaptureMode, CaptureSession, CaptureState, RecordingStatus,
    StartOutcome, StopReason,
};
