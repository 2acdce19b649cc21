//! Microphone input devices

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// A source of microphone samples.
///
/// Implementations own the device stream; `close` must release it and be
/// safe to call when nothing is open.
pub trait AudioInput {
    /// Whether the host exposes a usable capture device at all
    fn is_available(&self) -> bool;

    /// Acquire the device and begin buffering samples
    ///
    /// # Errors
    ///
    /// Returns `Permission` if access is denied, `Capability` if the device
    /// vanished, `Audio` for other stream failures
    fn open(&mut self) -> Result<()>;

    /// Take every sample buffered since the last call
    fn drain(&mut self) -> Vec<f32>;

    /// Release the device stream
    fn close(&mut self);

    /// Whether a stream is currently held
    fn is_open(&self) -> bool;

    /// Sample rate of drained audio
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Captures audio from the default input device
pub struct CpalInput {
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl CpalInput {
    /// Create an input bound to the host's default device.
    ///
    /// The device is only touched on `open`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        }
    }

    fn stream_config(device: &cpal::Device) -> Result<StreamConfig> {
        let supported_config = device
            .supported_input_configs()
            .map_err(|e| classify_device_error(&e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Capability("no suitable audio config found".to_string()))?;

        Ok(supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config())
    }
}

impl Default for CpalInput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioInput for CpalInput {
    fn is_available(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::Capability("no input device available".to_string()))?;
        let config = Self::stream_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "opening audio capture"
        );

        let buffer = Arc::clone(&self.buffer);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| classify_device_error(&e.to_string()))?;

        stream
            .play()
            .map_err(|e| classify_device_error(&e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn drain(&mut self) -> Vec<f32> {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Map a backend device error message onto the error taxonomy
fn classify_device_error(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        Error::Permission(message.to_string())
    } else if lower.contains("not available") || lower.contains("no such device") {
        Error::Capability(message.to_string())
    } else {
        Error::Audio(message.to_string())
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
