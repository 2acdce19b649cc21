//! Configuration management for Parley
//!
//! Values resolve env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use file::ParleyConfigFile;

use crate::{Error, Result};

/// Parley configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Practice backend connection
    pub backend: BackendConfig,

    /// Speech provider settings
    pub speech: SpeechConfig,

    /// Learner defaults
    pub practice: PracticeConfig,

    /// Delays, ceilings and lifetimes
    pub timing: TimingConfig,

    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Learning goal catalog; the bundled catalog is used when unset
    pub goals_path: Option<PathBuf>,
}

/// Practice backend connection
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,

    /// Bearer token (from `PARLEY_API_KEY`); wrapped in a secret by the client
    pub api_key: Option<String>,

    pub timeout: Duration,
}

/// Where speech is transcribed and synthesized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechProvider {
    /// Through the practice backend
    #[default]
    Backend,
    /// Directly against `OpenAI` Whisper / TTS
    OpenAi,
}

impl std::str::FromStr for SpeechProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "backend" => Ok(Self::Backend),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown speech provider: {other}"))),
        }
    }
}

/// Speech provider settings
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,

    /// `OpenAI` API key (for Whisper and TTS)
    pub openai_api_key: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// Learner defaults for new sessions
#[derive(Debug, Clone)]
pub struct PracticeConfig {
    pub user_id: String,
    pub language: String,
    pub autospeak: bool,
    pub short_feedback: bool,
    pub suggestion_count: usize,
    pub level: String,
}

/// Delays, ceilings and lifetimes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub autospeak_ceiling: Duration,
    pub rearm_delay: Duration,
    pub validator_delay: Duration,
    pub validator_attempts: u32,
    pub tts_ttl: Duration,
    pub tts_sweep: Duration,
    pub feedback_window: Duration,
    pub poll_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            autospeak_ceiling: crate::voice::AUTOSPEAK_CEILING,
            rearm_delay: crate::tts::REARM_DELAY,
            validator_delay: Duration::from_millis(300),
            validator_attempts: 3,
            tts_ttl: crate::tts::TTS_CACHE_TTL,
            tts_sweep: crate::tts::TTS_SWEEP_INTERVAL,
            feedback_window: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

const DEFAULT_BACKEND_URL: &str = "http://localhost:8787";

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed
    pub fn load() -> Result<Self> {
        let config = Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())?;

        // Ensure data dir exists
        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Resolve a config from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is malformed
    pub fn resolve(fc: ParleyConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env_bool = |key: &str| {
            env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        // Backend (env > toml > default)
        let timeout_secs = env("PARLEY_TIMEOUT_SECS")
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|_| Error::Config(format!("invalid PARLEY_TIMEOUT_SECS: {s}")))
            })
            .transpose()?
            .or(fc.backend.timeout_secs)
            .unwrap_or(30);
        let backend = BackendConfig {
            base_url: env("PARLEY_BACKEND_URL")
                .or(fc.backend.base_url)
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            api_key: env("PARLEY_API_KEY").or(fc.backend.api_key),
            timeout: Duration::from_secs(timeout_secs),
        };

        // Speech provider
        let provider = env("PARLEY_SPEECH_PROVIDER")
            .or(fc.speech.provider)
            .map(|p| p.parse::<SpeechProvider>())
            .transpose()?
            .unwrap_or_default();
        let speech = SpeechConfig {
            provider,
            openai_api_key: env("OPENAI_API_KEY").or(fc.speech.openai_api_key),
            stt_model: env("PARLEY_STT_MODEL")
                .or(fc.speech.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: env("PARLEY_TTS_MODEL")
                .or(fc.speech.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: env("PARLEY_TTS_VOICE")
                .or(fc.speech.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.speech.tts_speed.unwrap_or(1.0).clamp(0.25, 4.0),
        };
        if speech.provider == SpeechProvider::OpenAi && speech.openai_api_key.is_none() {
            return Err(Error::Config(
                "speech provider openai requires OPENAI_API_KEY".to_string(),
            ));
        }

        // Learner defaults
        let practice = PracticeConfig {
            user_id: env("PARLEY_USER_ID")
                .or(fc.practice.user_id)
                .unwrap_or_else(|| "local".to_string()),
            language: env("PARLEY_LANGUAGE")
                .or(fc.practice.language)
                .unwrap_or_else(|| "ja".to_string()),
            autospeak: env_bool("PARLEY_AUTOSPEAK")
                .or(fc.practice.autospeak)
                .unwrap_or(false),
            short_feedback: env_bool("PARLEY_SHORT_FEEDBACK")
                .or(fc.practice.short_feedback)
                .unwrap_or(true),
            suggestion_count: fc.practice.suggestion_count.unwrap_or(3).max(1),
            level: fc.practice.level.unwrap_or_else(|| "beginner".to_string()),
        };

        // Timing overrides
        let defaults = TimingConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map_or(d, Duration::from_millis);
        let timing = TimingConfig {
            autospeak_ceiling: ms(fc.timing.autospeak_ceiling_ms, defaults.autospeak_ceiling),
            rearm_delay: ms(fc.timing.rearm_delay_ms, defaults.rearm_delay),
            validator_delay: ms(fc.timing.validator_delay_ms, defaults.validator_delay),
            validator_attempts: fc
                .timing
                .validator_attempts
                .unwrap_or(defaults.validator_attempts)
                .max(1),
            tts_ttl: ms(fc.timing.tts_ttl_ms, defaults.tts_ttl),
            tts_sweep: ms(fc.timing.tts_sweep_ms, defaults.tts_sweep),
            feedback_window: ms(fc.timing.feedback_window_ms, defaults.feedback_window),
            poll_interval: ms(fc.timing.poll_interval_ms, defaults.poll_interval),
        };

        // Data directory (~/.local/share/parley on Linux)
        let data_dir = env("PARLEY_DATA_DIR")
            .or(fc.data_dir)
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let goals_path = env("PARLEY_GOALS").or(fc.goals_path).map(PathBuf::from);

        Ok(Self {
            backend,
            speech,
            practice,
            timing,
            data_dir,
            goals_path,
        })
    }

    /// Path of the local database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("parley"))
}
