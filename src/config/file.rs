//! TOML configuration file loading
//!
//! Supports `~/.config/parley/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ParleyConfigFile {
    /// Practice backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Speech provider settings
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Learner defaults
    #[serde(default)]
    pub practice: PracticeFileConfig,

    /// Timing overrides (milliseconds)
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// Data directory override
    pub data_dir: Option<String>,

    /// Learning goal catalog override
    pub goals_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "backend" or "openai"
    pub provider: Option<String>,
    pub openai_api_key: Option<String>,
    pub stt_model: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PracticeFileConfig {
    pub user_id: Option<String>,
    pub language: Option<String>,
    pub autospeak: Option<bool>,
    pub short_feedback: Option<bool>,
    pub suggestion_count: Option<usize>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    pub autospeak_ceiling_ms: Option<u64>,
    pub rearm_delay_ms: Option<u64>,
    pub validator_delay_ms: Option<u64>,
    pub validator_attempts: Option<u32>,
    pub tts_ttl_ms: Option<u64>,
    pub tts_sweep_ms: Option<u64>,
    pub feedback_window_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Parse a config file from `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn parse_config_file(path: &Path) -> Result<ParleyConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `ParleyConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ParleyConfigFile {
    let Some(path) = config_file_path() else {
        return ParleyConfigFile::default();
    };

    if !path.exists() {
        return ParleyConfigFile::default();
    }

    match parse_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            ParleyConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/parley/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parley").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [practice]
            language = "ja"
            autospeak = true

            [timing]
            rearm_delay_ms = 500
            "#,
        )
        .unwrap();

        let file = parse_config_file(&path).unwrap();
        assert_eq!(file.practice.language.as_deref(), Some("ja"));
        assert_eq!(file.practice.autospeak, Some(true));
        assert_eq!(file.timing.rearm_delay_ms, Some(500));
        assert!(file.backend.base_url.is_none());
    }

    #[test]
    fn test_parse_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "practice = [").unwrap();
        assert!(parse_config_file(&path).is_err());
    }
}
