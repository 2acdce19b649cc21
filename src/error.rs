//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a practice session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required device or host capability is missing (no input device,
    /// no speech-end detector in autospeak mode)
    #[error("capability unavailable: {0}")]
    Capability(String),

    /// Device access was denied
    #[error("permission denied: {0}")]
    Permission(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Any other backend service failure (response, annotation, suggestions)
    #[error("service error: {0}")]
    Service(String),

    /// Resource not found (conversation ids answer 404 with this)
    #[error("not found: {0}")]
    NotFound(String),

    /// Message or progress persistence failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid session setup or command argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the failure belongs to the transient service class.
    ///
    /// Transient failures never abort a turn; the caller substitutes a
    /// sentinel value instead.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Stt(_) | Self::Tts(_) | Self::Service(_) | Self::Http(_) | Self::Serialization(_)
        )
    }

    /// Whether the failure must interrupt the interaction with an explicit notice
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::Capability(_) | Self::Permission(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Service("timeout".to_string()).is_transient());
        assert!(Error::Tts("502".to_string()).is_transient());
        assert!(!Error::NotFound("c1".to_string()).is_transient());
        assert!(!Error::Persistence("disk".to_string()).is_transient());

        assert!(Error::Capability("no mic".to_string()).is_user_facing());
        assert!(Error::Permission("denied".to_string()).is_user_facing());
        assert!(!Error::Service("x".to_string()).is_user_facing());
    }
}
