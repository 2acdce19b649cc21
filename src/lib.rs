//! Parley - spoken-language practice sessions
//!
//! This library drives a conversation practice session:
//! - Recording learner speech (manual or hands-free "autospeak")
//! - Transcription, short feedback and the conversation partner's reply
//! - Cached speech synthesis and exclusive playback
//! - Resuming stored conversations and tracking learning-goal progress
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                PracticeSession loop                 │
//! │  Commands  │  Capture poll  │  Playback events      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   CaptureSession │ TurnPipeline │ PlaybackCoordinator│
//! │   Suggestions    │ Validator    │ ProgressEvaluator  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │      Practice backend (HTTP)  │  Local SQLite        │
//! │  STT │ replies │ annotations │ TTS │ conversations   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod services;
pub mod session;
pub mod suggestions;
pub mod tts;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationValidator, Validation, ValidatorPolicy, resume_session};
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use pipeline::{TurnOutcome, TurnPipeline};
pub use progress::{GoalCatalog, LevelUpEvent, ProgressEvaluator, SubgoalProgress};
pub use services::{CachedPreferences, http::HttpBackend};
pub use session::{
    ConversationSession, PracticeSession, SessionCommand, SessionReport, SessionUpdate,
};
pub use suggestions::SuggestionCarousel;
pub use tts::{PlaybackCoordinator, TtsCache};
