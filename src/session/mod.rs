//! Practice session model and the orchestration loop that drives it

mod controller;
mod conversation;
mod message;

pub use controller::{
    PracticeSession, SessionCommand, SessionDevices, SessionEvent, SessionNotice, SessionOptions,
    SessionReport, SessionServices, SessionUpdate, open_conversation,
};
pub use conversation::{
    ConversationSession, Formality, SessionPreferences, SessionSetup, SharedSession,
};
pub use message::{AnnotatedSpan, Annotation, ChatMessage, PLACEHOLDER_TEXT, Sender};
