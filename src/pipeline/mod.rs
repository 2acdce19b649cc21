//! Turn orchestration: transcription, feedback, reply, persistence

mod feedback;
mod persist;
mod turn;

pub use feedback::{FEEDBACK_WINDOW, FeedbackClaim, FeedbackGuard};
pub use persist::MessagePersistence;
pub use turn::{
    ANNOTATION_CONTEXT, FALLBACK_REPLY, NO_SPEECH_TRANSCRIPT, StepFailure, TurnInput, TurnOptions,
    TurnOutcome, TurnPipeline, TurnServices, TurnStep, TurnToken, TurnUpdate,
};
