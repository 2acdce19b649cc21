//! Shared test utilities
//!
//! Scripted stand-ins for the backend services and the audio devices.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::services::{
    AnnotationRequest, AnnotationService, ConversationRecord, ConversationStore,
    ConversationSummary, MessageDraft, NewConversation, Reply, ResponseRequest, ResponseService,
    SpeechSynthesizer, SuggestionCandidate, SuggestionExplanation, SuggestionRequest,
    SummaryRequest, Transcriber,
};
use parley::session::Annotation;
use parley::tts::{AudioRef, AudioSink};
use parley::voice::{AudioClip, AudioInput};
use parley::{DbPool, Error, Result, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// `secs` of loud audio at 16 kHz
#[must_use]
pub fn speech(secs: f32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (16_000.0 * secs) as usize;
    vec![0.3; len]
}

#[must_use]
pub fn silence(secs: f32) -> Vec<f32> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (16_000.0 * secs) as usize;
    vec![0.0; len]
}

/// Microphone replaying scripted chunks, one per drain
#[derive(Clone, Default)]
pub struct FakeInput {
    pub chunks: Arc<Mutex<Vec<Vec<f32>>>>,
    pub opens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub unavailable: bool,
    pub deny: bool,
    pub open: bool,
}

impl FakeInput {
    pub fn push(&self, chunk: Vec<f32>) {
        self.chunks.lock().unwrap().push(chunk);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl AudioInput for FakeInput {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    fn open(&mut self) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(Error::Permission("microphone access denied".to_string()));
        }
        self.open = true;
        Ok(())
    }

    fn drain(&mut self) -> Vec<f32> {
        let mut chunks = self.chunks.lock().unwrap();
        if chunks.is_empty() {
            Vec::new()
        } else {
            chunks.remove(0)
        }
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Transcriber returning a fixed transcript, or failing
pub struct MockTranscriber {
    pub transcript: Option<String>,
    pub calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            transcript: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _clip: &AudioClip, _language: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or_else(|| Error::Stt("transcription service unavailable".to_string()))
    }
}

/// Responder that records every request
pub struct MockResponder {
    pub reply: Option<String>,
    pub delay: Duration,
    pub requests: Mutex<Vec<ResponseRequest>>,
}

impl MockResponder {
    pub fn returning(text: &str) -> Arc<Self> {
        Self::slow(text, Duration::ZERO)
    }

    /// Replies with `text` after `delay`
    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ResponseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseService for MockResponder {
    async fn respond(&self, request: &ResponseRequest) -> Result<Reply> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let text = self
            .reply
            .clone()
            .ok_or_else(|| Error::Service("response service unavailable".to_string()))?;
        Ok(Reply {
            text,
            romanized_text: None,
        })
    }
}

/// Annotation service echoing the request kind
#[derive(Default)]
pub struct MockAnnotations {
    pub suggestions: Vec<String>,
    pub percentages: Vec<u32>,
    pub requests: Mutex<Vec<AnnotationRequest>>,
    pub summaries: AtomicUsize,
}

impl MockAnnotations {
    pub fn requests(&self) -> Vec<AnnotationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnnotationService for MockAnnotations {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(Annotation::plain(format!(
            "{}: {}",
            request.kind.as_str(),
            request.text
        )))
    }

    async fn suggestions(&self, request: &SuggestionRequest) -> Result<Vec<SuggestionCandidate>> {
        Ok(self
            .suggestions
            .iter()
            .take(request.count)
            .map(|text| SuggestionCandidate {
                text: text.clone(),
                romanized_text: None,
            })
            .collect())
    }

    async fn explain_suggestion(
        &self,
        text: &str,
        _language: &str,
    ) -> Result<SuggestionExplanation> {
        Ok(SuggestionExplanation {
            explanation: format!("why {text}"),
            translation: None,
        })
    }

    async fn summarize(&self, _request: &SummaryRequest) -> Result<ConversationSummary> {
        self.summaries.fetch_add(1, Ordering::SeqCst);
        Ok(ConversationSummary {
            subgoal_percentages: self.percentages.clone(),
        })
    }
}

/// Synthesizer returning the text bytes
#[derive(Default)]
pub struct MockSynth {
    pub calls: AtomicUsize,
}

impl MockSynth {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.as_bytes().to_vec())
    }
}

/// Speaker that "plays" for a fixed time and records what it played
pub struct MockSink {
    pub duration: Duration,
    pub played: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl MockSink {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            duration,
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        })
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, audio: AudioRef) -> Result<()> {
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&audio).into_owned());
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory conversation store
#[derive(Default)]
pub struct MockStore {
    pub conversations: Mutex<HashMap<String, ConversationRecord>>,
    pub created: Mutex<Vec<NewConversation>>,
    pub saved: Mutex<Vec<(String, MessageDraft)>>,
    pub updated: Mutex<Vec<(String, String, MessageDraft)>>,
    pub lookups: AtomicUsize,
    pub fail_create: bool,
}

impl MockStore {
    pub fn with_record(record: ConversationRecord) -> Arc<Self> {
        let store = Self::default();
        store
            .conversations
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        Arc::new(store)
    }

    pub fn saved(&self) -> Vec<(String, MessageDraft)> {
        self.saved.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationStore for MockStore {
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<String> {
        if self.fail_create {
            return Err(Error::Service("store unavailable".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push(conversation.clone());
        Ok(format!("conv-{}", created.len()))
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    async fn save_message(&self, conversation_id: &str, message: &MessageDraft) -> Result<String> {
        let mut saved = self.saved.lock().unwrap();
        saved.push((conversation_id.to_string(), message.clone()));
        Ok(format!("msg-{}", saved.len()))
    }

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: &MessageDraft,
    ) -> Result<()> {
        self.updated.lock().unwrap().push((
            conversation_id.to_string(),
            message_id.to_string(),
            message.clone(),
        ));
        Ok(())
    }
}
