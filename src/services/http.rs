//! HTTP client for the practice backend

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    AnnotationRequest, AnnotationService, ConversationRecord, ConversationStore,
    ConversationSummary, DashboardPreferences, MessageDraft, NewConversation, PreferencesService,
    Reply, ResponseRequest, ResponseService, SpeechSynthesizer, SuggestionCandidate,
    SuggestionExplanation, SuggestionRequest, SummaryRequest, Transcriber,
};
use crate::config::BackendConfig;
use crate::session::Annotation;
use crate::voice::AudioClip;
use crate::{Error, Result};

/// Which error class a failed call maps onto
#[derive(Debug, Clone, Copy)]
enum Call {
    Transcription,
    Speech,
    Other,
}

impl Call {
    fn error(self, message: String) -> Error {
        match self {
            Self::Transcription => Error::Stt(message),
            Self::Speech => Error::Tts(message),
            Self::Other => Error::Service(message),
        }
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Deserialize)]
struct SpeechResponse {
    audio: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct SuggestionsResponse {
    suggestions: Vec<SuggestionCandidate>,
}

/// Client for every backend service the session uses
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<SecretString>,
    voice: Option<String>,
}

impl HttpBackend {
    /// Create a client for `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let mut normalized = base_url.trim().to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("invalid backend url {base_url}: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::from),
            voice: None,
        })
    }

    /// Create a client from the backend config section
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        Self::new(&config.base_url, config.api_key.clone(), config.timeout)
    }

    /// Voice to request from the speech endpoint
    #[must_use]
    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, call: Call) -> Result<reqwest::Response> {
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, "backend request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, url = %response.url(), "backend response");

        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(response.url().path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "backend error");
            return Err(call.error(format!("backend error {status}: {body}")));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder, call: Call) -> Result<T> {
        let response = self.send(builder, call).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        call: Call,
    ) -> Result<T> {
        let builder = self.request(Method::POST, self.endpoint(path)?).json(body);
        self.json(builder, call).await
    }

    fn conversation_path(id: &str) -> String {
        format!("v1/conversations/{}", urlencoding::encode(id))
    }
}

#[async_trait]
impl Transcriber for HttpBackend {
    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<String> {
        let wav = clip.to_wav()?;
        tracing::debug!(audio_bytes = wav.len(), language, "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("language", language.to_string());

        let builder = self
            .request(Method::POST, self.endpoint("v1/transcriptions")?)
            .multipart(form);
        let result: TranscriptionResponse = self.json(builder, Call::Transcription).await?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl ResponseService for HttpBackend {
    async fn respond(&self, request: &ResponseRequest) -> Result<Reply> {
        self.post("v1/responses", request, Call::Other).await
    }
}

#[async_trait]
impl AnnotationService for HttpBackend {
    async fn annotate(&self, request: &AnnotationRequest) -> Result<Annotation> {
        tracing::debug!(kind = request.kind.as_str(), "requesting annotation");
        self.post("v1/annotations", request, Call::Other).await
    }

    async fn suggestions(&self, request: &SuggestionRequest) -> Result<Vec<SuggestionCandidate>> {
        let response: SuggestionsResponse =
            self.post("v1/suggestions", request, Call::Other).await?;
        Ok(response.suggestions)
    }

    async fn explain_suggestion(
        &self,
        text: &str,
        language: &str,
    ) -> Result<SuggestionExplanation> {
        #[derive(Serialize)]
        struct ExplainRequest<'a> {
            text: &'a str,
            language: &'a str,
        }

        self.post(
            "v1/suggestions/explain",
            &ExplainRequest { text, language },
            Call::Other,
        )
        .await
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<ConversationSummary> {
        self.post("v1/summaries", request, Call::Other).await
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpBackend {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct SpeechRequest<'a> {
            text: &'a str,
            language: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            voice: Option<&'a str>,
        }

        let request = SpeechRequest {
            text,
            language,
            voice: self.voice.as_deref(),
        };
        let response: SpeechResponse = self.post("v1/speech", &request, Call::Speech).await?;

        base64::engine::general_purpose::STANDARD
            .decode(response.audio.as_bytes())
            .map_err(|e| Error::Tts(format!("invalid audio payload: {e}")))
    }
}

#[async_trait]
impl ConversationStore for HttpBackend {
    async fn create_conversation(&self, conversation: &NewConversation) -> Result<String> {
        let response: IdResponse = self
            .post("v1/conversations", conversation, Call::Other)
            .await?;
        tracing::info!(conversation_id = %response.id, "conversation created");
        Ok(response.id)
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationRecord> {
        let url = self.endpoint(&Self::conversation_path(id))?;
        self.json(self.request(Method::GET, url), Call::Other).await
    }

    async fn save_message(&self, conversation_id: &str, message: &MessageDraft) -> Result<String> {
        let path = format!("{}/messages", Self::conversation_path(conversation_id));
        let response: IdResponse = self.post(&path, message, Call::Other).await?;
        Ok(response.id)
    }

    async fn update_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        message: &MessageDraft,
    ) -> Result<()> {
        let path = format!(
            "{}/messages/{}",
            Self::conversation_path(conversation_id),
            urlencoding::encode(message_id)
        );
        let builder = self.request(Method::PUT, self.endpoint(&path)?).json(message);
        self.send(builder, Call::Other).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferencesService for HttpBackend {
    async fn preferences(&self, user_id: &str, language: &str) -> Result<DashboardPreferences> {
        let mut url = self.endpoint("v1/preferences")?;
        url.query_pairs_mut()
            .append_pair("user_id", user_id)
            .append_pair("language", language);
        self.json(self.request(Method::GET, url), Call::Other).await
    }
}
