//! Practice backend contract tests
//!
//! Verifies request shapes and error mapping of `HttpBackend` against a mock
//! server.

use std::time::Duration;

use base64::Engine;
use parley::services::{
    AnnotationKind, AnnotationRequest, AnnotationService, ConversationStore, MessageDraft,
    PreferencesService, ResponseRequest, ResponseService, SpeechSynthesizer, Transcriber,
};
use parley::session::{Formality, Sender};
use parley::voice::AudioClip;
use parley::{Error, HttpBackend};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(
        &server.uri(),
        Some("test-key".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn response_request() -> ResponseRequest {
    ResponseRequest {
        conversation_id: Some("conv-1".to_string()),
        language: "ja".to_string(),
        history: Vec::new(),
        formality: Formality::Casual,
        topics: vec!["food".to_string()],
        learning_goal_ids: Vec::new(),
        level: "beginner".to_string(),
        uses_persona: false,
    }
}

#[tokio::test]
async fn test_respond_sends_preferences_with_bearer_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "conversation_id": "conv-1",
            "formality": "casual",
            "topics": ["food"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "ラーメンが好きです",
            "romanized_text": "raamen ga suki desu"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = assert_ok!(backend(&server).respond(&response_request()).await);
    assert_eq!(reply.text, "ラーメンが好きです");
    assert_eq!(reply.romanized_text.as_deref(), Some("raamen ga suki desu"));
}

#[tokio::test]
async fn test_server_error_maps_to_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let error = assert_err!(backend(&server).respond(&response_request()).await);
    assert!(matches!(error, Error::Service(_)));
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_missing_conversation_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/conversations/unknown"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let error = assert_err!(backend(&server).get_conversation("unknown").await);
    assert!(matches!(error, Error::NotFound(_)));
}

#[tokio::test]
async fn test_get_conversation_parses_record() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/conversations/conv-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "conv-7",
            "language": "es",
            "formality": "formal",
            "messages": [
                {"id": "m1", "sender": "user", "text": "Hola", "created_at": "2026-01-02T03:04:05Z"},
                {"id": "m2", "sender": "ai", "text": "Buenos días", "created_at": "2026-01-02T03:04:09Z"}
            ]
        })))
        .mount(&server)
        .await;

    let record = backend(&server).get_conversation("conv-7").await.unwrap();
    assert_eq!(record.formality, Some(Formality::Formal));
    assert!(record.topics.is_empty());
    assert_eq!(record.messages.len(), 2);
    assert_eq!(record.messages[1].sender, Sender::Ai);
}

#[tokio::test]
async fn test_save_message_returns_record_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/conversations/conv-1/messages"))
        .and(body_partial_json(json!({"sender": "user", "text": "Hola"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "m9"})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v1/conversations/conv-1/messages/m9"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let draft = MessageDraft {
        sender: Sender::User,
        text: "Hola".to_string(),
        romanized_text: None,
    };
    let backend = backend(&server);
    let id = backend.save_message("conv-1", &draft).await.unwrap();
    assert_eq!(id, "m9");
    assert_ok!(backend.update_message("conv-1", &id, &draft).await);
}

#[tokio::test]
async fn test_annotation_kind_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/annotations"))
        .and(body_partial_json(json!({"kind": "quick_translation"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "text": "I like ramen"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let annotation = backend(&server)
        .annotate(&AnnotationRequest {
            kind: AnnotationKind::QuickTranslation,
            text: "ラーメンが好きです".to_string(),
            language: "ja".to_string(),
            context: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(annotation.text, "I like ramen");
    assert!(annotation.spans.is_empty());
}

#[tokio::test]
async fn test_speech_decodes_base64_audio() {
    let server = MockServer::start().await;
    let audio = base64::engine::general_purpose::STANDARD.encode(b"ID3fake");

    Mock::given(method("POST"))
        .and(path("/v1/speech"))
        .and(body_partial_json(json!({"text": "hola", "language": "es"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"audio": audio})))
        .mount(&server)
        .await;

    let bytes = backend(&server).synthesize("hola", "es").await.unwrap();
    assert_eq!(bytes, b"ID3fake");
}

#[tokio::test]
async fn test_speech_failure_maps_to_tts_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/speech"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = backend(&server).synthesize("hola", "es").await;
    assert!(matches!(result, Err(Error::Tts(_))));
}

#[tokio::test]
async fn test_transcription_uploads_wav() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/transcriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "buenas"})))
        .expect(1)
        .mount(&server)
        .await;

    let clip = AudioClip::new(vec![0.1; 1600], 16_000);
    let text = backend(&server).transcribe(&clip, "es").await.unwrap();
    assert_eq!(text, "buenas");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("audio.wav"));
    assert!(body.contains("RIFF"));
}

#[tokio::test]
async fn test_preferences_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/preferences"))
        .and(query_param("user_id", "u1"))
        .and(query_param("language", "ja"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "formality": "polite",
            "learning_goal_ids": ["greetings"],
            "level": "N5"
        })))
        .mount(&server)
        .await;

    let prefs = backend(&server).preferences("u1", "ja").await.unwrap();
    let session = prefs.to_session_preferences();
    assert_eq!(session.level, "N5");
    assert_eq!(session.learning_goal_ids, vec!["greetings".to_string()]);
}
