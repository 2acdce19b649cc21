//! Turn pipeline integration tests
//!
//! Runs whole turns against scripted services

use std::sync::Arc;
use std::time::Duration;

use parley::Error;
use parley::db::LocalMessageRepo;
use parley::pipeline::{
    FALLBACK_REPLY, MessagePersistence, NO_SPEECH_TRANSCRIPT, TurnInput, TurnOptions,
    TurnPipeline, TurnServices, TurnStep,
};
use parley::services::{AnnotationKind, ConversationStore};
use parley::session::{ConversationSession, Sender, SessionPreferences, SharedSession};
use parley::tts::{PlaybackCoordinator, PlaybackStatus, TtsCache};
use parley::voice::AudioClip;

mod common;
use common::{
    MockAnnotations, MockResponder, MockSink, MockStore, MockSynth, MockTranscriber,
    setup_test_db,
};

struct Harness {
    pipeline: TurnPipeline,
    session: SharedSession,
    responder: Arc<MockResponder>,
    annotations: Arc<MockAnnotations>,
    sink: Arc<MockSink>,
}

fn harness(
    transcriber: Arc<MockTranscriber>,
    responder: Arc<MockResponder>,
    persistence: MessagePersistence,
) -> Harness {
    let session = SharedSession::new(ConversationSession::new("ja", SessionPreferences::default()));
    let annotations = Arc::new(MockAnnotations::default());
    let sink = MockSink::new(Duration::from_millis(200));
    let playback = PlaybackCoordinator::new(
        Arc::new(MockSynth::default()),
        sink.clone(),
        TtsCache::default(),
        PlaybackStatus::default(),
        None,
    );
    let pipeline = TurnPipeline::new(
        session.clone(),
        TurnServices {
            transcriber,
            responder: responder.clone(),
            annotations: annotations.clone(),
        },
        playback,
        persistence,
    );
    Harness {
        pipeline,
        session,
        responder,
        annotations,
        sink,
    }
}

fn clip() -> AudioClip {
    AudioClip::new(common::speech(1.0), 16_000)
}

const AUTOSPEAK: TurnOptions = TurnOptions {
    autospeak: true,
    short_feedback: true,
};

#[tokio::test(start_paused = true)]
async fn test_audio_turn_resolves_placeholders_in_place() {
    let h = harness(
        MockTranscriber::returning("konnichiwa"),
        MockResponder::returning("こんにちは！"),
        MessagePersistence::disabled(),
    );

    let outcome = h
        .pipeline
        .run(TurnInput::Audio(clip()), TurnOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.transcript, "konnichiwa");
    assert_eq!(outcome.reply, "こんにちは！");
    assert!(outcome.failures.is_empty());

    let messages = h.session.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| !m.is_processing));
    assert_eq!(messages[0].local_id, outcome.user_message);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1].local_id, outcome.ai_message);
    assert!(messages[1].tts_key.is_some());

    // The reply is spoken
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.sink.played(), vec!["こんにちは！".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_transcription_failure_substitutes_sentinel() {
    let h = harness(
        MockTranscriber::failing(),
        MockResponder::returning("もう一度お願いします"),
        MessagePersistence::disabled(),
    );

    let outcome = h.pipeline.run(TurnInput::Audio(clip()), AUTOSPEAK).await.unwrap();

    assert_eq!(outcome.transcript, NO_SPEECH_TRANSCRIPT);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].step, TurnStep::Transcription);
    // No feedback on the sentinel
    assert!(outcome.feedback_message.is_none());
    assert!(h.annotations.requests().is_empty());
    // The turn still completes
    assert_eq!(outcome.reply, "もう一度お願いします");
}

#[tokio::test(start_paused = true)]
async fn test_response_failure_substitutes_fallback() {
    let h = harness(
        MockTranscriber::returning("hai"),
        MockResponder::failing(),
        MessagePersistence::disabled(),
    );

    let outcome = h
        .pipeline
        .run(TurnInput::Text("hai".to_string()), TurnOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.reply, FALLBACK_REPLY);
    assert_eq!(outcome.failures[0].step, TurnStep::Response);
    let ai = h
        .session
        .with(|s| s.get(outcome.ai_message).cloned())
        .unwrap();
    assert_eq!(ai.text, FALLBACK_REPLY);
    assert!(!ai.is_processing);
}

#[tokio::test(start_paused = true)]
async fn test_short_feedback_in_autospeak_only() {
    let h = harness(
        MockTranscriber::returning("watashi wa gakusei desu"),
        MockResponder::returning("そうですか"),
        MessagePersistence::disabled(),
    );

    let manual = h
        .pipeline
        .run(TurnInput::Audio(clip()), TurnOptions {
            autospeak: false,
            short_feedback: true,
        })
        .await
        .unwrap();
    assert!(manual.feedback_message.is_none());

    let spoken = h
        .pipeline
        .run(TurnInput::Text("kore wa pen desu".to_string()), AUTOSPEAK)
        .await
        .unwrap();
    let feedback_id = spoken.feedback_message.unwrap();

    let feedback = h.session.with(|s| s.get(feedback_id).cloned()).unwrap();
    assert_eq!(feedback.sender, Sender::System);
    let user = h
        .session
        .with(|s| s.get(spoken.user_message).cloned())
        .unwrap();
    assert!(user.short_feedback.is_some());

    let requests = h.annotations.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, AnnotationKind::ShortFeedback);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_transcript_gets_feedback_once() {
    let h = harness(
        MockTranscriber::returning("sumimasen"),
        MockResponder::returning("はい"),
        MessagePersistence::disabled(),
    );

    let first = h.pipeline.run(TurnInput::Audio(clip()), AUTOSPEAK).await.unwrap();
    let second = h.pipeline.run(TurnInput::Audio(clip()), AUTOSPEAK).await.unwrap();

    assert!(first.feedback_message.is_some());
    assert!(second.feedback_message.is_none());
    assert_eq!(h.annotations.requests().len(), 1);
    // Finished turns hold no claim
    assert_eq!(h.pipeline.feedback_claims(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_turn_releases_feedback_claim() {
    let h = harness(
        MockTranscriber::returning("moshi moshi"),
        MockResponder::slow("はい", Duration::from_secs(30)),
        MessagePersistence::disabled(),
    );
    let pipeline = Arc::new(h.pipeline);

    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.run(TurnInput::Audio(clip()), AUTOSPEAK).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(pipeline.feedback_claims(), 1);
    assert_eq!(h.annotations.requests().len(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(pipeline.feedback_claims(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_system_messages_stay_out_of_history() {
    let h = harness(
        MockTranscriber::returning("arigatou"),
        MockResponder::returning("どういたしまして"),
        MessagePersistence::disabled(),
    );

    h.pipeline.run(TurnInput::Audio(clip()), AUTOSPEAK).await.unwrap();
    h.pipeline
        .run(TurnInput::Text("mata ne".to_string()), AUTOSPEAK)
        .await
        .unwrap();

    let requests = h.responder.requests();
    let last = requests.last().unwrap();
    assert!(last.history.iter().all(|e| e.sender != Sender::System));
    assert_eq!(last.history.len(), 3);
    assert_eq!(last.history[2].text, "mata ne");
}

#[tokio::test(start_paused = true)]
async fn test_messages_persist_to_new_conversation() {
    let store = Arc::new(MockStore::default());
    let persistence = MessagePersistence::new(
        Some(store.clone() as Arc<dyn ConversationStore>),
        None,
        "learner",
    );
    let h = harness(
        MockTranscriber::returning("ohayou"),
        MockResponder::returning("おはようございます"),
        persistence,
    );

    h.pipeline
        .run(TurnInput::Audio(clip()), TurnOptions::default())
        .await
        .unwrap();
    h.pipeline
        .run(TurnInput::Text("genki desu".to_string()), TurnOptions::default())
        .await
        .unwrap();

    assert_eq!(store.created(), 1);
    assert_eq!(h.session.conversation_id().as_deref(), Some("conv-1"));

    let saved = store.saved();
    assert_eq!(saved.len(), 4);
    assert!(saved.iter().all(|(conversation, _)| conversation == "conv-1"));
    assert_eq!(saved[0].1.text, "ohayou");
    assert_eq!(saved[1].1.sender, Sender::Ai);
    assert!(h.session.messages().iter().all(|m| m.id.is_some()));
}

#[tokio::test(start_paused = true)]
async fn test_messages_stay_local_when_store_is_down() {
    let pool = setup_test_db();
    let store = Arc::new(MockStore {
        fail_create: true,
        ..MockStore::default()
    });
    let persistence = MessagePersistence::new(
        Some(store.clone() as Arc<dyn ConversationStore>),
        Some(LocalMessageRepo::new(pool.clone())),
        "learner",
    );
    let h = harness(
        MockTranscriber::returning("konbanwa"),
        MockResponder::returning("こんばんは"),
        persistence,
    );

    h.pipeline
        .run(TurnInput::Audio(clip()), TurnOptions::default())
        .await
        .unwrap();

    assert!(store.saved().is_empty());
    let local = LocalMessageRepo::new(pool).load("learner", "ja").unwrap();
    assert_eq!(local.len(), 2);
    assert_eq!(local[0].text, "konbanwa");
}

#[tokio::test(start_paused = true)]
async fn test_annotate_stores_translation() {
    let h = harness(
        MockTranscriber::returning("ii tenki"),
        MockResponder::returning("いい天気ですね"),
        MessagePersistence::disabled(),
    );
    let outcome = h
        .pipeline
        .run(TurnInput::Audio(clip()), TurnOptions::default())
        .await
        .unwrap();

    let annotation = h
        .pipeline
        .annotate(outcome.ai_message, AnnotationKind::QuickTranslation)
        .await
        .unwrap();

    let ai = h
        .session
        .with(|s| s.get(outcome.ai_message).cloned())
        .unwrap();
    assert_eq!(ai.translation.as_deref(), Some(annotation.text.as_str()));

    let missing = h
        .pipeline
        .annotate(uuid::Uuid::new_v4(), AnnotationKind::DetailedFeedback)
        .await;
    assert!(matches!(missing, Err(Error::NotFound(_))));
    assert!(matches!(
        h.pipeline.replay(uuid::Uuid::new_v4()),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_replay_reuses_cached_audio() {
    let synth = Arc::new(MockSynth::default());
    let sink = MockSink::new(Duration::from_millis(100));
    let session = SharedSession::new(ConversationSession::new("ja", SessionPreferences::default()));
    let pipeline = TurnPipeline::new(
        session,
        TurnServices {
            transcriber: MockTranscriber::returning("nani"),
            responder: MockResponder::returning("なんでもない"),
            annotations: Arc::new(MockAnnotations::default()),
        },
        PlaybackCoordinator::new(
            synth.clone(),
            sink.clone(),
            TtsCache::default(),
            PlaybackStatus::default(),
            None,
        ),
        MessagePersistence::disabled(),
    );

    let outcome = pipeline
        .run(TurnInput::Audio(clip()), TurnOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    pipeline.replay(outcome.ai_message).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(synth.calls(), 1);
    assert_eq!(sink.played().len(), 2);
}
