mod support;

use std::sync::Arc;

use mpbridge_domain::kv::InMemoryKvStore;
use mpbridge_domain::message_state::{MessageState, MessageStatus, VoiceStatus};
use mpbridge_domain::reply::{
    DEFAULT_RETRY_LATER_REPLY, DEFAULT_VOICE_FAILURE_REPLY, ReplyConfig, ReplyCoordinator,
    ReplyOutcome,
};
use tokio::time::{Instant, sleep_until};

use support::{BASE_MS, PausedClock, StubGateway, StubTranscriber, ms};

fn voice_coordinator(
    store: &Arc<InMemoryKvStore>,
    gateway: &Arc<StubGateway>,
    transcriber: &Arc<StubTranscriber>,
) -> ReplyCoordinator {
    ReplyCoordinator::new(store.clone(), gateway.clone(), ReplyConfig::default())
        .with_transcriber(transcriber.clone())
        .with_clock(PausedClock::new())
}

#[tokio::test(start_paused = true)]
async fn recognized_voice_is_answered_like_text() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("it is noon", ms(500));
    let transcriber = StubTranscriber::recognizing("what time is it", ms(200));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let outcome = replies.handle_voice("V1", "media-1").await.unwrap();

    assert_eq!(outcome, ReplyOutcome::Reply("it is noon".to_string()));
    assert_eq!(gateway.prompts(), vec!["what time is it".to_string()]);
    assert_eq!(transcriber.calls(), 1);
    assert!(replies.states().load("V1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_recognition_replies_with_the_voice_fallback() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("unused", ms(10));
    let transcriber = StubTranscriber::failing();
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let outcome = replies.handle_voice("V2", "media-2").await.unwrap();

    assert_eq!(
        outcome,
        ReplyOutcome::Reply(DEFAULT_VOICE_FAILURE_REPLY.to_string())
    );
    assert_eq!(gateway.calls(), 0);
    assert!(replies.states().load("V2").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn voice_without_a_transcriber_gets_the_voice_fallback() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("unused", ms(10));
    let replies = ReplyCoordinator::new(store.clone(), gateway.clone(), ReplyConfig::default())
        .with_clock(PausedClock::new());

    let outcome = replies.handle_voice("V3", "media-3").await.unwrap();

    assert_eq!(
        outcome,
        ReplyOutcome::Reply(DEFAULT_VOICE_FAILURE_REPLY.to_string())
    );
    assert_eq!(gateway.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_recognition_is_finished_by_the_redelivery() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("here you go", ms(500));
    let transcriber = StubTranscriber::recognizing("tell me a joke", ms(5_000));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let start = Instant::now();
    let first = tokio::spawn({
        let replies = replies.clone();
        async move { replies.handle_voice("V4", "media-4").await }
    });

    sleep_until(start + ms(4_500)).await;
    let recognizing = replies.states().load("V4").await.unwrap().unwrap().state;
    assert_eq!(recognizing.voice_status, VoiceStatus::Recognizing);

    let second = replies.handle_voice("V4", "media-4").await.unwrap();
    assert_eq!(second, ReplyOutcome::Reply("here you go".to_string()));
    assert!(start.elapsed() <= ms(8_500));

    assert_eq!(first.await.unwrap().unwrap(), ReplyOutcome::NoReply);
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(gateway.prompts(), vec!["tell me a joke".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn endless_recognition_asks_the_sender_to_retry_later() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("unused", ms(10));
    let transcriber = StubTranscriber::hanging();
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let start = Instant::now();
    let stuck = tokio::spawn({
        let replies = replies.clone();
        async move { replies.handle_voice("V5", "media-5").await }
    });

    sleep_until(start + ms(5_000)).await;
    assert_eq!(
        replies.handle_voice("V5", "media-5").await.unwrap(),
        ReplyOutcome::NoReply
    );

    sleep_until(start + ms(10_000)).await;
    assert_eq!(
        replies.handle_voice("V5", "media-5").await.unwrap(),
        ReplyOutcome::RetryLater(DEFAULT_RETRY_LATER_REPLY.to_string())
    );

    let state = replies.states().load("V5").await.unwrap().unwrap().state;
    assert_eq!(state.voice_status, VoiceStatus::Recognizing);
    assert_eq!(state.status, MessageStatus::Idle);
    assert_eq!(state.first_timestamp, BASE_MS + 14_000);
    assert_eq!(transcriber.calls(), 1);
    assert_eq!(gateway.calls(), 0);

    stuck.abort();
}

#[tokio::test(start_paused = true)]
async fn voice_delivery_during_a_text_lifecycle_waits_for_its_reply() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("text answer", ms(6_000));
    let transcriber = StubTranscriber::recognizing("unused", ms(10));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    assert_eq!(
        replies.handle_text("V6", "typed question").await.unwrap(),
        ReplyOutcome::NoReply
    );

    let voice = replies.handle_voice("V6", "media-6").await.unwrap();
    assert_eq!(voice, ReplyOutcome::Reply("text answer".to_string()));
    assert_eq!(transcriber.calls(), 0);
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn typed_message_during_recognition_joins_the_voice_lifecycle() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("spoken answer", ms(6_000));
    let transcriber = StubTranscriber::recognizing("spoken question", ms(2_000));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let start = Instant::now();
    let voice = tokio::spawn({
        let replies = replies.clone();
        async move { replies.handle_voice("V7", "media-7").await }
    });

    sleep_until(start + ms(500)).await;
    let typed = replies.handle_text("V7", "typed").await.unwrap();
    assert_eq!(typed, ReplyOutcome::NoReply);
    assert_eq!(voice.await.unwrap().unwrap(), ReplyOutcome::NoReply);

    let state = replies.states().load("V7").await.unwrap().unwrap().state;
    assert_eq!(state.status, MessageStatus::Pending);
    assert_eq!(state.voice_status, VoiceStatus::Idle);
    assert_eq!(state.original_query, "spoken question");
    assert_eq!(state.first_timestamp, BASE_MS);

    sleep_until(start + ms(5_000)).await;
    let retry = replies.handle_text("V7", "typed").await.unwrap();
    assert_eq!(retry, ReplyOutcome::Reply("spoken answer".to_string()));

    assert_eq!(transcriber.calls(), 1);
    assert_eq!(gateway.calls(), 1);
    assert_eq!(gateway.prompts(), vec!["spoken question".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_voice_deliveries_recognize_and_generate_once() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("one answer", ms(1_000));
    let transcriber = StubTranscriber::recognizing("one question", ms(500));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let (a, b) = tokio::join!(
        replies.handle_voice("V8", "media-8"),
        replies.handle_voice("V8", "media-8"),
    );
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|outcome| matches!(outcome, ReplyOutcome::NoReply));
    assert_eq!(
        outcomes,
        vec![
            ReplyOutcome::Reply("one answer".to_string()),
            ReplyOutcome::NoReply
        ]
    );

    assert_eq!(transcriber.calls(), 1);
    assert_eq!(gateway.calls(), 1);
    assert!(replies.states().load("V8").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_recognition_leaves_a_moved_lifecycle_alone() {
    let store = Arc::new(InMemoryKvStore::new());
    let gateway = StubGateway::replying("unused", ms(10));
    let transcriber = StubTranscriber::failing_after(ms(1_000));
    let replies = voice_coordinator(&store, &gateway, &transcriber);

    let voice = tokio::spawn({
        let replies = replies.clone();
        async move { replies.handle_voice("V9", "media-9").await }
    });
    tokio::time::sleep(ms(100)).await;

    let text_lifecycle = MessageState {
        status: MessageStatus::Pending,
        original_query: "typed elsewhere".to_string(),
        first_timestamp: BASE_MS,
        ..MessageState::new()
    };
    replies.states().save("V9", &text_lifecycle).await.unwrap();

    assert_eq!(
        voice.await.unwrap().unwrap(),
        ReplyOutcome::Reply(DEFAULT_VOICE_FAILURE_REPLY.to_string())
    );
    assert_eq!(
        replies.states().load("V9").await.unwrap().unwrap().state,
        text_lifecycle
    );
}
