use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatwire_protocol::{
    ConnectionState, ConvType, HistoryError, Identity, ModelId,
};
use chatwire_test_transport::{
    ServerFragment, TestHistorySource, TestTransport, history_record,
};
use serde_json::json;
use tokio::task::yield_now;
use tokio::time::sleep;

use super::*;
use crate::config::{SessionConfig, SessionConfigBuilder};
use crate::transcript::Role;

const INTERVAL: Duration = Duration::from_secs(57);

fn identity() -> Identity {
    Identity::new("alice", "secret").unwrap()
}

fn config() -> SessionConfig {
    SessionConfigBuilder::with_endpoint("wss://chat.test").build()
}

/// Lets the pump and session tasks catch up.
async fn settle() {
    for _ in 0..10 {
        yield_now().await;
    }
}

#[derive(Clone, Default)]
struct Recorder {
    transcript: Arc<Mutex<Vec<TranscriptEvent>>>,
    notices: Arc<Mutex<Vec<Notice>>>,
    phases: Arc<Mutex<Vec<Phase>>>,
}

impl Recorder {
    fn attach(&self, builder: SessionBuilder) -> SessionBuilder {
        let transcript = Arc::clone(&self.transcript);
        let notices = Arc::clone(&self.notices);
        let phases = Arc::clone(&self.phases);
        builder
            .on_transcript(move |event| transcript.lock().unwrap().push(event))
            .on_notice(move |notice| notices.lock().unwrap().push(notice))
            .on_phase(move |phase| phases.lock().unwrap().push(phase))
    }

    fn transcript(&self) -> Vec<TranscriptEvent> {
        self.transcript.lock().unwrap().clone()
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn phases(&self) -> Vec<Phase> {
        self.phases.lock().unwrap().clone()
    }
}

async fn connected_session(
    transport: &TestTransport,
    recorder: &Recorder,
) -> Session {
    transport.set_auto_open(true);
    let builder = SessionBuilder::new(config(), identity(), transport.clone());
    let session = recorder.attach(builder).build();
    settle().await;
    session
}

#[tokio::test]
async fn test_connects_eagerly() {
    let transport = TestTransport::default();
    let session =
        SessionBuilder::new(config(), identity(), transport.clone()).build();
    assert_eq!(transport.attempts(), 1);
    assert_eq!(transport.latest().unwrap().endpoint(), "wss://chat.test");

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Connecting);
    assert!(!snapshot.keepalive_active);

    transport.latest().unwrap().open();
    settle().await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Connected);
    assert_eq!(snapshot.connection, Some(transport.latest().unwrap().id()));
    assert!(snapshot.keepalive_active);
}

#[tokio::test]
async fn test_send_while_connected() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let conn = transport.latest().unwrap();

    let message = session
        .compose("Hello")
        .with_conv_type(ConvType::Qa)
        .with_model(ModelId::titan_text_express());
    let request_id = message.request_id().clone();
    let outcome = session.send(message).await.unwrap();
    let SendOutcome::Sent(id) = outcome else {
        panic!("expected the turn to be sent, got {outcome:?}");
    };

    let sent = conn.sent_json();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["user_id"], "alice");
    assert_eq!(sent[0]["request_id"], request_id.as_str());
    assert_eq!(sent[0]["type"], "text");
    assert_eq!(sent[0]["body"], "Hello");
    assert_eq!(sent[0]["conv_type"], "qa");
    assert_eq!(sent[0]["model_id"], "amazon.titan-text-express-v1");

    let snapshot = session.snapshot().await.unwrap();
    let entry = snapshot.transcript.get(id).unwrap();
    assert_eq!(entry.role(), Role::User);
    assert_eq!(entry.body(), "Hello");
    assert_eq!(entry.correlation_id(), &request_id);
    assert!(entry.is_settled());
    assert_eq!(
        recorder.transcript(),
        vec![
            TranscriptEvent::HistoryLoaded(vec![]),
            TranscriptEvent::Appended(entry.clone()),
        ]
    );
}

#[tokio::test]
async fn test_reply_is_reassembled() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let conn = transport.latest().unwrap();

    conn.deliver(&ServerFragment::new("1", "Hel"));
    conn.deliver(&ServerFragment::new("1", "lo"));
    conn.deliver_raw("not json");
    conn.deliver_json(&json!({ "msg": "no id" }));
    conn.deliver(&ServerFragment::new("2", "Hi"));
    settle().await;

    let snapshot = session.snapshot().await.unwrap();
    let entries: Vec<_> = snapshot
        .transcript
        .iter()
        .map(|m| (m.role(), m.body(), m.is_settled()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Role::Assistant, "Hello", true),
            (Role::Assistant, "Hi", false),
        ]
    );

    let appended = recorder
        .transcript()
        .into_iter()
        .filter(|e| matches!(e, TranscriptEvent::Appended(_)))
        .count();
    assert_eq!(appended, 2);
}

#[tokio::test]
async fn test_send_resets_reassembly() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let conn = transport.latest().unwrap();

    conn.deliver(&ServerFragment::new("1", "first"));
    settle().await;
    session.send_text("again").await.unwrap();
    conn.deliver(&ServerFragment::new("1", "second"));
    settle().await;

    let snapshot = session.snapshot().await.unwrap();
    let entries: Vec<_> = snapshot
        .transcript
        .iter()
        .map(|m| (m.role(), m.body(), m.is_settled()))
        .collect();
    assert_eq!(
        entries,
        vec![
            (Role::Assistant, "first", true),
            (Role::User, "again", true),
            (Role::Assistant, "second", false),
        ]
    );
}

#[tokio::test]
async fn test_send_while_disconnected_is_deferred() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let conn = transport.latest().unwrap();

    conn.close();
    settle().await;
    let before = session.snapshot().await.unwrap();
    assert_eq!(before.phase, Phase::Disconnected);
    assert!(!before.keepalive_active);
    transport.set_auto_open(false);

    let outcome = session.send_text("lost").await.unwrap();
    assert_eq!(outcome, SendOutcome::Deferred);
    assert!(conn.sent().is_empty());
    assert_eq!(transport.attempts(), 2);
    assert_eq!(recorder.notices(), vec![Notice::Reconnecting]);

    let after = session.snapshot().await.unwrap();
    assert_eq!(after.transcript, before.transcript);
    assert_eq!(after.phase, Phase::Connecting);
    assert_eq!(after.connect_attempts, 2);
    assert!(transport.latest().unwrap().sent().is_empty());
    assert_eq!(
        recorder.phases(),
        vec![Phase::Connected, Phase::Disconnected, Phase::Connecting]
    );
}

#[tokio::test]
async fn test_send_with_close_in_flight_is_deferred() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let conn = transport.latest().unwrap();

    // The close event has not reached the session yet.
    conn.close();
    let outcome = session.send_text("lost").await.unwrap();
    assert_eq!(outcome, SendOutcome::Deferred);
    assert_eq!(transport.attempts(), 2);
    settle().await;

    // The stale close must not knock the new connection down.
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Connected);
    assert_eq!(snapshot.connection, Some(transport.latest().unwrap().id()));
    assert!(snapshot.transcript.is_empty());
}

#[tokio::test]
async fn test_superseded_connection_is_ignored() {
    let transport = TestTransport::default();
    let session =
        SessionBuilder::new(config(), identity(), transport.clone()).build();
    let first = transport.connection(0).unwrap();
    settle().await;

    // Sending while the handshake is pending supersedes it.
    assert_eq!(session.send_text("hi").await.unwrap(), SendOutcome::Deferred);
    assert!(first.close_requested());
    let second = transport.connection(1).unwrap();

    first.open();
    first.deliver(&ServerFragment::new("1", "ghost"));
    settle().await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Connecting);
    assert!(snapshot.transcript.is_empty());

    second.open();
    second.deliver(&ServerFragment::new("2", "real"));
    settle().await;
    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, Phase::Connected);
    let bodies: Vec<_> = snapshot.transcript.iter().map(|m| m.body()).collect();
    assert_eq!(bodies, vec!["real"]);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_follows_connection() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;
    let first = transport.connection(0).unwrap();

    sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(first.probes(), 1);

    first.close();
    settle().await;
    assert!(!session.snapshot().await.unwrap().keepalive_active);
    sleep(INTERVAL * 3).await;
    assert_eq!(first.probes(), 1);

    assert_eq!(session.send_text("hi").await.unwrap(), SendOutcome::Deferred);
    settle().await;
    let second = transport.connection(1).unwrap();
    assert_eq!(second.state(), ConnectionState::Open);
    assert!(session.snapshot().await.unwrap().keepalive_active);

    sleep(INTERVAL + Duration::from_secs(1)).await;
    assert_eq!(first.probes(), 1);
    assert_eq!(second.probes(), 1);
}

#[tokio::test]
async fn test_history_comes_before_live() {
    let transport = TestTransport::default();
    transport.set_auto_open(true);
    let source = TestHistorySource::with_records(vec![history_record(
        "2024-08-01T09:30:00Z",
        "a",
        "hi",
        None,
    )]);
    let session = SessionBuilder::new(config(), identity(), transport.clone())
        .with_history_source(source.clone())
        .build();
    settle().await;

    transport
        .latest()
        .unwrap()
        .deliver(&ServerFragment::new("b", "yo"));
    settle().await;

    let snapshot = session.snapshot().await.unwrap();
    let entries: Vec<_> = snapshot
        .transcript
        .iter()
        .map(|m| (m.correlation_id().as_str(), m.role(), m.body()))
        .collect();
    assert_eq!(
        entries,
        vec![("a", Role::User, "hi"), ("b", Role::Assistant, "yo")]
    );
    assert_eq!(source.fetches(), 1);
    assert_eq!(source.queries()[0].user_id, "alice");
    assert_eq!(source.queries()[0].allow_time, "2024-07-28T00:00:00Z");
}

#[tokio::test(start_paused = true)]
async fn test_late_history_goes_first() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    transport.set_auto_open(true);
    let mut source = TestHistorySource::with_records(vec![history_record(
        "2024-08-01T09:30:00Z",
        "a",
        "hi",
        Some("hello"),
    )]);
    source.set_delay(Duration::from_secs(5));
    let builder = SessionBuilder::new(config(), identity(), transport.clone())
        .with_history_source(source);
    let session = recorder.attach(builder).build();
    settle().await;

    transport
        .latest()
        .unwrap()
        .deliver(&ServerFragment::new("b", "yo"));
    settle().await;
    assert!(!session.snapshot().await.unwrap().transcript.history_loaded());

    sleep(Duration::from_secs(6)).await;
    let snapshot = session.snapshot().await.unwrap();
    let bodies: Vec<_> = snapshot.transcript.iter().map(|m| m.body()).collect();
    assert_eq!(bodies, vec!["hi", "hello", "yo"]);

    let events = recorder.transcript();
    assert!(matches!(events[0], TranscriptEvent::Appended(_)));
    assert!(matches!(
        &events[1],
        TranscriptEvent::HistoryLoaded(history) if history.len() == 2
    ));
}

#[tokio::test]
async fn test_history_failure_is_reported() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    transport.set_auto_open(true);
    let source = TestHistorySource::failing(
        HistoryError::status().with_reason("HTTP 502"),
    );
    let builder = SessionBuilder::new(config(), identity(), transport.clone())
        .with_history_source(source);
    let session = recorder.attach(builder).build();
    settle().await;

    let snapshot = session.snapshot().await.unwrap();
    assert!(snapshot.transcript.history_loaded());
    assert!(snapshot.transcript.is_empty());
    assert_eq!(snapshot.phase, Phase::Connected);
    assert!(matches!(
        recorder.notices().as_slice(),
        [Notice::HistoryUnavailable(reason)] if reason.contains("HTTP 502")
    ));
    assert_eq!(
        recorder.transcript(),
        vec![TranscriptEvent::HistoryLoaded(vec![])]
    );
}

#[tokio::test]
async fn test_close_stops_session() {
    let transport = TestTransport::default();
    let recorder = Recorder::default();
    let session = connected_session(&transport, &recorder).await;

    session.close();
    settle().await;
    assert!(transport.latest().unwrap().close_requested());
    assert!(session.snapshot().await.is_err());
    assert!(session.send_text("hi").await.is_err());
}
