//! End-to-end tests for the monitoring session.
//!
//! A real WebSocket server plays the coordinator and a recording fake plays
//! the media engine, so the full offer/answer/ICE exchange and the session
//! state machine run exactly as in production.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::sync::Arc;

use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use common::{unreachable_url, FakeCamera, FakeFactory, TestCoordinator, WAIT_TIMEOUT};
use drivewatch_client::{
    ClientConfig, ClientError, JsonlSummaryStore, MemorySummaryStore, MonitoringSession,
    PeerEvent, PeerSessionController, SessionSnapshot, SummaryStore, TRANSPORT_CLOSED_MESSAGE,
};
use drivewatch_core::{ConnectionState, SessionState, TransportStatus};
use drivewatch_protocol::{IceCandidatePayload, SignalingMessage};

// ============================================================================
// Test Helpers
// ============================================================================

fn build_session(url: &str, factory: &Arc<FakeFactory>) -> MonitoringSession {
    let config = ClientConfig {
        signaling_url: url.to_string(),
        ..Default::default()
    };
    let mut controller = PeerSessionController::new(config, factory.clone());
    controller.set_media_source(Some(Arc::new(FakeCamera)));
    MonitoringSession::new(controller)
}

/// Feeds queued inputs into the session until `done` holds.
async fn pump_until<F>(session: &mut MonitoringSession, done: F)
where
    F: Fn(&MonitoringSession) -> bool,
{
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !done(session) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let input = timeout(remaining, session.controller_mut().next_input())
            .await
            .expect("timed out waiting for session input")
            .expect("input queue closed");
        session.handle_input(input).await;
    }
}

/// Drives a session from idle to active through the full exchange.
async fn activate(
    session: &mut MonitoringSession,
    coordinator: &mut TestCoordinator,
    factory: &FakeFactory,
) {
    session.start().await.expect("start");
    assert_eq!(session.state(), SessionState::Starting);

    assert_eq!(
        coordinator.recv().await,
        Some(SignalingMessage::offer("v=0 fake-offer"))
    );
    coordinator.send(&SignalingMessage::welcome("abc", "2025-01-15T10:00:00+00:00"));
    coordinator.send(&SignalingMessage::answer("v=0 fake-answer"));

    pump_until(session, |s| {
        s.controller().client_id() == Some("abc")
            && factory.peer.calls().iter().any(|c| c == "set_remote:v=0 fake-answer")
    })
    .await;
    assert_eq!(session.state(), SessionState::Starting);

    factory
        .events()
        .send(PeerEvent::ConnectionStateChanged(ConnectionState::Connected));
    pump_until(session, |s| s.state() == SessionState::Active).await;
}

fn no_face_frame() -> PeerEvent {
    PeerEvent::DataMessage(r#"{"face_detected": false}"#.to_string())
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_full_session_lifecycle() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let store = Arc::new(MemorySummaryStore::new());
    let mut session = build_session(&coordinator.url, &factory).with_store(store.clone());

    activate(&mut session, &mut coordinator, &factory).await;

    // Negotiation ran in order with the default ICE servers and a send-only offer
    assert_eq!(
        factory.peer.calls(),
        vec![
            "add_track:video-0:camera-0",
            "create_offer",
            "set_local:offer",
            "set_remote:v=0 fake-answer",
        ]
    );
    let options = (*factory.peer.offer_options.lock().unwrap()).expect("offer created");
    assert!(!options.offer_to_receive_audio && !options.offer_to_receive_video);
    assert_eq!(factory.configs.lock().unwrap().len(), 1);
    assert_eq!(factory.configs.lock().unwrap()[0].ice_servers.len(), 2);

    // Two no-face frames inside the 10s cooldown fire once
    let events = factory.events();
    events.send(no_face_frame());
    events.send(no_face_frame());
    pump_until(&mut session, |s| {
        s.alerts().firing("no_face").is_some() && s.latest_frame().is_some()
    })
    .await;
    session.drain_inputs().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].id.as_str(), "no_face");
    assert_eq!(session.alerts().firing("no_face").map(|f| f.count), Some(1));
    assert_eq!(snapshot.client_id.as_deref(), Some("abc"));

    // Local candidates are trickled; end-of-candidates sends nothing
    let candidate = IceCandidatePayload::new(
        "candidate:1 1 udp 1 10.0.0.2 5000 typ host",
        Some("0".to_string()),
        Some(0),
    );
    events.send(PeerEvent::IceCandidate(Some(candidate.clone())));
    events.send(PeerEvent::IceCandidate(None));
    session.drain_inputs().await;
    assert_eq!(
        coordinator.recv().await,
        Some(SignalingMessage::ice_candidate(candidate))
    );

    // Stop tears everything down and returns to idle
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.latest_frame().is_none());
    let snapshot = session.snapshot();
    assert_eq!(snapshot.connection_state, ConnectionState::Closed);
    assert_eq!(snapshot.transport_status, TransportStatus::Closed);
    assert!(snapshot.client_id.is_none());
    coordinator.wait_closed().await;
    assert!(factory.peer.calls().contains(&"close".to_string()));

    let summaries = store.load_all().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].client_id.as_deref(), Some("abc"));
    assert_eq!(summaries[0].frames_received, 2);
    assert_eq!(summaries[0].alert_counts.get("no_face"), Some(&1));
    assert!(summaries[0].error.is_none());
}

#[tokio::test]
async fn test_connection_failure_returns_to_idle() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&coordinator.url, &factory);

    activate(&mut session, &mut coordinator, &factory).await;
    factory.events().send(no_face_frame());
    pump_until(&mut session, |s| s.latest_frame().is_some()).await;

    factory
        .events()
        .send(PeerEvent::ConnectionStateChanged(ConnectionState::Failed));
    pump_until(&mut session, |s| s.state() == SessionState::Idle).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some("WebRTC connection failed"));
    assert_eq!(snapshot.connection_state, ConnectionState::Failed);
    assert!(snapshot.latest_frame.is_none());
    coordinator.wait_closed().await;
}

#[tokio::test]
async fn test_server_close_while_starting_returns_to_idle() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&coordinator.url, &factory);

    session.start().await.expect("start");
    coordinator.recv().await.expect("offer");
    coordinator.close();

    pump_until(&mut session, |s| s.state() == SessionState::Idle).await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.error.as_deref(), Some(TRANSPORT_CLOSED_MESSAGE));
    assert_eq!(snapshot.connection_state, ConnectionState::Failed);
    assert_eq!(snapshot.transport_status, TransportStatus::Closed);
    assert!(factory.peer.calls().contains(&"close".to_string()));

    // Idle again, so a new start is attempted (the coordinator is gone)
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_server_close_while_active_saves_failed_summary() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let store = Arc::new(MemorySummaryStore::new());
    let mut session = build_session(&coordinator.url, &factory).with_store(store.clone());

    activate(&mut session, &mut coordinator, &factory).await;
    coordinator.close();
    pump_until(&mut session, |s| s.state() == SessionState::Idle).await;

    let summaries = store.load_all().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].error.as_deref(), Some(TRANSPORT_CLOSED_MESSAGE));

    // The closed peer connection's late reports are inert
    factory
        .events()
        .send(PeerEvent::ConnectionStateChanged(ConnectionState::Closed));
    session.drain_inputs().await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.snapshot().error.as_deref(), Some(TRANSPORT_CLOSED_MESSAGE));
}

#[tokio::test]
async fn test_server_error_is_surfaced() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&coordinator.url, &factory);

    session.start().await.expect("start");
    coordinator.recv().await.expect("offer");
    coordinator.send(&SignalingMessage::error("No inference workers available"));

    pump_until(&mut session, |s| s.controller().error().is_some()).await;
    assert_eq!(
        session.snapshot().error.as_deref(),
        Some("No inference workers available")
    );
    assert_eq!(session.state(), SessionState::Starting);
}

#[tokio::test]
async fn test_start_with_unreachable_server() {
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&unreachable_url().await, &factory);

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(session.state(), SessionState::Idle);
    let snapshot = session.snapshot();
    assert!(snapshot.error.unwrap().starts_with("Connection error:"));
    assert_eq!(snapshot.connection_state, ConnectionState::Failed);
    assert_eq!(snapshot.transport_status, TransportStatus::Closed);
    assert!(factory.configs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_start_when_peer_creation_fails() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::failing());
    let mut session = build_session(&coordinator.url, &factory);

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, ClientError::Negotiation(_)));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.snapshot().transport_status, TransportStatus::Closed);
    coordinator.wait_closed().await;
}

#[tokio::test]
async fn test_late_events_after_stop_are_ignored() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&coordinator.url, &factory);

    activate(&mut session, &mut coordinator, &factory).await;
    let stale = factory.events();
    session.stop();

    stale.send(PeerEvent::ConnectionStateChanged(ConnectionState::Connected));
    stale.send(no_face_frame());
    session.drain_inputs().await;

    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.latest_frame().is_none());
    assert_eq!(session.controller().connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_cleanup_twice_matches_cleanup_once() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let mut session = build_session(&coordinator.url, &factory);
    activate(&mut session, &mut coordinator, &factory).await;

    session.controller_mut().cleanup();
    let once = session.snapshot();
    session.controller_mut().cleanup();
    let twice = session.snapshot();

    assert_eq!(once, twice);
    let closes = factory.peer.calls().iter().filter(|c| *c == "close").count();
    assert_eq!(closes, 1);
}

// ============================================================================
// Driver Loop Tests
// ============================================================================

async fn wait_for_snapshot<F>(rx: &mut tokio::sync::watch::Receiver<SessionSnapshot>, done: F)
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    timeout(WAIT_TIMEOUT, rx.wait_for(done))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session loop alive");
}

#[tokio::test]
async fn test_driver_loop_end_to_end() {
    let mut coordinator = TestCoordinator::spawn().await;
    let factory = Arc::new(FakeFactory::default());
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlSummaryStore::new(dir.path().join("sessions.jsonl")));
    let session = build_session(&coordinator.url, &factory).with_store(store.clone());

    let cancel_token = CancellationToken::new();
    let handle = session.spawn(cancel_token.clone());
    let mut snapshots = handle.watch();

    handle.start().unwrap();
    assert_eq!(
        coordinator.recv().await,
        Some(SignalingMessage::offer("v=0 fake-offer"))
    );
    coordinator.send(&SignalingMessage::welcome("abc", "2025-01-15T10:00:00+00:00"));
    coordinator.send(&SignalingMessage::answer("v=0 fake-answer"));
    wait_for_snapshot(&mut snapshots, |s| s.client_id.as_deref() == Some("abc")).await;

    factory
        .events()
        .send(PeerEvent::ConnectionStateChanged(ConnectionState::Connected));
    wait_for_snapshot(&mut snapshots, |s| s.session_state == SessionState::Active).await;

    factory.events().send(no_face_frame());
    wait_for_snapshot(&mut snapshots, |s| !s.alerts.is_empty()).await;
    assert_eq!(handle.snapshot().alerts[0].message, "No face detected");

    handle.stop().unwrap();
    wait_for_snapshot(&mut snapshots, |s| s.session_state == SessionState::Idle).await;
    coordinator.wait_closed().await;

    cancel_token.cancel();
    let summaries = store.load_all().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].client_id.as_deref(), Some("abc"));
}
