//! End-to-End-Abläufe zweier (oder dreier) Clients über den In-Process-Bus

use super::engine::{CallEngine, CallEvent, Collaborators};
use super::error::CallError;
use super::session::{CallDirection, CallState, RingCue};
use crate::config::CallConfig;
use crate::database::{Database, Profile, StoredCall};
use crate::media::fake::FakeMediaAdapter;
use crate::media::{CameraFacing, TrackKind};
use crate::signaling::{
    CallId, CallStatus, CallType, JoinFault, LocalBus, SignalingMessage, SignalingTransport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;

struct Client {
    engine: CallEngine,
    media: Arc<FakeMediaAdapter>,
}

struct Harness {
    bus: LocalBus,
    db: Arc<Database>,
}

impl Harness {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        db.upsert_profile(&Profile::new("alice", "Alice")).unwrap();
        db.upsert_profile(&Profile::new("bob", "Bob")).unwrap();
        Self {
            bus: LocalBus::new(),
            db: Arc::new(db),
        }
    }

    async fn client(&self, id: &str) -> Client {
        self.client_with(id, CallConfig::default()).await
    }

    async fn client_with(&self, id: &str, config: CallConfig) -> Client {
        let media = Arc::new(FakeMediaAdapter::new());
        let collaborators = Collaborators {
            transport: Arc::new(self.bus.clone()),
            media: media.clone(),
            call_log: self.db.clone(),
            profiles: self.db.clone(),
        };
        let engine = CallEngine::start(id, config, collaborators).await.unwrap();
        Client { engine, media }
    }

    /// Einträge, die `caller` selbst geschrieben hat
    fn calls_by(&self, caller: &str) -> Vec<StoredCall> {
        self.db
            .calls_for_user(caller)
            .unwrap()
            .into_iter()
            .filter(|c| c.caller_id == caller)
            .collect()
    }

    fn chat(&self, a: &str, b: &str) -> Vec<String> {
        self.db
            .chat_history(a, b)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    /// Schickt eine rohe Nachricht auf den Eingangskanal von `user`
    async fn inject(&self, user: &str, message: &SignalingMessage) {
        let channel = self.bus.join(&format!("calls:{user}"));
        channel
            .link
            .broadcast(message.to_json().unwrap())
            .await
            .unwrap();
        channel.link.unsubscribe();
    }

    fn end_calls_to(&self, user: &str) -> Vec<SignalingMessage> {
        self.bus
            .published_messages(&format!("calls:{user}"))
            .into_iter()
            .filter(|m| matches!(m, SignalingMessage::EndCall(_)))
            .collect()
    }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let outcome = tokio::time::timeout(Duration::from_secs(300), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for {what}");
}

async fn wait_for_state(client: &Client, state: CallState) {
    let what = format!("{} to reach {:?}", client.engine.self_id(), state);
    eventually(&what, || client.engine.state() == state).await;
}

/// Lässt Nachrichten zustellen und Einmal-Kanäle auslaufen
async fn settle() {
    sleep(Duration::from_secs(2)).await;
}

async fn next_call_ended(
    events: &mut broadcast::Receiver<CallEvent>,
) -> (Option<CallStatus>, Option<CallError>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(300), events.recv())
            .await
            .expect("no CallEnded event")
            .expect("event channel closed");
        if let CallEvent::CallEnded { status, reason, .. } = event {
            return (status, reason);
        }
    }
}

/// alice ruft bob an, bob nimmt an
async fn connected_pair(h: &Harness) -> (Client, Client) {
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    bob.engine.accept_call().await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    (alice, bob)
}

// ============================================================================
// HAPPY PATH
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_completed_call_is_logged_once_by_caller() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;
    let mut bob_events = bob.engine.subscribe();

    let call_id = alice.engine.start_call("bob", None).await.unwrap();
    let snapshot = alice.engine.snapshot();
    assert_eq!(snapshot.state, CallState::Calling);
    assert_eq!(snapshot.ring_cue, RingCue::Ringback);
    assert_eq!(snapshot.call_type, Some(CallType::Video));

    wait_for_state(&bob, CallState::Incoming).await;
    let ringing = bob.engine.snapshot();
    assert_eq!(ringing.call_id, Some(call_id));
    assert_eq!(ringing.peer_id.as_deref(), Some("alice"));
    assert_eq!(ringing.direction, Some(CallDirection::Callee));
    assert_eq!(ringing.ring_cue, RingCue::Ringtone);
    // Vor dem Annehmen keine Geräte
    assert_eq!(bob.media.media_acquired(), 0);

    let incoming = loop {
        match bob_events.recv().await.unwrap() {
            CallEvent::IncomingCall {
                peer_id, profile, ..
            } => break (peer_id, profile),
            _ => continue,
        }
    };
    assert_eq!(incoming.0, "alice");
    assert_eq!(incoming.1.map(|p| p.display_name), Some("Alice".to_string()));

    bob.engine.accept_call().await.unwrap();
    assert_eq!(bob.engine.state(), CallState::Active);
    wait_for_state(&alice, CallState::Active).await;
    settle().await;

    // Je ein Candidate in jede Richtung, bobs erst nach dem Offer angewendet
    assert_eq!(alice.media.applied_candidates().len(), 1);
    assert_eq!(bob.media.applied_candidates().len(), 1);
    assert_eq!(alice.media.remote_descriptions().len(), 1);

    alice.engine.end_call().await.unwrap();
    assert_eq!(alice.engine.state(), CallState::Idle);
    wait_for_state(&bob, CallState::Idle).await;
    settle().await;

    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Completed);
    assert_eq!(calls[0].receiver_id, "bob");
    assert_eq!(calls[0].call_type, CallType::Video);
    assert!(h.calls_by("bob").is_empty());
    assert_eq!(h.chat("alice", "bob"), vec!["🎥 Video Call".to_string()]);

    for client in [&alice, &bob] {
        assert_eq!(client.media.live_sessions(), 0);
        assert_eq!(client.media.live_media(), 0);
    }
    // Nur noch die Eingangskanäle
    assert_eq!(h.bus.subscriber_count("calls:alice"), 1);
    assert_eq!(h.bus.subscriber_count("calls:bob"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_callee_hangup_is_logged_by_caller() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;
    let mut alice_events = alice.engine.subscribe();

    bob.engine.end_call().await.unwrap();
    wait_for_state(&alice, CallState::Idle).await;

    let (status, reason) = next_call_ended(&mut alice_events).await;
    assert_eq!(status, Some(CallStatus::Completed));
    assert_eq!(reason, Some(CallError::RemoteHangup("bob".to_string())));

    settle().await;
    assert_eq!(h.calls_by("alice").len(), 1);
    assert!(h.calls_by("bob").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_audio_call_acquires_no_camera() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice
        .engine
        .start_call("bob", Some(CallType::Audio))
        .await
        .unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    let snapshot = bob.engine.snapshot();
    assert_eq!(snapshot.call_type, Some(CallType::Audio));
    assert!(!snapshot.video_enabled);

    bob.engine.accept_call().await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    alice.engine.end_call().await.unwrap();
    settle().await;

    assert_eq!(h.chat("alice", "bob"), vec!["📞 Audio Call".to_string()]);
}

// ============================================================================
// SUBSCRIBE FAILURES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_subscription_times_out() {
    let h = Harness::new();
    h.bus.inject_join_fault("calls:bob", JoinFault::NeverConfirm);
    let alice = h.client("alice").await;
    let mut events = alice.engine.subscribe();

    let result = alice.engine.start_call("bob", None).await;
    assert!(matches!(result, Err(CallError::SignalingTimeout(_))));
    assert_eq!(alice.engine.state(), CallState::Idle);

    let (status, reason) = next_call_ended(&mut events).await;
    assert_eq!(status, None);
    assert!(matches!(reason, Some(CallError::SignalingTimeout(_))));

    assert!(h.bus.published("calls:bob").is_empty());
    assert_eq!(alice.media.media_acquired(), 0);
    assert!(h.calls_by("alice").is_empty());
    assert_eq!(h.bus.subscriber_count("calls:bob"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_subscription_is_channel_error() {
    let h = Harness::new();
    h.bus
        .inject_join_fault("calls:bob", JoinFault::Reject("CHANNEL_ERROR".to_string()));
    let alice = h.client("alice").await;

    let result = alice.engine.start_call("bob", None).await;
    assert!(matches!(result, Err(CallError::SignalingChannel(_))));
    assert_eq!(alice.engine.state(), CallState::Idle);
    assert_eq!(alice.media.media_acquired(), 0);
    assert!(h.calls_by("alice").is_empty());
}

// ============================================================================
// BUSY & GLARE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_third_caller_gets_busy() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let carol = h.client("carol").await;
    let mut carol_events = carol.engine.subscribe();

    alice.engine.start_call("bob", None).await.unwrap();
    let carol_call = carol.engine.start_call("alice", None).await.unwrap();
    wait_for_state(&carol, CallState::Idle).await;

    let (status, reason) = next_call_ended(&mut carol_events).await;
    assert_eq!(status, Some(CallStatus::Busy));
    assert_eq!(reason, Some(CallError::PeerBusy("alice".to_string())));

    let replies = h.end_calls_to("carol");
    assert_eq!(replies.len(), 1);
    match &replies[0] {
        SignalingMessage::EndCall(p) => {
            assert_eq!(p.from, "alice");
            assert_eq!(p.call_id, Some(carol_call));
            assert_eq!(p.status, Some(CallStatus::Busy));
        }
        other => panic!("unexpected {other:?}"),
    }

    // alice bleibt bei bob
    let snapshot = alice.engine.snapshot();
    assert_eq!(snapshot.state, CallState::Calling);
    assert_eq!(snapshot.peer_id.as_deref(), Some("bob"));

    settle().await;
    let carol_calls = h.calls_by("carol");
    assert_eq!(carol_calls.len(), 1);
    assert_eq!(carol_calls[0].status, CallStatus::Busy);
    assert!(h.chat("carol", "alice").is_empty());
    assert!(h.calls_by("alice").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_crossing_offer_is_answered_busy() {
    let h = Harness::new();
    let alice = h.client("alice").await;

    alice.engine.start_call("bob", None).await.unwrap();
    let probe = CallId::new();
    let offer = SignalingMessage::offer(
        "bob",
        "alice",
        probe,
        crate::media::SessionDescription::offer("v=0\r\n"),
        CallType::Video,
    );
    h.inject("alice", &offer).await;
    settle().await;

    let replies = h.end_calls_to("bob");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].call_id(), Some(probe));
    assert_eq!(alice.engine.state(), CallState::Calling);
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_offer_is_ignored() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;

    let offer = h
        .bus
        .published_messages("calls:bob")
        .into_iter()
        .find(|m| matches!(m, SignalingMessage::Offer(_)))
        .unwrap();
    h.inject("bob", &offer).await;
    settle().await;

    assert_eq!(bob.engine.state(), CallState::Incoming);
    assert!(h.end_calls_to("alice").is_empty());
    assert_eq!(alice.engine.state(), CallState::Calling);
}

// ============================================================================
// MISSED CALLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_callee_timer_first_logs_one_missed_call() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h
        .client_with(
            "bob",
            CallConfig::default().with_missed_call_timeout(Duration::from_secs(30)),
        )
        .await;

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    wait_for_state(&bob, CallState::Idle).await;
    wait_for_state(&alice, CallState::Idle).await;

    // Auch alices eigener Timer darf nichts mehr auslösen
    sleep(Duration::from_secs(60)).await;

    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Missed);
    assert!(h.calls_by("bob").is_empty());
    assert_eq!(h.chat("alice", "bob"), vec!["🎥 Missed Video Call".to_string()]);
    assert_eq!(alice.media.live_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_timer_first_logs_one_missed_call() {
    let h = Harness::new();
    let alice = h
        .client_with(
            "alice",
            CallConfig::default().with_missed_call_timeout(Duration::from_secs(30)),
        )
        .await;
    let bob = h.client("bob").await;
    let mut bob_events = bob.engine.subscribe();

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    wait_for_state(&alice, CallState::Idle).await;
    wait_for_state(&bob, CallState::Idle).await;

    let (status, _) = next_call_ended(&mut bob_events).await;
    assert_eq!(status, Some(CallStatus::Missed));

    sleep(Duration::from_secs(60)).await;

    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Missed);
    assert!(h.calls_by("bob").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timer_after_answer_is_ignored() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;

    sleep(Duration::from_secs(120)).await;

    assert_eq!(alice.engine.state(), CallState::Active);
    assert_eq!(bob.engine.state(), CallState::Active);
    assert!(h.end_calls_to("alice").is_empty());
    assert!(h.end_calls_to("bob").is_empty());
    assert!(h.calls_by("alice").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_caller_hangs_up_while_ringing() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    alice.engine.end_call().await.unwrap();
    wait_for_state(&bob, CallState::Idle).await;
    settle().await;

    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Missed);
    assert!(h.calls_by("bob").is_empty());
    assert_eq!(bob.media.media_acquired(), 0);
}

// ============================================================================
// REJECT & END
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_call_is_declined_in_chat() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;
    let mut alice_events = alice.engine.subscribe();

    alice
        .engine
        .start_call("bob", Some(CallType::Audio))
        .await
        .unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    bob.engine.reject_call().await.unwrap();
    assert_eq!(bob.engine.state(), CallState::Idle);
    wait_for_state(&alice, CallState::Idle).await;

    let (status, reason) = next_call_ended(&mut alice_events).await;
    assert_eq!(status, Some(CallStatus::Rejected));
    assert_eq!(reason, Some(CallError::RemoteHangup("bob".to_string())));

    settle().await;
    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Rejected);
    assert_eq!(h.chat("alice", "bob"), vec!["📞 Call Declined".to_string()]);
    assert!(h.calls_by("bob").is_empty());
    // Einmal-Kanal ist nach der Gnadenfrist wieder weg
    assert_eq!(h.bus.subscriber_count("calls:alice"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_simultaneous_hangup_logs_once() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;

    let (a, b) = tokio::join!(alice.engine.end_call(), bob.engine.end_call());
    assert!(a.is_ok());
    assert!(b.is_ok());
    wait_for_state(&alice, CallState::Idle).await;
    wait_for_state(&bob, CallState::Idle).await;
    settle().await;

    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Completed);
    assert!(h.calls_by("bob").is_empty());

    // Nochmal auflegen ist ein No-op
    assert!(alice.engine.end_call().await.is_ok());
    assert_eq!(h.calls_by("alice").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_end_call_is_ignored() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;

    let stale = SignalingMessage::end_call(
        "alice",
        "bob",
        Some(CallId::new()),
        CallStatus::Completed,
    );
    h.inject("bob", &stale).await;
    let stranger = SignalingMessage::end_call("mallory", "bob", None, CallStatus::Completed);
    h.inject("bob", &stranger).await;
    settle().await;

    assert_eq!(bob.engine.state(), CallState::Active);
    assert_eq!(alice.engine.state(), CallState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_running_call() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;

    alice.engine.shutdown().await;
    wait_for_state(&bob, CallState::Idle).await;
    settle().await;

    assert_eq!(h.calls_by("alice").len(), 1);
    assert_eq!(h.bus.subscriber_count("calls:alice"), 0);
    assert_eq!(
        alice.engine.start_call("bob", None).await,
        Err(CallError::EngineStopped)
    );
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_caller_media_denied() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    alice.media.deny_media();

    let result = alice.engine.start_call("bob", None).await;
    assert!(matches!(result, Err(CallError::MediaAccessDenied(_))));
    assert_eq!(alice.engine.state(), CallState::Idle);

    // Kein Offer, Ausgangskanal geschlossen, als verpasst protokolliert
    assert!(h.bus.published("calls:bob").is_empty());
    assert_eq!(h.bus.subscriber_count("calls:bob"), 0);
    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Missed);
}

#[tokio::test(start_paused = true)]
async fn test_callee_answer_failure_notifies_caller() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;
    bob.media.fail_answer();

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;

    let result = bob.engine.accept_call().await;
    assert!(matches!(result, Err(CallError::NegotiationFailure(_))));
    assert_eq!(bob.engine.state(), CallState::Idle);
    wait_for_state(&alice, CallState::Idle).await;
    settle().await;

    assert_eq!(bob.media.live_sessions(), 0);
    assert_eq!(bob.media.live_media(), 0);
    let calls = h.calls_by("alice");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, CallStatus::Missed);
}

#[tokio::test(start_paused = true)]
async fn test_callee_media_denied_notifies_caller() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;
    bob.media.deny_media();

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;

    let result = bob.engine.accept_call().await;
    assert!(matches!(result, Err(CallError::MediaAccessDenied(_))));
    wait_for_state(&alice, CallState::Idle).await;
}

#[tokio::test(start_paused = true)]
async fn test_command_guards() {
    let h = Harness::new();
    let alice = h.client("alice").await;

    assert_eq!(
        alice.engine.start_call("alice", None).await,
        Err(CallError::InvalidPeer("alice".to_string()))
    );
    assert!(matches!(
        alice.engine.start_call("   ", None).await,
        Err(CallError::InvalidPeer(_))
    ));
    assert_eq!(alice.engine.accept_call().await, Err(CallError::NoIncomingCall));
    assert_eq!(alice.engine.reject_call().await, Err(CallError::NoIncomingCall));
    assert_eq!(alice.engine.toggle_audio().await, Err(CallError::NoActiveCall));
    assert_eq!(alice.engine.switch_camera().await, Err(CallError::NoActiveCall));
    assert!(alice.engine.end_call().await.is_ok());

    alice.engine.start_call("bob", None).await.unwrap();
    assert_eq!(
        alice.engine.start_call("carol", None).await,
        Err(CallError::AlreadyInCall)
    );
    assert_eq!(alice.engine.accept_call().await, Err(CallError::NoIncomingCall));
}

// ============================================================================
// ICE & PROFILES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_early_candidates_are_buffered_until_offer_applied() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    let call_id = alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;

    let early = SignalingMessage::ice_candidate(
        "alice",
        "bob",
        Some(call_id),
        crate::media::IceCandidate {
            candidate: "candidate:early 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            ..Default::default()
        },
    );
    h.inject("bob", &early).await;
    let foreign = SignalingMessage::ice_candidate(
        "mallory",
        "bob",
        None,
        crate::media::IceCandidate {
            candidate: "candidate:foreign 1 udp 1 10.0.0.2 5000 typ host".to_string(),
            ..Default::default()
        },
    );
    h.inject("bob", &foreign).await;
    settle().await;

    assert!(bob.media.applied_candidates().is_empty());

    bob.engine.accept_call().await.unwrap();
    let applied: Vec<String> = bob
        .media
        .applied_candidates()
        .into_iter()
        .map(|c| c.candidate)
        .collect();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().any(|c| c.starts_with("candidate:early")));
    assert!(!applied.iter().any(|c| c.starts_with("candidate:foreign")));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_caller_rings_without_profile() {
    let h = Harness::new();
    let carol = h.client("carol").await;
    let bob = h.client("bob").await;
    let mut bob_events = bob.engine.subscribe();

    carol.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;

    let profile = loop {
        if let CallEvent::IncomingCall { profile, .. } = bob_events.recv().await.unwrap() {
            break profile;
        }
    };
    assert!(profile.is_none());
    assert!(bob.engine.snapshot().peer_profile.is_none());
}

// ============================================================================
// IN-CALL CONTROLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_toggles_stay_local() {
    let h = Harness::new();
    let (alice, bob) = connected_pair(&h).await;
    settle().await;
    let to_bob = h.bus.published("calls:bob").len();
    let to_alice = h.bus.published("calls:alice").len();

    assert_eq!(alice.engine.toggle_audio().await, Ok(false));
    assert_eq!(alice.engine.toggle_video().await, Ok(false));
    assert_eq!(alice.engine.toggle_audio().await, Ok(true));
    settle().await;

    let snapshot = alice.engine.snapshot();
    assert!(snapshot.audio_enabled);
    assert!(!snapshot.video_enabled);
    assert_eq!(
        alice.media.toggles(),
        vec![
            (TrackKind::Audio, false),
            (TrackKind::Video, false),
            (TrackKind::Audio, true)
        ]
    );

    assert_eq!(h.bus.published("calls:bob").len(), to_bob);
    assert_eq!(h.bus.published("calls:alice").len(), to_alice);
    assert!(bob.engine.snapshot().video_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_mute_while_ringing_applies_on_accept() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice.engine.start_call("bob", None).await.unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    assert_eq!(bob.engine.toggle_audio().await, Ok(false));
    assert!(bob.media.toggles().is_empty());

    bob.engine.accept_call().await.unwrap();
    assert_eq!(bob.media.toggles(), vec![(TrackKind::Audio, false)]);
    assert!(!bob.engine.snapshot().audio_enabled);
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera() {
    let h = Harness::new();
    let (alice, _bob) = connected_pair(&h).await;

    assert_eq!(
        alice.engine.switch_camera().await,
        Ok(CameraFacing::Environment)
    );
    assert_eq!(alice.media.replaced_tracks(), 1);
    assert_eq!(alice.engine.snapshot().camera_facing, CameraFacing::Environment);

    alice.media.fail_camera();
    assert!(matches!(
        alice.engine.switch_camera().await,
        Err(CallError::MediaAccessDenied(_))
    ));
    assert_eq!(alice.engine.snapshot().camera_facing, CameraFacing::Environment);
    assert_eq!(alice.engine.state(), CallState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_failed_camera_switch_releases_camera() {
    let h = Harness::new();
    let (alice, _bob) = connected_pair(&h).await;
    alice.media.fail_replace();

    for _ in 0..3 {
        assert!(matches!(
            alice.engine.switch_camera().await,
            Err(CallError::NegotiationFailure(_))
        ));
    }
    assert_eq!(alice.media.live_cameras(), 0);
    assert_eq!(alice.media.replaced_tracks(), 0);
    assert_eq!(alice.engine.snapshot().camera_facing, CameraFacing::User);
    assert_eq!(alice.engine.state(), CallState::Active);
}

#[tokio::test(start_paused = true)]
async fn test_audio_call_cannot_switch_camera() {
    let h = Harness::new();
    let alice = h.client("alice").await;
    let bob = h.client("bob").await;

    alice
        .engine
        .start_call("bob", Some(CallType::Audio))
        .await
        .unwrap();
    wait_for_state(&bob, CallState::Incoming).await;
    assert_eq!(bob.engine.switch_camera().await, Err(CallError::NoVideo));

    bob.engine.accept_call().await.unwrap();
    wait_for_state(&alice, CallState::Active).await;
    assert_eq!(alice.engine.switch_camera().await, Err(CallError::NoVideo));

    assert_eq!(alice.media.live_cameras(), 0);
    assert_eq!(alice.media.replaced_tracks(), 0);
    assert_eq!(alice.engine.snapshot().camera_facing, CameraFacing::User);
}

#[tokio::test(start_paused = true)]
async fn test_remote_track_is_published() {
    let h = Harness::new();
    let (alice, _bob) = connected_pair(&h).await;
    let mut events = alice.engine.subscribe();

    alice.media.emit_remote_track(TrackKind::Video);
    alice.media.emit_remote_track(TrackKind::Audio);

    let stream = loop {
        if let CallEvent::RemoteStream(stream) = events.recv().await.unwrap() {
            if stream.tracks.len() == 2 {
                break stream;
            }
        }
    };
    assert_eq!(stream.tracks, vec![TrackKind::Video, TrackKind::Audio]);
    assert_eq!(alice.engine.snapshot().remote_stream, Some(stream));
}
