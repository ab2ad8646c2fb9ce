//! Двухсторонние сценарии звонка поверх in-memory сигнального стора:
//! alice набирает bob-а, оба оркестратора живут в одном процессе и
//! общаются только через документ канала.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use heartwise_call::call::{CallEvent, CallOrchestrator, CallStatus, EventSubscription};
use heartwise_call::media::{MediaConstraints, SyntheticMediaDevices};
use heartwise_call::signaling::{MemorySignalingStore, SignalingMessage, SignalingPayload, SignalingStore};
use heartwise_call::{CallConfig, CallError, IceCandidate};
use tokio::time::sleep;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("heartwise_call=debug")
        .try_init();
}

fn offline_config() -> CallConfig {
    // без STUN: host-кандидатов достаточно, тесты не ходят в сеть
    CallConfig {
        ice_servers: Vec::new(),
        ..Default::default()
    }
}

fn orchestrator(
    store: &Arc<MemorySignalingStore>,
    local: &str,
    remote: &str,
    initiator: bool,
) -> Arc<CallOrchestrator> {
    CallOrchestrator::new(
        store.clone(),
        Arc::new(SyntheticMediaDevices::new()),
        offline_config(),
        local,
        remote,
        initiator,
        MediaConstraints::default(),
    )
}

type Transitions = Arc<Mutex<Vec<(CallStatus, CallStatus)>>>;
type Events = Arc<Mutex<Vec<CallEvent>>>;

fn record(orch: &Arc<CallOrchestrator>) -> (Transitions, Events, EventSubscription) {
    let transitions: Transitions = Arc::new(Mutex::new(Vec::new()));
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let t = transitions.clone();
    let e = events.clone();
    let sub = orch.subscribe(move |event| {
        if let CallEvent::StatusChanged { from, to } = event {
            t.lock().unwrap().push((*from, *to));
        }
        e.lock().unwrap().push(event.clone());
    });
    (transitions, events, sub)
}

async fn wait_for(cond: impl Fn() -> bool, what: &str) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_status(orch: &Arc<CallOrchestrator>, want: CallStatus) {
    let what = format!("status {want:?}, current {:?}", orch.status());
    wait_for(|| orch.status() == want, &what).await;
}

/// Доводит пару оркестраторов до активного звонка
async fn establish(
    alice: &Arc<CallOrchestrator>,
    bob: &Arc<CallOrchestrator>,
    bob_events: &Events,
) {
    bob.start().await.unwrap();
    alice.start().await.unwrap();

    wait_for_status(bob, CallStatus::Receiving).await;
    wait_for(|| bob.peer().is_some(), "bob peer built").await;
    wait_for(
        || {
            bob_events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, CallEvent::IncomingOffer { from } if from == "alice"))
        },
        "incoming offer event",
    )
    .await;

    bob.accept().await.unwrap();
    wait_for_status(alice, CallStatus::Active).await;
}

#[tokio::test]
async fn test_two_party_dialing_scenario() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let alice = orchestrator(&store, "alice", "bob", true);
    let bob = orchestrator(&store, "bob", "alice", false);

    // канал детерминирован и одинаков с обеих сторон
    assert_eq!(alice.session().channel_id, "alice_bob");
    assert_eq!(bob.session().channel_id, "alice_bob");

    let (alice_transitions, _alice_events, _s1) = record(&alice);
    let (bob_transitions, bob_events, _s2) = record(&bob);

    bob.start().await.unwrap();
    assert_eq!(bob.status(), CallStatus::Idle);

    alice.start().await.unwrap();
    assert_eq!(alice.status(), CallStatus::Dialing);

    wait_for_status(&bob, CallStatus::Receiving).await;
    wait_for(|| bob.peer().is_some(), "bob peer built").await;
    wait_for(
        || {
            bob_events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, CallEvent::IncomingOffer { from } if from == "alice"))
        },
        "incoming offer event",
    )
    .await;
    // alice всё ещё ждёт ответа
    assert_eq!(alice.status(), CallStatus::Dialing);

    bob.accept().await.unwrap();
    assert_eq!(bob.status(), CallStatus::Active);
    wait_for_status(&alice, CallStatus::Active).await;

    // active достижим только через dialing/receiving
    assert_eq!(
        alice_transitions.lock().unwrap().as_slice(),
        &[
            (CallStatus::Idle, CallStatus::Dialing),
            (CallStatus::Dialing, CallStatus::Active),
        ]
    );
    assert_eq!(
        bob_transitions.lock().unwrap().as_slice(),
        &[
            (CallStatus::Idle, CallStatus::Receiving),
            (CallStatus::Receiving, CallStatus::Active),
        ]
    );

    // offer написал инициатор, answer — принимающая сторона
    let doc = store.read("alice_bob").await.unwrap().unwrap();
    assert_eq!(doc.offer.unwrap().sender_id, "alice");
    assert_eq!(doc.answer.unwrap().sender_id, "bob");

    // пара toggle-ов возвращает исходное состояние микрофона
    assert!(!alice.toggle_mute().unwrap());
    assert!(alice.toggle_mute().unwrap());

    alice.hang_up().await.unwrap();
    wait_for_status(&bob, CallStatus::Ended).await;
}

#[tokio::test]
async fn test_hangup_scenario_and_teardown_guarantees() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let alice = orchestrator(&store, "alice", "bob", true);
    let bob = orchestrator(&store, "bob", "alice", false);

    let (_alice_transitions, alice_events, _s1) = record(&alice);
    let (_bob_transitions, bob_events, _s2) = record(&bob);
    establish(&alice, &bob, &bob_events).await;

    let alice_peer = alice.peer().unwrap();

    alice.hang_up().await.unwrap();
    assert_eq!(alice.status(), CallStatus::Ended);

    // bob завершает звонок по hangup-у собеседника, не переотправляя свой
    wait_for_status(&bob, CallStatus::Ended).await;
    let doc = store.read("alice_bob").await.unwrap().unwrap();
    assert_eq!(doc.hangup.unwrap().sender_id, "alice");

    // после завершения: дорожки остановлены, соединение закрыто
    for track in alice_peer.local_stream().tracks() {
        assert!(track.is_stopped());
    }
    assert_eq!(
        alice_peer.connection_state(),
        RTCPeerConnectionState::Closed
    );

    // подписка снята: новые записи в документ не будят alice
    let before = alice_events.lock().unwrap().len();
    store
        .apply(
            "alice_bob",
            &SignalingMessage::new(
                "bob",
                SignalingPayload::Candidate {
                    candidate: IceCandidate {
                        candidate: "candidate:9 1 udp 1 10.0.0.9 50000 typ host".into(),
                        sdp_mid: Some("0".into()),
                        sdp_mline_index: Some(0),
                    },
                },
            ),
        )
        .await
        .unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(alice_events.lock().unwrap().len(), before);
    assert_eq!(alice.status(), CallStatus::Ended);
}

#[tokio::test]
async fn test_reject_scenario() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let alice = orchestrator(&store, "alice", "bob", true);
    let bob = orchestrator(&store, "bob", "alice", false);

    bob.start().await.unwrap();
    alice.start().await.unwrap();

    wait_for_status(&bob, CallStatus::Receiving).await;
    wait_for(|| bob.peer().is_some(), "bob peer built").await;

    bob.reject().await.unwrap();
    assert_eq!(bob.status(), CallStatus::Ended);

    // alice получает hangup и тоже завершает
    wait_for_status(&alice, CallStatus::Ended).await;
    let doc = store.read("alice_bob").await.unwrap().unwrap();
    assert_eq!(doc.hangup.unwrap().sender_id, "bob");
}

#[tokio::test]
async fn test_user_actions_in_wrong_state() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let bob = orchestrator(&store, "bob", "alice", false);

    // accept без полученного offer-а
    let err = bob.accept().await.unwrap_err();
    assert!(matches!(
        err,
        CallError::InvalidState {
            status: CallStatus::Idle,
            ..
        }
    ));

    // toggle-ы до создания peer-а
    assert!(bob.toggle_mute().is_err());
    assert!(bob.toggle_screen_share().await.is_err());

    // hang_up из Idle завершает сессию, повторный — ошибка
    bob.hang_up().await.unwrap();
    assert_eq!(bob.status(), CallStatus::Ended);
    assert!(bob.hang_up().await.is_err());
}

#[tokio::test]
async fn test_denied_media_ends_attempt_without_retry() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let alice = CallOrchestrator::new(
        store.clone(),
        Arc::new(SyntheticMediaDevices::denied()),
        offline_config(),
        "alice",
        "bob",
        true,
        MediaConstraints::default(),
    );
    let (transitions, events, _s) = record(&alice);

    let err = alice.start().await.unwrap_err();
    assert!(matches!(err, CallError::MediaAccess(_)));
    assert_eq!(alice.status(), CallStatus::Ended);

    // error → ended, пользователь увидел сообщение
    assert_eq!(
        transitions.lock().unwrap().as_slice(),
        &[
            (CallStatus::Idle, CallStatus::Dialing),
            (CallStatus::Dialing, CallStatus::Error),
            (CallStatus::Error, CallStatus::Ended),
        ]
    );
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, CallEvent::Error { .. })));
}

#[tokio::test]
async fn test_receiver_media_denied_ends_inbound_call() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());
    let alice = orchestrator(&store, "alice", "bob", true);
    let bob = CallOrchestrator::new(
        store.clone(),
        Arc::new(SyntheticMediaDevices::denied()),
        offline_config(),
        "bob",
        "alice",
        false,
        MediaConstraints::default(),
    );
    let (_t, bob_events, _s) = record(&bob);

    bob.start().await.unwrap();
    alice.start().await.unwrap();

    wait_for_status(&bob, CallStatus::Ended).await;
    assert!(bob_events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, CallEvent::Error { .. })));
}

#[tokio::test]
async fn test_same_pair_can_call_again_after_hangup() {
    init_tracing();
    let store = Arc::new(MemorySignalingStore::new());

    // первый звонок завершается до accept-а
    let alice = orchestrator(&store, "alice", "bob", true);
    let bob = orchestrator(&store, "bob", "alice", false);
    bob.start().await.unwrap();
    alice.start().await.unwrap();
    wait_for_status(&bob, CallStatus::Receiving).await;
    alice.hang_up().await.unwrap();
    wait_for_status(&bob, CallStatus::Ended).await;

    // вторая сессия той же пары: старый документ не мешает
    let alice2 = orchestrator(&store, "alice", "bob", true);
    let bob2 = orchestrator(&store, "bob", "alice", false);

    bob2.start().await.unwrap();
    assert_eq!(bob2.status(), CallStatus::Idle);

    alice2.start().await.unwrap();
    wait_for_status(&bob2, CallStatus::Receiving).await;
    wait_for(|| bob2.peer().is_some(), "bob2 peer built").await;

    bob2.accept().await.unwrap();
    wait_for_status(&alice2, CallStatus::Active).await;
}
