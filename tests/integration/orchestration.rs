//! Orchestration integration tests
//!
//! These tests drive `RemoteConnection` through full sessions with scripted
//! endpoints and check what an embedding application observes.
//!
//! # Test Categories
//!
//! 1. **Lifecycle Tests**: state/endpoint invariant, conflicts, closure
//! 2. **Race Tests**: stop followed immediately by start, for both roles
//! 3. **Signalling Tests**: direction routing and the sharer-created gate
//! 4. **Reporting Tests**: byte coalescing, report ordering and the update wire format

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use peer_proxy_core::config::{IceServer, NetworkConfig, OrchestratorConfig};
use peer_proxy_core::connection::{
    GettingState, RemoteConnection, SharingState, SignalPayload, SignallingMessage, Update,
};
use peer_proxy_core::endpoint::{ScriptedGetterFactory, ScriptedSharerFactory};
use peer_proxy_core::OrchestratorError;

// ============================================================================
// Test Helpers
// ============================================================================

struct Fixture {
    connection: RemoteConnection,
    sharers: Arc<ScriptedSharerFactory>,
    getters: Arc<ScriptedGetterFactory>,
    updates: UnboundedReceiver<Update>,
}

fn fixture_with(sharers: ScriptedSharerFactory, getters: ScriptedGetterFactory) -> Fixture {
    let (tx, updates) = mpsc::unbounded_channel();
    let sharers = Arc::new(sharers);
    let getters = Arc::new(getters);
    let connection =
        RemoteConnection::builder(Arc::new(tx), sharers.clone(), getters.clone()).build();
    Fixture {
        connection,
        sharers,
        getters,
        updates,
    }
}

fn fixture() -> Fixture {
    fixture_with(ScriptedSharerFactory::new(), ScriptedGetterFactory::new())
}

/// Let spawned driver tasks run
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn drain(updates: &mut UnboundedReceiver<Update>) -> Vec<Update> {
    let mut out = Vec::new();
    while let Ok(update) = updates.try_recv() {
        out.push(update);
    }
    out
}

fn count(updates: &[Update], wanted: &Update) -> usize {
    updates.iter().filter(|u| *u == wanted).count()
}

fn assert_invariant(connection: &RemoteConnection) {
    assert_eq!(
        connection.has_sharer(),
        connection.sharing_state() != SharingState::None,
        "sharer presence must match sharing state"
    );
    assert_eq!(
        connection.has_getter(),
        connection.getting_state() != GettingState::None,
        "getter presence must match getting state"
    );
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_state_matches_endpoint_presence() {
    let f = fixture();
    let conn = &f.connection;
    assert_invariant(conn);

    // Sharer: start, ready, local stop
    let _ready = conn.start_share().unwrap();
    assert_invariant(conn);
    f.sharers.latest().unwrap().report_ready();
    settle().await;
    assert_eq!(conn.sharing_state(), SharingState::Sharing);
    assert_invariant(conn);
    let closed = conn.stop_share();
    assert_invariant(conn);
    closed.await.unwrap();
    assert_invariant(conn);

    // Sharer: start, remote closure
    let _ready = conn.start_share().unwrap();
    f.sharers.latest().unwrap().report_closed();
    settle().await;
    assert_eq!(conn.sharing_state(), SharingState::None);
    assert_invariant(conn);

    // Getter: failed start
    let started = conn.start_get().unwrap();
    assert_invariant(conn);
    f.getters.latest().unwrap().fail_start("negotiation timed out");
    assert_eq!(started.await, Err(OrchestratorError::TunnelSetup));
    assert_invariant(conn);

    // Getter: started, remote hang-up
    let started = conn.start_get().unwrap();
    let getter = f.getters.latest().unwrap();
    getter.complete_start("127.0.0.1:41000".parse().unwrap());
    started.await.unwrap();
    assert_invariant(conn);
    getter.begin_stopping();
    settle().await;
    assert_eq!(conn.getting_state(), GettingState::None);
    assert_invariant(conn);

    // Getter: local stop while still trying
    let _started = conn.start_get().unwrap();
    let stopped = conn.stop_get();
    assert_invariant(conn);
    stopped.await.unwrap();
    assert_invariant(conn);
}

#[tokio::test]
async fn test_start_share_conflicts_while_session_exists() {
    let f = fixture();
    let _ready = f.connection.start_share().unwrap();

    let err = f.connection.start_share().unwrap_err();
    assert_eq!(err, OrchestratorError::ShareInProgress);
    assert!(err.is_conflict());

    f.sharers.latest().unwrap().report_ready();
    settle().await;
    assert_eq!(
        f.connection.start_share().unwrap_err(),
        OrchestratorError::ShareInProgress
    );
    assert_eq!(f.sharers.created_count(), 1);

    // Stopping frees the role again
    f.connection.stop_share().await.unwrap();
    assert!(f.connection.start_share().is_ok());
    assert_eq!(f.sharers.created_count(), 2);
}

#[tokio::test]
async fn test_roles_are_independent() {
    let f = fixture();
    let _ready = f.connection.start_share().unwrap();
    let _started = f.connection.start_get().unwrap();

    f.connection.stop_get().await.unwrap();
    assert_eq!(f.connection.sharing_state(), SharingState::TryingToShare);
    assert!(f.connection.has_sharer());
}

#[tokio::test]
async fn test_sharer_closure_resets_once() {
    let mut f = fixture();
    let ready = f.connection.start_share().unwrap();
    let sharer = f.sharers.latest().unwrap();
    sharer.report_ready();
    ready.await.unwrap();

    sharer.emit_bytes_sent(10);
    sharer.emit_bytes_received(20);
    settle().await;
    assert_eq!(f.connection.bytes_sent(), 10);
    assert_eq!(f.connection.bytes_received(), 20);

    assert!(sharer.report_closed());
    assert!(!sharer.report_closed());
    settle().await;

    assert_eq!(f.connection.sharing_state(), SharingState::None);
    assert_eq!(f.connection.bytes_sent(), 0);
    assert_eq!(f.connection.bytes_received(), 0);

    // A stop after closure is a no-op
    f.connection.stop_share().await.unwrap();

    let updates = drain(&mut f.updates);
    assert_eq!(count(&updates, &Update::StopGiving), 1);
    let Some(Update::State(last)) = updates.last() else {
        panic!("closure must end with a STATE update");
    };
    assert_eq!(last.bytes_sent, 0);
    assert_eq!(last.sharing_state, SharingState::None);
}

#[tokio::test]
async fn test_setup_failure_hides_detail() {
    let f = fixture();
    let ready = f.connection.start_share().unwrap();
    f.sharers
        .latest()
        .unwrap()
        .fail_setup("turn allocation refused by 198.51.100.7");

    let err = ready.await.unwrap_err();
    assert_eq!(err.to_string(), "Could not start proxy");
    settle().await;
    assert_eq!(f.connection.sharing_state(), SharingState::None);
    assert!(!f.connection.has_sharer());
}

#[tokio::test]
async fn test_sharer_built_from_network_config() {
    let (tx, _updates) = mpsc::unbounded_channel::<Update>();
    let sharers = Arc::new(ScriptedSharerFactory::new());
    let network = NetworkConfig {
        ice_servers: vec![
            IceServer::stun("stun:stun.example.org:3478"),
            IceServer::turn("turns:relay.example.org:5349", "peer", "secret"),
        ],
        allow_non_unicast: true,
    };
    let connection = RemoteConnection::builder(
        Arc::new(tx),
        sharers.clone(),
        Arc::new(ScriptedGetterFactory::new()),
    )
    .network(Arc::new(network.clone()))
    .build();

    let _ready = connection.start_share().unwrap();
    let config = sharers.latest().unwrap().config().clone();
    assert_eq!(config.ice_servers, network.ice_servers);
    assert!(config.allow_non_unicast);
}

// ============================================================================
// Race Tests
// ============================================================================

#[tokio::test]
async fn test_superseded_sharer_closure_reports_without_touching_new_session() {
    let mut f = fixture_with(
        ScriptedSharerFactory::new().with_manual_close(),
        ScriptedGetterFactory::new(),
    );
    let ready = f.connection.start_share().unwrap();
    let old = f.sharers.latest().unwrap();
    old.report_ready();
    ready.await.unwrap();
    old.emit_bytes_sent(100);
    settle().await;
    assert_eq!(f.connection.bytes_sent(), 100);

    let old_closed = f.connection.stop_share();
    assert!(old.close_requested());
    let _ready = f.connection.start_share().unwrap();
    let new = f.sharers.latest().unwrap();

    // The replacement starts from zero even though the old one is still closing
    assert_eq!(f.connection.bytes_sent(), 0);
    new.emit_bytes_sent(7);
    settle().await;
    drain(&mut f.updates);

    // The old endpoint finishes closing only now
    old.report_closed();
    old_closed.await.unwrap();
    settle().await;

    assert_eq!(f.connection.sharing_state(), SharingState::TryingToShare);
    assert!(f.connection.has_sharer());
    assert_eq!(f.connection.bytes_sent(), 7);

    let updates = drain(&mut f.updates);
    assert_eq!(count(&updates, &Update::StopGiving), 1);
    assert!(updates.iter().all(|u| match u {
        Update::State(s) => s.sharing_state == SharingState::TryingToShare && s.bytes_sent == 7,
        _ => true,
    }));

    // Late events from the old endpoint are dropped
    old.emit_signal(json!({"stale": true}));
    old.emit_bytes_sent(1000);
    settle().await;
    assert!(!drain(&mut f.updates)
        .iter()
        .any(|u| matches!(u, Update::SignallingMessage(_))));
    assert_eq!(f.connection.bytes_sent(), 7);

    new.report_ready();
    settle().await;
    assert_eq!(f.connection.sharing_state(), SharingState::Sharing);
}

#[tokio::test]
async fn test_superseded_getter_stopping_reports_without_touching_new_session() {
    let mut f = fixture();
    let started = f.connection.start_get().unwrap();
    let old = f.getters.latest().unwrap();
    old.complete_start("127.0.0.1:42000".parse().unwrap());
    started.await.unwrap();
    old.emit_bytes_received(64);
    settle().await;
    assert_eq!(f.connection.bytes_received(), 64);

    let old_stopped = f.connection.stop_get();
    let _started = f.connection.start_get().unwrap();
    assert_eq!(f.connection.bytes_received(), 0);
    drain(&mut f.updates);

    old_stopped.await.unwrap();
    settle().await;

    assert_eq!(old.stop_calls(), 1);
    assert_eq!(f.connection.getting_state(), GettingState::TryingToGet);
    assert!(f.connection.has_getter());
    let updates = drain(&mut f.updates);
    assert_eq!(count(&updates, &Update::StopGetting(false)), 1);
    assert_eq!(count(&updates, &Update::StopGetting(true)), 0);
    let Some(Update::State(last)) = updates.last() else {
        panic!("stopping must end with a STATE update");
    };
    assert_eq!(last.getting_state, GettingState::TryingToGet);
    assert_eq!(last.bytes_received, 0);
}

#[tokio::test]
async fn test_ready_after_stop_cancels_handle() {
    let f = fixture_with(
        ScriptedSharerFactory::new().with_manual_close(),
        ScriptedGetterFactory::new(),
    );
    let ready = f.connection.start_share().unwrap();
    let sharer = f.sharers.latest().unwrap();

    let _closed = f.connection.stop_share();
    sharer.report_ready();

    assert_eq!(ready.await, Err(OrchestratorError::Cancelled));
    assert_eq!(f.connection.sharing_state(), SharingState::None);
}

// ============================================================================
// Signalling Tests
// ============================================================================

#[tokio::test]
async fn test_directions_never_cross() {
    let f = fixture();
    let conn = &f.connection;

    let for_sharer = || SignallingMessage::from_client_peer(json!({"to": "sharer"}));
    let for_getter = || SignallingMessage::from_server_peer(json!({"to": "getter"}));

    conn.handle_signal(for_sharer());
    conn.handle_signal(for_getter());
    let _ready = conn.start_share().unwrap();
    conn.handle_signal(for_getter());
    conn.handle_signal(for_sharer());
    let _started = conn.start_get().unwrap();
    conn.handle_signal(for_sharer());
    conn.handle_signal(for_getter());
    let _closed = conn.stop_share();
    conn.handle_signal(for_sharer());
    conn.handle_signal(for_getter());
    let _ready = conn.start_share().unwrap();
    let _stopped = conn.stop_get();
    conn.handle_signal(for_getter());
    conn.handle_signal(for_sharer());
    settle().await;

    let sharer_payload = SignalPayload::new(json!({"to": "sharer"}));
    let getter_payload = SignalPayload::new(json!({"to": "getter"}));
    for sharer in f.sharers.sharers() {
        assert!(sharer.received_signals().iter().all(|p| *p == sharer_payload));
    }
    for getter in f.getters.getters() {
        assert!(getter.received_signals().iter().all(|p| *p == getter_payload));
    }

    let sharers = f.sharers.sharers();
    assert_eq!(sharers[0].received_signals().len(), 2);
    assert_eq!(sharers[1].received_signals().len(), 1);
    assert_eq!(f.getters.getters()[0].received_signals().len(), 2);
}

#[tokio::test]
async fn test_candidate_waits_for_replacement_sharer() {
    let f = fixture();
    let _ready = f.connection.start_share().unwrap();
    let old = f.sharers.latest().unwrap();

    // A new offer arrives: hold candidates before tearing the old sharer down
    f.connection.reset_sharer_created();
    assert!(!f.connection.is_sharer_created());

    let delivering = tokio::spawn({
        let conn = f.connection.clone();
        async move {
            conn.deliver_signal(SignallingMessage::from_client_peer(json!({"candidate": "c1"})))
                .await;
        }
    });
    settle().await;
    assert!(!delivering.is_finished());
    assert!(old.received_signals().is_empty());

    let _closed = f.connection.stop_share();
    let _ready = f.connection.start_share().unwrap();
    delivering.await.unwrap();

    let new = f.sharers.latest().unwrap();
    assert_eq!(new.id(), 1);
    assert_eq!(
        new.received_signals(),
        vec![SignalPayload::new(json!({"candidate": "c1"}))]
    );
    assert!(old.received_signals().is_empty());
}

#[tokio::test]
async fn test_deliver_signal_passes_when_gate_open() {
    let f = fixture();
    let _ready = f.connection.start_share().unwrap();
    let _started = f.connection.start_get().unwrap();

    f.connection
        .deliver_signal(SignallingMessage::from_client_peer(json!("offer")))
        .await;
    f.connection
        .deliver_signal(SignallingMessage::from_server_peer(json!("answer")))
        .await;
    f.connection.once_sharer_created().await;

    assert_eq!(f.sharers.latest().unwrap().received_signals().len(), 1);
    assert_eq!(f.getters.latest().unwrap().received_signals().len(), 1);
}

// ============================================================================
// Reporting Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_byte_updates_coalesce_per_window() {
    let mut f = fixture();
    let _ready = f.connection.start_share().unwrap();
    let sharer = f.sharers.latest().unwrap();
    drain(&mut f.updates);

    for _ in 0..100 {
        sharer.emit_bytes_sent(10);
        sharer.emit_bytes_received(1);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(drain(&mut f.updates).is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    let updates = drain(&mut f.updates);
    assert_eq!(updates.len(), 1);
    let Update::State(snapshot) = &updates[0] else {
        panic!("expected a STATE update, got {:?}", updates[0]);
    };
    assert_eq!(snapshot.bytes_sent, 1000);
    assert_eq!(snapshot.bytes_received, 100);

    // The next burst opens a fresh window
    sharer.emit_bytes_sent(5);
    sharer.emit_bytes_sent(5);
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let updates = drain(&mut f.updates);
    assert_eq!(updates.len(), 1);
    assert!(matches!(&updates[0], Update::State(s) if s.bytes_sent == 1010));
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_interval_is_configurable() {
    let (tx, mut updates) = mpsc::unbounded_channel();
    let getters = Arc::new(ScriptedGetterFactory::new());
    let settings = OrchestratorConfig {
        state_update_interval_ms: 250,
        ..OrchestratorConfig::default()
    };
    let connection = RemoteConnection::builder(
        Arc::new(tx),
        Arc::new(ScriptedSharerFactory::new()),
        getters.clone(),
    )
    .settings(settings)
    .build();

    let _started = connection.start_get().unwrap();
    drain(&mut updates);
    getters.latest().unwrap().emit_bytes_received(64);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let updates = drain(&mut updates);
    assert_eq!(updates.len(), 1);
    assert!(matches!(&updates[0], Update::State(s) if s.bytes_received == 64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_state_matches_connection_after_racing_refresh_and_closure() {
    let (tx, mut updates) = mpsc::unbounded_channel();
    let sharers = Arc::new(ScriptedSharerFactory::new().with_manual_close());
    let settings = OrchestratorConfig {
        state_update_interval_ms: 1,
        ..OrchestratorConfig::default()
    };
    let connection = RemoteConnection::builder(
        Arc::new(tx),
        sharers.clone(),
        Arc::new(ScriptedGetterFactory::new()),
    )
    .settings(settings)
    .build();

    for round in 0..50u64 {
        let ready = connection.start_share().unwrap();
        let sharer = sharers.latest().unwrap();
        sharer.report_ready();
        ready.await.unwrap();

        // Arm the refresh timer, then close around the moment it fires
        sharer.emit_bytes_sent(100 + round);
        tokio::time::sleep(Duration::from_micros(500 + round * 20)).await;
        let worker = {
            let sharer = sharer.clone();
            tokio::spawn(async move {
                sharer.report_closed();
            })
        };
        worker.await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let current = connection.state();
        let last = drain(&mut updates)
            .into_iter()
            .rev()
            .find_map(|u| match u {
                Update::State(s) => Some(s),
                _ => None,
            })
            .expect("every round reports STATE");
        assert_eq!(last, current, "round {round}");
        assert_eq!(current.sharing_state, SharingState::None);
        assert_eq!(current.bytes_sent, 0);
    }
}

#[tokio::test]
async fn test_update_wire_format() {
    let mut f = fixture();
    let _ready = f.connection.start_share().unwrap();
    let sharer = f.sharers.latest().unwrap();
    sharer.emit_signal(json!({"type": "answer", "sdp": "v=0"}));
    settle().await;

    let updates = drain(&mut f.updates);
    assert_eq!(
        serde_json::to_value(&updates[0]).unwrap(),
        json!({
            "update": "STATE",
            "data": {
                "bytesSent": 0,
                "bytesReceived": 0,
                "localGettingFromRemote": "NONE",
                "localSharingWithRemote": "TRYING_TO_SHARE_ACCESS"
            }
        })
    );
    assert_eq!(
        serde_json::to_value(&updates[1]).unwrap(),
        json!({
            "update": "SIGNALLING_MESSAGE",
            "data": {"type": "SERVER_PEER", "data": {"type": "answer", "sdp": "v=0"}}
        })
    );

    sharer.report_ready();
    settle().await;
    let updates = drain(&mut f.updates);
    assert_eq!(
        serde_json::to_value(&updates[0]).unwrap(),
        json!({"update": "START_GIVING"})
    );
    assert_eq!(
        serde_json::to_value(Update::StopGetting(true)).unwrap(),
        json!({"update": "STOP_GETTING", "data": true})
    );
}
