//! Firewall integration tests
//!
//! Validation of peer-asserted records through the public API, checking
//! both the verdict and what the response policy was told.

use std::sync::Arc;

use serde_json::json;

use peer_proxy_core::firewall::{
    check_schema, schema_from_tags, Firewall, RecordingResponsePolicy, Severity,
    USER_PROFILE_SCHEMA,
};

fn recording_firewall() -> (Firewall, Arc<RecordingResponsePolicy>) {
    let recorder = Arc::new(RecordingResponsePolicy::new());
    (Firewall::new(recorder.clone()), recorder)
}

fn client(user: &str, id: &str) -> serde_json::Value {
    json!({"userId": user, "clientId": id, "status": "ONLINE", "timestamp": 1_700_000_000_000u64})
}

// ============================================================================
// Schema Tests
// ============================================================================

#[test]
fn test_user_profile_exact_match() {
    assert!(check_schema(&json!({"userId": "a", "timestamp": 5}), USER_PROFILE_SCHEMA));
    assert!(!check_schema(
        &json!({"userId": "a", "timestamp": 5, "extra": 1}),
        USER_PROFILE_SCHEMA
    ));
    assert!(!check_schema(&json!({"timestamp": 5}), USER_PROFILE_SCHEMA));
}

#[test]
fn test_tagged_schema() {
    let schema = schema_from_tags(&[("id", "string"), ("age", "?number"), ("meta", "?object")])
        .unwrap();

    assert!(check_schema(&json!({"id": "x"}), &schema));
    assert!(check_schema(&json!({"id": "x", "age": 3, "meta": {}}), &schema));
    assert!(!check_schema(&json!({"id": "x", "age": "3"}), &schema));
    assert!(!check_schema(&json!({"id": "x", "meta": null}), &schema));
    assert!(!check_schema(&json!(["id"]), &schema));
}

// ============================================================================
// Identifier Tests
// ============================================================================

#[test]
fn test_identifier_attacks_are_reported() {
    let (firewall, recorder) = recording_firewall();

    assert!(firewall.is_user_id("alice"));
    assert!(recorder.is_empty());

    assert!(!firewall.is_user_id("__proto__"));
    assert!(!firewall.is_client_id("constructor"));
    assert!(!firewall.is_client_id("hasOwnProperty"));

    assert_eq!(recorder.count(Severity::LikelyAttack), 3);
    assert_eq!(recorder.failures()[0], ("__proto__".to_string(), Severity::LikelyAttack));
}

// ============================================================================
// Record Tests
// ============================================================================

#[test]
fn test_negative_timestamp_is_malformed() {
    let (firewall, recorder) = recording_firewall();
    let profile = json!({"userId": "a", "timestamp": -1});

    assert!(!firewall.is_valid_user_profile(&profile));
    assert_eq!(recorder.len(), 1);
    assert_eq!(recorder.count(Severity::MalformedInput), 1);
    assert_eq!(recorder.failures()[0].0, profile.to_string());
}

#[test]
fn test_every_rejection_reports_once() {
    let (firewall, recorder) = recording_firewall();

    let rejected = [
        json!({"userId": "a", "extra": true}),
        json!({"userId": 7}),
        json!({"userId": "__lookupSetter__"}),
        json!({"userId": "a", "timestamp": -5.5}),
        json!("not a record"),
    ];
    for profile in &rejected {
        let before = recorder.len();
        assert!(!firewall.is_valid_user_profile(profile), "{profile}");
        assert_eq!(recorder.len(), before + 1, "{profile}");
    }
}

#[test]
fn test_client_state() {
    let (firewall, recorder) = recording_firewall();

    assert!(firewall.is_valid_client_state(&client("alice", "alice/laptop")));
    assert!(!firewall.is_valid_client_state(&client("alice", "__proto__")));
    assert!(!firewall.is_valid_client_state(&json!({"userId": "alice", "clientId": "c"})));

    assert_eq!(recorder.count(Severity::LikelyAttack), 1);
    assert_eq!(recorder.count(Severity::MalformedInput), 1);
}

#[test]
fn test_nested_from_is_reported_by_nested_check() {
    let (firewall, recorder) = recording_firewall();
    let bad_from = json!({"userId": "alice", "clientId": "c", "status": 3});
    let message = json!({"from": bad_from, "message": "hi"});

    assert!(!firewall.is_valid_incoming_message(&message));
    assert_eq!(recorder.len(), 1);
    assert_eq!(recorder.failures()[0].0, bad_from.to_string());
}

#[test]
fn test_incoming_message_roundtrip_to_typed() {
    let (firewall, recorder) = recording_firewall();
    let message = json!({"from": client("bob", "bob/phone"), "message": "hello"});

    let parsed = firewall.parse_incoming_message(&message).unwrap();
    assert_eq!(parsed.from.user_id, "bob");
    assert_eq!(parsed.from.client_id, "bob/phone");
    assert_eq!(parsed.message, "hello");
    assert!(recorder.is_empty());

    assert!(firewall
        .parse_incoming_message(&json!({"from": "bob", "message": "hello"}))
        .is_none());
    assert_eq!(recorder.count(Severity::MalformedInput), 1);
}

#[test]
fn test_policy_closure() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let firewall = Firewall::new(Arc::new({
        let seen = Arc::clone(&seen);
        move |text: &str, severity: Severity| seen.lock().push((text.to_string(), severity))
    }));

    assert!(!firewall.is_user_id("__defineSetter__"));
    assert_eq!(seen.lock().len(), 1);
}
