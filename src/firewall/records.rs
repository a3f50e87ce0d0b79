//! Validation of peer-asserted profile, client-state and message records
//!
//! Each check runs the exact-match schema first, then field-specific
//! checks. Every rejection is reported to the response policy exactly once:
//! schema and value problems as `MalformedInput` (with the record's compact
//! JSON as text), identifier problems as `LikelyAttack` by the identifier
//! check itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifier::{has_bad_chars, is_client_id, is_user_id};
use super::policy::{ResponsePolicy, Severity};
use super::schema::{check_schema, FieldSpec, FieldType};

/// Fields of a user profile
pub const USER_PROFILE_SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("userId", FieldType::String),
    FieldSpec::optional("timestamp", FieldType::Number),
    FieldSpec::optional("name", FieldType::String),
    FieldSpec::optional("url", FieldType::String),
    FieldSpec::optional("imageData", FieldType::String),
    FieldSpec::optional("lastUpdated", FieldType::Number),
    FieldSpec::optional("lastSeen", FieldType::Number),
];

/// Fields of a client state
pub const CLIENT_STATE_SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("userId", FieldType::String),
    FieldSpec::required("clientId", FieldType::String),
    FieldSpec::required("status", FieldType::String),
    FieldSpec::optional("timestamp", FieldType::Number),
    FieldSpec::optional("lastUpdated", FieldType::Number),
    FieldSpec::optional("lastSeen", FieldType::Number),
];

/// Fields of an incoming message
pub const INCOMING_MESSAGE_SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("from", FieldType::Object),
    FieldSpec::required("message", FieldType::String),
];

/// A peer's user profile, as accepted by [`parse_user_profile`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<f64>,
}

/// One client of a peer, as accepted by [`parse_client_state`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientState {
    pub user_id: String,
    pub client_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<f64>,
}

/// A chat-channel message from a peer client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncomingMessage {
    pub from: ClientState,
    pub message: String,
}

fn fail(record: &Value, response: &dyn ResponsePolicy) -> bool {
    response.on_validation_failure(&record.to_string(), Severity::MalformedInput);
    false
}

fn has_negative_timestamp(record: &Value) -> bool {
    record
        .get("timestamp")
        .and_then(Value::as_f64)
        .is_some_and(|ts| ts < 0.0)
}

fn str_field<'a>(record: &'a Value, name: &str) -> &'a str {
    // Only called after the schema check guaranteed a string here
    record.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// Validate a peer-asserted user profile
pub fn is_valid_user_profile(profile: &Value, response: &dyn ResponsePolicy) -> bool {
    if !check_schema(profile, USER_PROFILE_SCHEMA) {
        return fail(profile, response);
    }

    if !is_user_id(str_field(profile, "userId"), response) {
        return false;
    }

    if has_negative_timestamp(profile) {
        return fail(profile, response);
    }

    true
}

/// Validate a peer-asserted client state
pub fn is_valid_client_state(state: &Value, response: &dyn ResponsePolicy) -> bool {
    if !check_schema(state, CLIENT_STATE_SCHEMA) {
        return fail(state, response);
    }

    if !is_user_id(str_field(state, "userId"), response) {
        return false;
    }

    if !is_client_id(str_field(state, "clientId"), response) {
        return false;
    }

    if has_bad_chars(str_field(state, "status")) {
        return fail(state, response);
    }

    if has_negative_timestamp(state) {
        return fail(state, response);
    }

    true
}

/// Validate an incoming message and the client state it claims to be from
///
/// A bad `from` is reported once, by the nested client-state check.
pub fn is_valid_incoming_message(message: &Value, response: &dyn ResponsePolicy) -> bool {
    if !check_schema(message, INCOMING_MESSAGE_SCHEMA) {
        return fail(message, response);
    }

    match message.get("from") {
        Some(from) => is_valid_client_state(from, response),
        None => fail(message, response),
    }
}

fn decode<T>(record: &Value, response: &dyn ResponsePolicy) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    match T::deserialize(record) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            response.on_validation_failure(&format!("{record}: {e}"), Severity::MalformedInput);
            None
        }
    }
}

/// Validate and decode a user profile
pub fn parse_user_profile(profile: &Value, response: &dyn ResponsePolicy) -> Option<UserProfile> {
    if !is_valid_user_profile(profile, response) {
        return None;
    }
    decode(profile, response)
}

/// Validate and decode a client state
pub fn parse_client_state(state: &Value, response: &dyn ResponsePolicy) -> Option<ClientState> {
    if !is_valid_client_state(state, response) {
        return None;
    }
    decode(state, response)
}

/// Validate and decode an incoming message
pub fn parse_incoming_message(
    message: &Value,
    response: &dyn ResponsePolicy,
) -> Option<IncomingMessage> {
    if !is_valid_incoming_message(message, response) {
        return None;
    }
    decode(message, response)
}
