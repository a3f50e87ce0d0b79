//! Signalling messages exchanged between peers during tunnel negotiation
//!
//! The core never looks inside a payload; it only routes by direction.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which remote role a signalling message came from
///
/// The local handler is the opposite role: a message from the client peer
/// is handled by the local sharer (acting as its server), and a message from
/// the server peer by the local getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    /// Sent by the remote client; destined for the local sharer
    ClientPeer,
    /// Sent by the remote server; destined for the local getter
    ServerPeer,
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientPeer => write!(f, "CLIENT_PEER"),
            Self::ServerPeer => write!(f, "SERVER_PEER"),
        }
    }
}

/// Opaque negotiation data (offer, answer, candidate, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalPayload(pub Value);

impl SignalPayload {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for SignalPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A directed signalling message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignallingMessage {
    #[serde(rename = "type")]
    pub direction: SignalDirection,
    #[serde(rename = "data")]
    pub payload: SignalPayload,
}

impl SignallingMessage {
    pub fn new(direction: SignalDirection, payload: impl Into<SignalPayload>) -> Self {
        Self {
            direction,
            payload: payload.into(),
        }
    }

    /// A message from the remote client, for the local sharer
    pub fn from_client_peer(payload: impl Into<SignalPayload>) -> Self {
        Self::new(SignalDirection::ClientPeer, payload)
    }

    /// A message from the remote server, for the local getter
    pub fn from_server_peer(payload: impl Into<SignalPayload>) -> Self {
        Self::new(SignalDirection::ServerPeer, payload)
    }
}
