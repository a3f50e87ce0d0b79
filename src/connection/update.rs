//! Updates reported upward to the UI and persistence layers

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use super::signal::SignallingMessage;
use super::state::StateSnapshot;

/// Kind of an [`Update`], without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    State,
    StartGiving,
    StopGiving,
    StopGetting,
    SignallingMessage,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::State => "STATE",
            Self::StartGiving => "START_GIVING",
            Self::StopGiving => "STOP_GIVING",
            Self::StopGetting => "STOP_GETTING",
            Self::SignallingMessage => "SIGNALLING_MESSAGE",
        };
        f.write_str(name)
    }
}

/// One report from a remote connection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "update", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Update {
    /// Counters and both role states
    State(StateSnapshot),
    /// The local sharer is now giving access
    StartGiving,
    /// The local sharer session ended
    StopGiving,
    /// The local getter session ended; `true` if it was unexpected
    StopGetting(bool),
    /// Negotiation data to forward to the remote peer
    SignallingMessage(SignallingMessage),
}

impl Update {
    pub fn kind(&self) -> UpdateKind {
        match self {
            Self::State(_) => UpdateKind::State,
            Self::StartGiving => UpdateKind::StartGiving,
            Self::StopGiving => UpdateKind::StopGiving,
            Self::StopGetting(_) => UpdateKind::StopGetting,
            Self::SignallingMessage(_) => UpdateKind::SignallingMessage,
        }
    }
}

/// Receiver of updates from a remote connection
///
/// `report` is called while the connection's internal lock is held, so
/// updates arrive in the order the state changed. It must not block and must
/// not call back into the connection.
pub trait UpdateSink: Send + Sync {
    fn report(&self, update: Update);
}

impl UpdateSink for mpsc::UnboundedSender<Update> {
    fn report(&self, update: Update) {
        if let Err(e) = self.send(update) {
            debug!(kind = %e.0.kind(), "Update receiver dropped");
        }
    }
}
