//! Session state machine for one remote connection
//!
//! [`ConnectionState::apply`] is a pure transition over
//! `(state, event) -> (state', effects)`. It owns no endpoints and performs
//! no I/O; the orchestrator feeds it events and carries out the effects.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::update::Update;

/// Whether we are proxying through the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GettingState {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TRYING_TO_GET_ACCESS")]
    TryingToGet,
    #[serde(rename = "GETTING_ACCESS")]
    Getting,
}

/// Whether the remote peer is proxying through us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SharingState {
    #[default]
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TRYING_TO_SHARE_ACCESS")]
    TryingToShare,
    #[serde(rename = "SHARING_ACCESS")]
    Sharing,
}

impl fmt::Display for GettingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::TryingToGet => write!(f, "trying_to_get"),
            Self::Getting => write!(f, "getting"),
        }
    }
}

impl fmt::Display for SharingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::TryingToShare => write!(f, "trying_to_share"),
            Self::Sharing => write!(f, "sharing"),
        }
    }
}

/// Payload of a STATE update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(rename = "bytesSent")]
    pub bytes_sent: u64,
    #[serde(rename = "bytesReceived")]
    pub bytes_received: u64,
    #[serde(rename = "localGettingFromRemote")]
    pub getting_state: GettingState,
    #[serde(rename = "localSharingWithRemote")]
    pub sharing_state: SharingState,
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A sharer endpoint was created
    ShareStarting,
    /// The sharer endpoint reported readiness
    ShareReady,
    /// Sharing was stopped locally
    ShareStopRequested,
    /// The sharer endpoint closed
    ShareClosed,
    /// A sharer already replaced by a newer one closed
    SupersededShareClosed,
    /// A start replaced a session that had not finished closing
    ReplacedWhileClosing,
    /// A getter endpoint was created
    GetStarting,
    /// The getter is listening and negotiated
    GetStarted,
    /// The getter failed to start
    GetFailed,
    /// Getting was stopped locally
    GetStopRequested,
    /// The getter began stopping
    GetStoppingBegan,
    /// A getter already replaced by a newer one began stopping
    SupersededGetStoppingBegan,
    /// Bytes sent to the peer by either endpoint
    BytesSent(u64),
    /// Bytes received from the peer by either endpoint
    BytesReceived(u64),
    /// The coalescing window for byte updates elapsed
    RefreshElapsed,
}

/// Work the orchestrator must carry out after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Report an update through the sink
    Report(Update),
    /// Arm the coalescing timer; it feeds back `RefreshElapsed`
    ScheduleRefresh,
}

/// Role states and byte counters of one remote connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    getting: GettingState,
    sharing: SharingState,
    bytes_sent: u64,
    bytes_received: u64,
    refresh_pending: bool,
}

impl ConnectionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn getting(&self) -> GettingState {
        self.getting
    }

    pub fn sharing(&self) -> SharingState {
        self.sharing
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Whether a coalesced refresh is armed
    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            getting_state: self.getting,
            sharing_state: self.sharing,
        }
    }

    fn state_report(&self) -> Effect {
        Effect::Report(Update::State(self.snapshot()))
    }

    fn reset_counters(&mut self) {
        self.bytes_sent = 0;
        self.bytes_received = 0;
    }

    fn bytes_changed(&mut self) -> Vec<Effect> {
        if self.refresh_pending {
            return Vec::new();
        }
        self.refresh_pending = true;
        vec![Effect::ScheduleRefresh]
    }

    /// Apply one event and return the effects it produces
    pub fn apply(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::ShareStarting => {
                self.sharing = SharingState::TryingToShare;
                vec![self.state_report()]
            }
            SessionEvent::ShareReady => {
                if self.sharing != SharingState::TryingToShare {
                    return Vec::new();
                }
                self.sharing = SharingState::Sharing;
                vec![Effect::Report(Update::StartGiving), self.state_report()]
            }
            SessionEvent::ShareStopRequested => {
                if self.sharing == SharingState::None {
                    return Vec::new();
                }
                self.sharing = SharingState::None;
                vec![self.state_report()]
            }
            SessionEvent::ShareClosed => {
                self.sharing = SharingState::None;
                self.reset_counters();
                vec![Effect::Report(Update::StopGiving), self.state_report()]
            }
            SessionEvent::SupersededShareClosed => {
                // Role state and counters belong to the replacement session
                vec![Effect::Report(Update::StopGiving), self.state_report()]
            }
            SessionEvent::ReplacedWhileClosing => {
                self.reset_counters();
                Vec::new()
            }
            SessionEvent::GetStarting => {
                self.getting = GettingState::TryingToGet;
                vec![self.state_report()]
            }
            SessionEvent::GetStarted => {
                if self.getting != GettingState::TryingToGet {
                    return Vec::new();
                }
                self.getting = GettingState::Getting;
                vec![self.state_report()]
            }
            SessionEvent::GetFailed => {
                self.getting = GettingState::None;
                vec![self.state_report()]
            }
            SessionEvent::GetStopRequested => {
                if self.getting == GettingState::None {
                    return Vec::new();
                }
                self.getting = GettingState::None;
                vec![self.state_report()]
            }
            SessionEvent::GetStoppingBegan => {
                // Only a session that was fully up ending on its own is an error
                let is_error = self.getting == GettingState::Getting;
                self.getting = GettingState::None;
                self.reset_counters();
                vec![
                    Effect::Report(Update::StopGetting(is_error)),
                    self.state_report(),
                ]
            }
            SessionEvent::SupersededGetStoppingBegan => {
                // Always stopped locally before being replaced
                vec![
                    Effect::Report(Update::StopGetting(false)),
                    self.state_report(),
                ]
            }
            SessionEvent::BytesSent(n) => {
                self.bytes_sent = self.bytes_sent.saturating_add(n);
                self.bytes_changed()
            }
            SessionEvent::BytesReceived(n) => {
                self.bytes_received = self.bytes_received.saturating_add(n);
                self.bytes_changed()
            }
            SessionEvent::RefreshElapsed => {
                self.refresh_pending = false;
                vec![self.state_report()]
            }
        }
    }
}
