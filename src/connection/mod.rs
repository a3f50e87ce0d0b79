//! Remote connection orchestration
//!
//! This module provides the per-peer orchestrator and its building blocks:
//! - Signalling messages and the updates reported upward
//! - The session state machine with coalesced byte counters
//! - The sharer-created gate that holds back early candidates
//! - [`RemoteConnection`], which drives sharer and getter endpoints

mod completion;
mod gate;
mod remote;
mod signal;
mod state;
mod update;

pub use completion::Completion;
pub use gate::ReadyGate;
pub use remote::{RemoteConnection, RemoteConnectionBuilder};
pub use signal::{SignalDirection, SignalPayload, SignallingMessage};
pub use state::{ConnectionState, Effect, GettingState, SessionEvent, SharingState, StateSnapshot};
pub use update::{Update, UpdateKind, UpdateSink};
