//! Tunnel endpoints driven by the connection orchestrator
//!
//! - [`traits`]: the sharer/getter contracts and their factories
//! - [`scripted`]: in-memory endpoints whose lifecycle is caller-driven
//!
//! Concrete transports (SOCKS front end, encrypted data channels, NAT
//! traversal) live behind these traits and are not part of this crate.

pub mod scripted;
pub mod traits;

pub use scripted::{ScriptedGetter, ScriptedGetterFactory, ScriptedSharer, ScriptedSharerFactory};
pub use traits::{
    EndpointError, EndpointEvent, GetterEndpoint, GetterFactory, GetterSession, SharerConfig,
    SharerEndpoint, SharerFactory, SharerSession,
};
