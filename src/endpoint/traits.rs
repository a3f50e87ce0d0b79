//! Tunnel endpoint contracts
//!
//! The orchestrator drives two kinds of tunnel endpoint without knowing
//! their internals:
//!
//! - a **sharer** makes this machine an exit node for the remote peer
//! - a **getter** routes local traffic through the remote peer's exit node
//!
//! Event streams are typed ([`EndpointEvent`]) and delivered over a channel;
//! lifecycle notifications are one-shot channels handed over when the
//! endpoint is created.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::IceServer;
use crate::connection::SignalPayload;

/// Error types for tunnel endpoint operations
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The endpoint could not be constructed
    #[error("Endpoint creation failed: {0}")]
    Creation(String),

    /// Could not bind the local listener
    #[error("Failed to listen on {addr}: {reason}")]
    Listen { addr: SocketAddr, reason: String },

    /// Peer negotiation failed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The endpoint is already closed
    #[error("Endpoint is closed")]
    Closed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Events an endpoint raises while it lives
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    /// Negotiation data to forward to the remote peer
    SignalForPeer(SignalPayload),
    /// Payload bytes received from the remote peer
    BytesReceivedFromPeer(u64),
    /// Payload bytes sent to the remote peer
    BytesSentToPeer(u64),
}

/// Construction parameters for a sharer endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharerConfig {
    /// ICE servers for NAT traversal
    pub ice_servers: Vec<IceServer>,
    /// Let the remote peer reach non-unicast destinations through us
    pub allow_non_unicast: bool,
}

/// A live sharer endpoint
pub trait SharerEndpoint: Send + Sync {
    /// Feed negotiation data received from the remote client
    fn handle_signal_from_peer(&self, payload: SignalPayload);

    /// Ask the endpoint to close; completion arrives on `once_closed`
    fn close(&self);
}

/// Everything a freshly created sharer hands to the orchestrator
pub struct SharerSession {
    pub endpoint: Arc<dyn SharerEndpoint>,
    pub events: mpsc::UnboundedReceiver<EndpointEvent>,
    /// Resolves when the tunnel is ready, or with the setup failure.
    /// Dropping the sender counts as a failure.
    pub once_ready: oneshot::Receiver<Result<(), EndpointError>>,
    /// Resolves when the endpoint has closed for any reason.
    /// Dropping the sender counts as closure.
    pub once_closed: oneshot::Receiver<()>,
}

/// Creates sharer endpoints
pub trait SharerFactory: Send + Sync {
    /// Construct a new sharer
    ///
    /// # Errors
    ///
    /// Returns `EndpointError` if the endpoint cannot be constructed.
    fn create(&self, config: SharerConfig) -> Result<SharerSession, EndpointError>;
}

/// A live getter endpoint
#[async_trait]
pub trait GetterEndpoint: Send + Sync {
    /// Listen on `local` and negotiate a tunnel using `ice_servers`
    ///
    /// Resolves with the bound listening address.
    async fn start(
        &self,
        local: SocketAddr,
        ice_servers: &[IceServer],
    ) -> Result<SocketAddr, EndpointError>;

    /// Stop proxying; fires `once_stopping_began` early on
    async fn stop(&self) -> Result<(), EndpointError>;

    /// Feed negotiation data received from the remote server
    fn handle_signal_from_peer(&self, payload: SignalPayload);
}

/// Everything a freshly created getter hands to the orchestrator
pub struct GetterSession {
    pub endpoint: Arc<dyn GetterEndpoint>,
    pub events: mpsc::UnboundedReceiver<EndpointEvent>,
    /// Fires as soon as stopping begins, before cleanup finishes.
    /// Dropping the sender counts as stopping.
    pub once_stopping_began: oneshot::Receiver<()>,
}

/// Creates getter endpoints
pub trait GetterFactory: Send + Sync {
    /// Construct a new getter
    ///
    /// # Errors
    ///
    /// Returns `EndpointError` if the endpoint cannot be constructed.
    fn create(&self) -> Result<GetterSession, EndpointError>;
}
