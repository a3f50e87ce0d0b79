//! peer-proxy-core: per-peer tunnel orchestration for a peer-to-peer proxy
//!
//! For every remote peer the local process can, at the same time, route its
//! own traffic through the peer ("getting") and let the peer route traffic
//! through this machine ("sharing"). This crate coordinates those two roles
//! and validates the data peers assert about themselves.
//!
//! # Features
//!
//! - **Orchestration**: independent sharer/getter lifecycles per peer with
//!   race-free teardown and renegotiation
//! - **Signalling**: direction-based routing, with early candidates held
//!   until the sharer they belong to exists
//! - **Reporting**: state, lifecycle and signalling updates with coalesced
//!   byte counters
//! - **Firewall**: exact-match schema validation of peer records and
//!   identifier collision checks
//!
//! # Architecture
//!
//! ```text
//! signalling ──▶ RemoteConnection ──▶ SharerEndpoint / GetterEndpoint
//!                      │
//!                      ▼
//!                 UpdateSink ──▶ UI / persistence
//!
//! peer records ──▶ Firewall ──▶ ResponsePolicy (on rejection)
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use peer_proxy_core::config::load_config;
//! use peer_proxy_core::connection::RemoteConnection;
//! use peer_proxy_core::endpoint::{ScriptedGetterFactory, ScriptedSharerFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/peer-proxy/config.json")?;
//! let (tx, mut updates) = tokio::sync::mpsc::unbounded_channel::<peer_proxy_core::Update>();
//!
//! let connection = RemoteConnection::builder(
//!     Arc::new(tx),
//!     Arc::new(ScriptedSharerFactory::new()),
//!     Arc::new(ScriptedGetterFactory::new()),
//! )
//! .config(&config)
//! .build();
//!
//! let proxy = connection.start_get()?.await?;
//! println!("proxy listening on {proxy}");
//! while let Some(update) = updates.recv().await {
//!     println!("{}", serde_json::to_string(&update)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: The orchestrator, its state machine and updates
//! - [`endpoint`]: Tunnel endpoint contracts and scripted endpoints
//! - [`error`]: Error types
//! - [`firewall`]: Validation of peer-asserted data

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod firewall;

// Re-export commonly used types at the crate root
pub use config::{Config, IceServer, NetworkConfig, OrchestratorConfig};
pub use connection::{
    GettingState, RemoteConnection, SharingState, SignalDirection, SignallingMessage,
    StateSnapshot, Update, UpdateSink,
};
pub use endpoint::{EndpointError, GetterFactory, SharerFactory};
pub use error::{ConfigError, OrchestratorError};
pub use firewall::{Firewall, ResponsePolicy, Severity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
