//! Configuration module for peer-proxy-core
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use peer_proxy_core::config::{load_config, Config};
//!
//! let config = load_config("/etc/peer-proxy/config.json").unwrap();
//! println!("ICE servers: {}", config.network.ice_servers.len());
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{Config, IceServer, LogConfig, NetworkConfig, OrchestratorConfig};
