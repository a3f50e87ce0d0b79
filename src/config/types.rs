//! Configuration types for peer-proxy-core
//!
//! This module defines the configuration structures consumed by the
//! orchestrator. Network settings are read once at endpoint construction
//! and never mutated by the core.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// URL schemes accepted for ICE servers
const ICE_URL_SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Tunnel negotiation settings shared by every remote connection
    #[serde(default)]
    pub network: NetworkConfig,

    /// Orchestrator tuning
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        self.orchestrator.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a default configuration with a public STUN server
    #[must_use]
    pub fn default_config() -> Self {
        Self {
            network: NetworkConfig {
                ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
                allow_non_unicast: false,
            },
            orchestrator: OrchestratorConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// A rendezvous or relay server used during tunnel negotiation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IceServer {
    /// Server URLs (`stun:`, `stuns:`, `turn:` or `turns:`)
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Create a STUN server entry with a single URL
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Create a TURN server entry with credentials
    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Whether any URL of this entry is a relay
    #[must_use]
    pub fn is_turn(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }

    /// Validate the server entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::ValidationError(
                "ICE server must have at least one URL".into(),
            ));
        }

        for url in &self.urls {
            if !ICE_URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported ICE server URL: {url}"
                )));
            }
        }

        if self.is_turn() && (self.username.is_none() || self.credential.is_none()) {
            return Err(ConfigError::ValidationError(format!(
                "TURN server {} requires username and credential",
                self.urls[0]
            )));
        }

        Ok(())
    }
}

/// Network settings handed to every endpoint at construction time
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// ICE servers for NAT traversal
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,

    /// Let the exit node reach broadcast, multicast and private destinations
    #[serde(default)]
    pub allow_non_unicast: bool,
}

impl NetworkConfig {
    /// Validate network configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Coalescing window for byte-count driven STATE updates (milliseconds)
    #[serde(default = "default_state_update_interval_ms")]
    pub state_update_interval_ms: u64,

    /// Local address the getter listens on; port 0 picks an ephemeral port
    #[serde(default = "default_getter_bind_address")]
    pub getter_bind_address: SocketAddr,
}

impl OrchestratorConfig {
    /// Get the coalescing window as a Duration
    #[must_use]
    pub const fn state_update_interval(&self) -> Duration {
        Duration::from_millis(self.state_update_interval_ms)
    }

    /// Validate orchestrator configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_update_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "state_update_interval_ms must be greater than 0".into(),
            ));
        }

        if !self.getter_bind_address.ip().is_loopback() {
            return Err(ConfigError::ValidationError(format!(
                "getter_bind_address must be a loopback address: {}",
                self.getter_bind_address
            )));
        }

        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            state_update_interval_ms: default_state_update_interval_ms(),
            getter_bind_address: default_getter_bind_address(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {other}"
                )))
            }
        }

        if self.format != "json" && self.format != "text" {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {} (expected \"json\" or \"text\")",
                self.format
            )));
        }

        Ok(())
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

const fn default_state_update_interval_ms() -> u64 {
    1000
}

fn default_getter_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

const fn default_true() -> bool {
    true
}
