//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::{Config, IceServer};
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: {} ICE servers, allow_non_unicast={}",
        config.network.ice_servers.len(),
        config.network.allow_non_unicast
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `PEER_PROXY_LOG_LEVEL`: Override log level
/// - `PEER_PROXY_ALLOW_NON_UNICAST`: Override the non-unicast policy flag
/// - `PEER_PROXY_ICE_SERVERS`: Comma-separated STUN URLs replacing the server list
/// - `PEER_PROXY_BIND_ADDR`: Override the getter bind address
///
/// # Errors
///
/// Returns `ConfigError` if loading or parsing fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Apply overrides from a variable lookup, then re-validate
fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(level) = lookup("PEER_PROXY_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(flag) = lookup("PEER_PROXY_ALLOW_NON_UNICAST") {
        config.network.allow_non_unicast = match flag.to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ConfigError::EnvError {
                    name: "PEER_PROXY_ALLOW_NON_UNICAST".into(),
                    reason: format!("Invalid boolean: {flag}"),
                })
            }
        };
        debug!(
            "allow_non_unicast overridden to {}",
            config.network.allow_non_unicast
        );
    }

    if let Some(servers) = lookup("PEER_PROXY_ICE_SERVERS") {
        config.network.ice_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(IceServer::stun)
            .collect();
        debug!(
            "ICE servers overridden ({} entries)",
            config.network.ice_servers.len()
        );
    }

    if let Some(addr) = lookup("PEER_PROXY_BIND_ADDR") {
        config.orchestrator.getter_bind_address =
            addr.parse().map_err(|_| ConfigError::EnvError {
                name: "PEER_PROXY_BIND_ADDR".into(),
                reason: format!("Invalid socket address: {addr}"),
            })?;
        debug!(
            "Getter bind address overridden to {}",
            config.orchestrator.getter_bind_address
        );
    }

    // Re-validate after overrides
    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
