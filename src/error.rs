//! Error types for peer-proxy-core
//!
//! This module defines the error hierarchy for the connection orchestrator
//! and its configuration layer. Validation failures are deliberately absent:
//! the firewall reports them through a response policy and returns `bool`.

use std::io;

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Errors surfaced by the public `RemoteConnection` operations
///
/// Only operation conflicts and tunnel setup failures reach callers;
/// unroutable signals are logged and dropped inside the orchestrator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    /// `start_share` called while a sharer endpoint exists
    #[error("Sharer endpoint already exists")]
    ShareInProgress,

    /// `start_get` called while a getter session exists
    #[error("Currently have a connection open")]
    GetInProgress,

    /// The tunnel endpoint failed during negotiation.
    ///
    /// Carries no collaborator detail.
    #[error("Could not start proxy")]
    TunnelSetup,

    /// The session behind a completion handle was stopped or superseded
    #[error("Session was cancelled before completing")]
    Cancelled,
}

impl OrchestratorError {
    /// Conflicts are caller bugs; setup failures and cancellations may be retried
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::TunnelSetup | Self::Cancelled)
    }

    /// Check whether this error signals a caller programming error
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ShareInProgress | Self::GetInProgress)
    }
}
