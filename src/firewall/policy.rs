//! Response policies for validation failures
//!
//! A policy observes rejections; it never decides them. Every rejection path
//! in the firewall calls [`ResponsePolicy::on_validation_failure`] exactly
//! once and then returns `false` regardless of what the policy does.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

/// How suspicious a rejected input looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Incorrect input. No claims on intent.
    MalformedInput,
    /// Looks like a deliberate attempt to force a failure, e.g. an
    /// identifier that names a special property of a key-value container.
    LikelyAttack,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInput => write!(f, "malformed_input"),
            Self::LikelyAttack => write!(f, "likely_attack"),
        }
    }
}

/// Capability notified of every validation failure
pub trait ResponsePolicy: Send + Sync {
    /// Called once per rejected input with the offending text
    fn on_validation_failure(&self, text: &str, severity: Severity);
}

impl<F> ResponsePolicy for F
where
    F: Fn(&str, Severity) + Send + Sync,
{
    fn on_validation_failure(&self, text: &str, severity: Severity) {
        self(text, severity);
    }
}

/// Policy that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResponsePolicy;

impl ResponsePolicy for DefaultResponsePolicy {
    fn on_validation_failure(&self, text: &str, severity: Severity) {
        warn!(severity = %severity, text = %text, "Message validation failure");
    }
}

/// Policy that keeps every failure for later inspection
///
/// Useful for upstream monitoring that wants counts per severity.
#[derive(Debug, Default)]
pub struct RecordingResponsePolicy {
    failures: Mutex<Vec<(String, Severity)>>,
}

impl RecordingResponsePolicy {
    /// Create an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded failures in arrival order
    pub fn failures(&self) -> Vec<(String, Severity)> {
        self.failures.lock().clone()
    }

    /// Total number of recorded failures
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }

    /// Number of failures recorded with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.failures
            .lock()
            .iter()
            .filter(|(_, s)| *s == severity)
            .count()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.failures.lock().clear();
    }
}

impl ResponsePolicy for RecordingResponsePolicy {
    fn on_validation_failure(&self, text: &str, severity: Severity) {
        self.failures.lock().push((text.to_string(), severity));
    }
}
