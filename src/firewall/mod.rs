//! Network-input validation for peer-asserted data
//!
//! Some values received over the wire are used directly as lookup keys or
//! stored in the roster. Everything a peer asserts about itself (profiles,
//! client states, chat messages) passes through this module first.
//!
//! # Overview
//!
//! - [`schema`]: exact-match schema checks over JSON records
//! - [`identifier`]: reserved-word and built-in collision checks for ids
//! - [`records`]: the fixed record schemas and their validators
//! - [`policy`]: response policies notified of every rejection
//!
//! All validators are pure with respect to their input and return `bool`;
//! failures are only visible through the injected [`ResponsePolicy`].
//!
//! # Example
//!
//! ```
//! use peer_proxy_core::firewall::Firewall;
//! use serde_json::json;
//!
//! let firewall = Firewall::default();
//! assert!(firewall.is_valid_user_profile(&json!({"userId": "alice"})));
//! assert!(!firewall.is_valid_user_profile(&json!({"userId": "alice", "x": 1})));
//! ```

pub mod identifier;
pub mod policy;
pub mod records;
pub mod schema;

use std::sync::Arc;

use serde_json::Value;

pub use identifier::{
    has_bad_chars, is_builtin_member, is_client_id, is_reserved_word, is_user_id,
    BUILTIN_MEMBERS, RESERVED_WORDS,
};
pub use policy::{DefaultResponsePolicy, RecordingResponsePolicy, ResponsePolicy, Severity};
pub use records::{
    is_valid_client_state, is_valid_incoming_message, is_valid_user_profile, parse_client_state,
    parse_incoming_message, parse_user_profile, ClientState, IncomingMessage, UserProfile,
    CLIENT_STATE_SCHEMA, INCOMING_MESSAGE_SCHEMA, USER_PROFILE_SCHEMA,
};
pub use schema::{check_schema, schema_from_tags, FieldSpec, FieldType, SchemaError};

/// Validator bound to one response policy
///
/// Defaults to [`DefaultResponsePolicy`], which only logs.
#[derive(Clone)]
pub struct Firewall {
    policy: Arc<dyn ResponsePolicy>,
}

impl Firewall {
    /// Create a firewall reporting to `policy`
    pub fn new(policy: Arc<dyn ResponsePolicy>) -> Self {
        Self { policy }
    }

    /// The policy failures are reported to
    pub fn policy(&self) -> &dyn ResponsePolicy {
        self.policy.as_ref()
    }

    pub fn is_user_id(&self, s: &str) -> bool {
        is_user_id(s, self.policy())
    }

    pub fn is_client_id(&self, s: &str) -> bool {
        is_client_id(s, self.policy())
    }

    pub fn is_valid_user_profile(&self, profile: &Value) -> bool {
        is_valid_user_profile(profile, self.policy())
    }

    pub fn is_valid_client_state(&self, state: &Value) -> bool {
        is_valid_client_state(state, self.policy())
    }

    pub fn is_valid_incoming_message(&self, message: &Value) -> bool {
        is_valid_incoming_message(message, self.policy())
    }

    pub fn parse_user_profile(&self, profile: &Value) -> Option<UserProfile> {
        parse_user_profile(profile, self.policy())
    }

    pub fn parse_client_state(&self, state: &Value) -> Option<ClientState> {
        parse_client_state(state, self.policy())
    }

    pub fn parse_incoming_message(&self, message: &Value) -> Option<IncomingMessage> {
        parse_incoming_message(message, self.policy())
    }
}

impl Default for Firewall {
    fn default() -> Self {
        Self::new(Arc::new(DefaultResponsePolicy))
    }
}

impl std::fmt::Debug for Firewall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Firewall").finish_non_exhaustive()
    }
}
