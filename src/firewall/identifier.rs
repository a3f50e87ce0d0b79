//! Identifier checks for peer-asserted user and client ids
//!
//! Peer ids end up as keys in generic key-value containers on the
//! receiving side. Names that carry special meaning for such containers
//! (prototype linkage, accessor definition) or that collide with members
//! every empty container already has are rejected as likely attacks.
//!
//! # Examples
//!
//! ```
//! use peer_proxy_core::firewall::{is_user_id, RecordingResponsePolicy, Severity};
//!
//! let policy = RecordingResponsePolicy::new();
//! assert!(is_user_id("alice", &policy));
//! assert!(!is_user_id("__proto__", &policy));
//! assert_eq!(policy.count(Severity::LikelyAttack), 1);
//! ```

use super::policy::{ResponsePolicy, Severity};

/// Special property names that alter container behaviour when used as keys
pub const RESERVED_WORDS: &[&str] = &[
    "__proto__",
    "__noSuchMethod__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Members that already resolve on a bare, empty container
pub const BUILTIN_MEMBERS: &[&str] = &[
    "constructor",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "toLocaleString",
    "toString",
    "valueOf",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Whether `s` is one of the reserved special property names
pub fn is_reserved_word(s: &str) -> bool {
    RESERVED_WORDS.contains(&s)
}

/// Whether `s` collides with a member of an empty container
pub fn is_builtin_member(s: &str) -> bool {
    BUILTIN_MEMBERS.contains(&s)
}

/// Character-level screening.
///
/// No character class is excluded yet; this always passes.
// TODO: reject mixed-script confusables once a spoofing policy is chosen.
pub fn has_bad_chars(_s: &str) -> bool {
    false
}

fn is_suspicious(s: &str) -> bool {
    is_reserved_word(s) || has_bad_chars(s) || is_builtin_member(s)
}

/// Validate a peer-asserted user id
///
/// Reports `LikelyAttack` through `response` on rejection.
pub fn is_user_id(s: &str, response: &dyn ResponsePolicy) -> bool {
    if is_suspicious(s) {
        response.on_validation_failure(s, Severity::LikelyAttack);
        return false;
    }
    true
}

/// Validate a peer-asserted client id
///
/// Same checks as [`is_user_id`]; kept separate so the two can diverge.
pub fn is_client_id(s: &str, response: &dyn ResponsePolicy) -> bool {
    if is_suspicious(s) {
        response.on_validation_failure(s, Severity::LikelyAttack);
        return false;
    }
    true
}
