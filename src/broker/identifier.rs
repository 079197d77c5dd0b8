//! # Identifier Sanitizer
//!
//! Database and role names cannot be bound as statement parameters, so they
//! are interpolated into administrative statements. Every such name goes
//! through [`clean`] first and travels as a [`SafeIdentifier`].
//!
//! ## Accepted characters
//!
//! ASCII letters and ASCII digits. Everything else is dropped, including
//! `_`, `-`, whitespace, quotes, control characters and non-ASCII letters.
//! Characters are removed, never escaped or replaced.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use super::errors::{BrokerError, BrokerResult};

/// PostgreSQL `NAMEDATALEN - 1`
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 63;

/// Whether a character may appear in an interpolated identifier
pub fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Strip every character that is unsafe in an identifier position.
///
/// `None` and `""` both yield `""`. Safe characters keep their relative order.
pub fn clean(raw: Option<&str>) -> String {
    match raw {
        Some(s) => s.chars().filter(|&c| is_safe_char(c)).collect(),
        None => String::new(),
    }
}

/// A non-empty identifier that has passed through [`clean`].
///
/// There is no way to build one from an arbitrary string without cleaning it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SafeIdentifier(String);

impl SafeIdentifier {
    /// Clean `raw` and truncate it to `max_len` characters.
    ///
    /// `field` names the identifier in the error when nothing survives.
    pub fn parse(field: &str, raw: &str, max_len: usize) -> BrokerResult<Self> {
        let mut cleaned = clean(Some(raw));
        // all remaining chars are single-byte
        cleaned.truncate(max_len);
        if cleaned.is_empty() {
            return Err(BrokerError::invalid_identifier(field, raw));
        }
        Ok(Self(cleaned))
    }

    /// Get the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for statement text.
    ///
    /// Quoting keeps mixed case intact; the content can never contain `"`.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Consume into the inner string
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SafeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SafeIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Naming rules for generated and supplied identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierPolicy {
    /// Prefix for generated database names
    pub database_prefix: String,
    /// Prefix for generated usernames
    pub username_prefix: String,
    /// Maximum identifier length accepted by the server
    pub max_length: usize,
}

impl IdentifierPolicy {
    /// Sanitize an externally supplied identifier
    pub fn sanitize(&self, field: &str, raw: &str) -> BrokerResult<SafeIdentifier> {
        SafeIdentifier::parse(field, raw, self.max_length)
    }

    /// Database name generated from a service instance id.
    ///
    /// Deterministic, so a retried create targets the same database.
    pub fn database_for_instance(&self, instance_id: &str) -> BrokerResult<SafeIdentifier> {
        if clean(Some(instance_id)).is_empty() {
            return Err(BrokerError::invalid_identifier("service instance id", instance_id));
        }
        self.sanitize(
            "database",
            &format!("{}{}", self.database_prefix, instance_id),
        )
    }

    /// Username generated from a binding id
    pub fn username_for_binding(&self, binding_id: &str) -> BrokerResult<SafeIdentifier> {
        if clean(Some(binding_id)).is_empty() {
            return Err(BrokerError::invalid_identifier("binding id", binding_id));
        }
        self.sanitize("username", &format!("{}{}", self.username_prefix, binding_id))
    }

    /// Username for a binding request that carries no id
    pub fn random_username(&self) -> BrokerResult<SafeIdentifier> {
        let suffix = Uuid::new_v4().simple().to_string();
        self.sanitize("username", &format!("{}{}", self.username_prefix, suffix))
    }
}

impl Default for IdentifierPolicy {
    fn default() -> Self {
        Self {
            database_prefix: "db".to_string(),
            username_prefix: "u".to_string(),
            max_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOSTILE: &[&str] = &[
        "",
        "foo",
        "&^{ /\x0cfoo **// b;a} %r$#",
        "robert'); DROP DATABASE students;--",
        "\"quoted\"",
        "tab\tnew\nline\r",
        "under_score-hyphen.dot",
        "ünïcödé名前",
        "null\0byte",
        "$1 OR 1=1",
        "back\\slash",
        "   ",
    ];

    #[test]
    fn test_clean_reference_cases() {
        assert_eq!(clean(Some("foo")), "foo");
        assert_eq!(clean(Some("&^{ /\x0cfoo **// b;a} %r$#")), "foobar");
        assert_eq!(clean(Some("")), "");
        assert_eq!(clean(None), "");
    }

    #[test]
    fn test_clean_keeps_only_safe_chars() {
        for raw in HOSTILE {
            let cleaned = clean(Some(raw));
            assert!(cleaned.chars().all(is_safe_char), "{:?} -> {:?}", raw, cleaned);
        }
    }

    #[test]
    fn test_clean_preserves_order() {
        for raw in HOSTILE {
            let expected: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            assert_eq!(clean(Some(raw)), expected);
        }
    }

    #[test]
    fn test_clean_is_idempotent() {
        for raw in HOSTILE {
            let once = clean(Some(raw));
            assert_eq!(clean(Some(&once)), once);
        }
    }

    #[test]
    fn test_narrow_acceptance_set() {
        assert_eq!(clean(Some("a_b-c.d")), "abcd");
        assert_eq!(clean(Some("ü1")), "1");
    }

    #[test]
    fn test_safe_identifier_rejects_empty() {
        let err = SafeIdentifier::parse("database", "%$#", 63).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidIdentifier { .. }));
        assert!(SafeIdentifier::parse("database", "", 63).is_err());
    }

    #[test]
    fn test_safe_identifier_truncates() {
        let id = SafeIdentifier::parse("database", &"x".repeat(100), 63).unwrap();
        assert_eq!(id.as_str().len(), 63);
    }

    #[test]
    fn test_quoted() {
        let id = SafeIdentifier::parse("username", "aUser\"; --", 63).unwrap();
        assert_eq!(id.quoted(), "\"aUser\"");
    }

    #[test]
    fn test_generated_database_name() {
        let policy = IdentifierPolicy::default();
        let id = policy
            .database_for_instance("6f1c-4e2a-bb10")
            .unwrap();
        assert_eq!(id.as_str(), "db6f1c4e2abb10");
        assert_eq!(
            policy.database_for_instance("6f1c-4e2a-bb10").unwrap(),
            id
        );
        assert!(policy.database_for_instance("---").is_err());
    }

    #[test]
    fn test_generated_usernames() {
        let policy = IdentifierPolicy::default();
        assert_eq!(policy.username_for_binding("b-1").unwrap().as_str(), "ub1");

        let a = policy.random_username().unwrap();
        let b = policy.random_username().unwrap();
        assert!(a.as_str().starts_with('u'));
        assert_ne!(a, b);
    }
}
