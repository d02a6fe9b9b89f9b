//! Allow-listed SQL identifiers.

use std::borrow::Cow;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::MigrationError;

/// Postgres truncates identifiers longer than this.
pub const MAX_IDENT_LEN: usize = 63;

/// A table, column, index or constraint name.
///
/// Identifiers are restricted to `[a-z_][a-z0-9_]*` and at most
/// [`MAX_IDENT_LEN`] bytes, so they can be spliced into DDL without escaping.
/// Identifiers built from `&'static str` are checked when the statement or
/// probe carrying them reaches a [`MigrationContext`](crate::MigrationContext);
/// runtime strings go through [`Ident::new`], which checks immediately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(Cow<'static, str>);

impl Ident {
    /// Validates a runtime identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, MigrationError> {
        let ident = Self(Cow::Owned(value.into()));
        ident.validate()?;
        Ok(ident)
    }

    /// Wraps a statically authored identifier. Validation happens at execution.
    pub const fn from_static(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }

    /// Returns a new identifier `{prefix}{self}{suffix}`, validated.
    pub fn decorate(&self, prefix: &str, suffix: &str) -> Result<Self, MigrationError> {
        Self::new(format!("{prefix}{}{suffix}", self.0))
    }

    /// The raw identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks the identifier against the allow-list.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if is_valid(&self.0) {
            Ok(())
        } else {
            Err(MigrationError::InvalidIdentifier(self.0.to_string()))
        }
    }
}

fn is_valid(value: &str) -> bool {
    let mut bytes = value.bytes();
    let Some(first) = bytes.next() else {
        return false;
    };
    value.len() <= MAX_IDENT_LEN
        && (first.is_ascii_lowercase() || first == b'_')
        && bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

impl From<&'static str> for Ident {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Ident {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_snake_case() {
        assert!(Ident::new("compliance_requirement_fulfillment").is_ok());
        assert!(Ident::new("_grc_migrations").is_ok());
        assert!(Ident::new("fk_308ae2429033212a").is_ok());
    }

    #[test]
    fn rejects_injection_attempts() {
        assert!(Ident::new("tenant; DROP TABLE users").is_err());
        assert!(Ident::new("Tenant").is_err());
        assert!(Ident::new("\"quoted\"").is_err());
        assert!(Ident::new("1table").is_err());
        assert!(Ident::new("").is_err());
    }

    #[test]
    fn rejects_overlong_identifiers() {
        assert!(Ident::new("a".repeat(MAX_IDENT_LEN)).is_ok());
        assert!(Ident::new("a".repeat(MAX_IDENT_LEN + 1)).is_err());
    }

    #[test]
    fn static_identifiers_are_checked_on_validate() {
        assert!(Ident::from_static("bad name").validate().is_err());
        assert!(Ident::from_static("good_name").validate().is_ok());
    }

    #[test]
    fn decorate_builds_conventional_names() {
        let table = Ident::from_static("training");
        assert_eq!(table.decorate("fk_", "_tenant").unwrap().as_str(), "fk_training_tenant");
        assert!(table.decorate("FK_", "").is_err());
    }
}
