//! Sortable migration version keys.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::MigrationError;

/// A timestamp-based migration version such as `20251119010000`.
///
/// Versions are non-empty strings of ASCII digits. They compare numerically,
/// so leading zeros count for neither ordering nor equality: `"01"` and `"1"`
/// are the same version. [`Version::as_str`] keeps the text as authored.
#[derive(Debug, Clone)]
pub struct Version(String);

impl Version {
    /// Parses a version, rejecting empty strings and non-digit characters.
    pub fn parse(value: &str) -> Result<Self, MigrationError> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MigrationError::InvalidVersion(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    /// The version as authored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The digits without leading zeros; `"0"` for an all-zero version.
    fn significant(&self) -> &str {
        match self.0.trim_start_matches('0') {
            "" => "0",
            digits => digits,
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
