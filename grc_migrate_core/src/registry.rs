//! The ordered set of known migration units.

use std::collections::HashMap;

use crate::error::MigrationError;
use crate::migration::Migration;
use crate::version::Version;

/// A unit together with its parsed version and prerequisites.
pub struct RegistryEntry {
    version: Version,
    requires: Vec<Version>,
    unit: Box<dyn Migration>,
}

impl RegistryEntry {
    /// The parsed version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Parsed prerequisites.
    pub fn requires(&self) -> &[Version] {
        &self.requires
    }

    /// The unit itself.
    pub fn unit(&self) -> &dyn Migration {
        self.unit.as_ref()
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("version", &self.version)
            .field("name", &self.unit.name())
            .field("requires", &self.requires)
            .finish()
    }
}

/// All known units, sorted by version.
///
/// Construction fails when two units share a version, when a version does not
/// parse, or when a prerequisite is unknown or names the unit itself.
/// Duplicated logical changes under distinct versions are allowed; their
/// guards make the second one a no-op.
///
/// A prerequisite may be newer than the unit requiring it. That is how a
/// late fixup with a back-dated version declares the change it repairs: on a
/// database where the repaired unit is applied the fixup runs out of order,
/// and on a fresh database the runner refuses before executing anything.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
    index: HashMap<Version, usize>,
}

impl Registry {
    /// Builds and validates a registry.
    pub fn new(
        units: impl IntoIterator<Item = Box<dyn Migration>>,
    ) -> Result<Self, MigrationError> {
        let mut entries = Vec::new();
        for unit in units {
            let version = Version::parse(unit.version())?;
            let requires = unit
                .requires()
                .iter()
                .map(|v| Version::parse(v))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(RegistryEntry {
                version,
                requires,
                unit,
            });
        }
        entries.sort_by(|a, b| a.version.cmp(&b.version));

        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.version.clone(), i).is_some() {
                return Err(MigrationError::InvalidRegistry(format!(
                    "duplicate version {}",
                    entry.version
                )));
            }
        }

        for entry in &entries {
            for prerequisite in &entry.requires {
                if !index.contains_key(prerequisite) {
                    return Err(MigrationError::InvalidRegistry(format!(
                        "migration {} requires unknown migration {}",
                        entry.version, prerequisite
                    )));
                }
                if prerequisite == &entry.version {
                    return Err(MigrationError::InvalidRegistry(format!(
                        "migration {} requires itself",
                        entry.version
                    )));
                }
            }
        }

        Ok(Self { entries, index })
    }

    /// Units in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    /// Looks up a unit by version.
    pub fn get(&self, version: &Version) -> Option<&RegistryEntry> {
        self.index.get(version).map(|&i| &self.entries[i])
    }

    /// Whether the version is registered.
    pub fn contains(&self, version: &Version) -> bool {
        self.index.contains_key(version)
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The highest registered version.
    pub fn latest(&self) -> Option<&Version> {
        self.entries.last().map(|e| &e.version)
    }
}
