//! Data backfill helpers.
//!
//! Backfills run as the tail of a unit's `up`, after its DDL, and copy rows
//! that already exist. They never loop open-endedly and they report what
//! they did, including tenants that were left without rows.

use serde::Serialize;

use crate::ident::Ident;

/// Implementation status derived from a fulfillment percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    /// `percentage <= 0` or unknown.
    NotStarted,
    /// `0 < percentage < 100`.
    InProgress,
    /// `percentage >= 100`.
    Implemented,
}

impl FulfillmentStatus {
    /// Percentage at and above which a requirement counts as implemented.
    pub const FULL_PERCENTAGE: i64 = 100;

    /// Maps a percentage. `None` (a `NULL` column) is not started.
    pub fn from_percentage(percentage: Option<i64>) -> Self {
        match percentage {
            Some(p) if p >= Self::FULL_PERCENTAGE => Self::Implemented,
            Some(p) if p > 0 => Self::InProgress,
            _ => Self::NotStarted,
        }
    }

    /// The stored string value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Implemented => "implemented",
        }
    }
}

/// Which tenant receives rows when legacy data had no tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSelection {
    /// No tenant rows exist; the backfill is skipped.
    NoTenants,
    /// Exactly one tenant.
    Single(i64),
    /// Several tenants; the lowest id is primary and `excluded` receive nothing.
    Primary {
        /// The lowest tenant id.
        tenant: i64,
        /// How many other tenants exist.
        excluded: usize,
    },
}

impl TenantSelection {
    /// Picks the lowest id. Input order does not matter.
    pub fn from_ids(ids: &[i64]) -> Self {
        match ids.iter().min() {
            None => Self::NoTenants,
            Some(&tenant) if ids.len() == 1 => Self::Single(tenant),
            Some(&tenant) => Self::Primary {
                tenant,
                excluded: ids.len() - 1,
            },
        }
    }

    /// The tenant receiving rows, if any.
    pub fn tenant(&self) -> Option<i64> {
        match self {
            Self::NoTenants => None,
            Self::Single(tenant) | Self::Primary { tenant, .. } => Some(*tenant),
        }
    }

    /// Tenants that exist but receive no rows.
    pub fn excluded(&self) -> usize {
        match self {
            Self::Primary { excluded, .. } => *excluded,
            _ => 0,
        }
    }
}

/// Outcome of one backfill step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Table rows were copied into.
    pub target: Ident,
    /// Tenant that received the rows.
    pub tenant: Option<i64>,
    /// Rows inserted.
    pub rows_migrated: u64,
    /// Tenants that exist but received no rows.
    pub tenants_without_rows: usize,
    /// Why the backfill did nothing, when it did nothing on purpose.
    pub skipped: Option<String>,
}

impl BackfillReport {
    /// A backfill that was skipped without touching data.
    pub fn skipped(target: Ident, reason: impl Into<String>) -> Self {
        Self {
            target,
            tenant: None,
            rows_migrated: 0,
            tenants_without_rows: 0,
            skipped: Some(reason.into()),
        }
    }
}
