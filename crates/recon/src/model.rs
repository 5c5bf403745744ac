use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A single friend name produced by the ingest parser.
///
/// `name` is trimmed and unique within one parse. `timestamp` is the
/// source's epoch seconds, 0 when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedEntry {
    pub name: String,
    pub timestamp: i64,
}

impl NormalizedEntry {
    pub fn new(name: impl Into<String>, timestamp: i64) -> Self {
        Self { name: name.into(), timestamp }
    }
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendStatus {
    Active,
    Inactive,
}

impl FriendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::fmt::Display for FriendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One friend record. The store keeps a single record per name; a
/// re-friend replaces the inactive record with a fresh one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Friend {
    pub name: String,
    pub external_timestamp: i64,
    pub status: FriendStatus,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Friend {
    /// A newly observed friend: active, first seen now.
    pub fn first_sighting(entry: &NormalizedEntry, now: DateTime<Utc>) -> Self {
        Self {
            name: entry.name.clone(),
            external_timestamp: entry.timestamp,
            status: FriendStatus::Active,
            first_seen: now,
            last_updated: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == FriendStatus::Active
    }
}

/// Audit row written when an active friend disappears from a roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalRecord {
    pub name: String,
    pub removed_at: DateTime<Utc>,
    pub duration_days: i64,
}

/// One row of the append-only check ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub total_active_count: usize,
    pub removed_count: usize,
    pub added_count: usize,
    pub recorded_at: DateTime<Utc>,
    pub source_label: String,
}

/// Whole days between `first_seen` and `removed_at`, floored. A clock that
/// went backwards yields 0.
pub fn duration_days(first_seen: DateTime<Utc>, removed_at: DateTime<Utc>) -> i64 {
    (removed_at - first_seen).num_days().max(0)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Result of one reconciliation. Sets are ordered so every consumer sees
/// the same listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconOutcome {
    pub removed: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub total_active: usize,
    pub recorded_at: DateTime<Utc>,
}

impl ReconOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}
