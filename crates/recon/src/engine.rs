use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info};

use crate::error::PersistenceError;
use crate::model::{Friend, HistoryEntry, NormalizedEntry, ReconOutcome, RemovalRecord};
use crate::store::{RosterStore, RosterTx};

/// Reconcile a new roster against the store, stamped with the current time.
pub fn reconcile<S: RosterStore>(
    store: &mut S,
    entries: &[NormalizedEntry],
    source_label: &str,
) -> Result<ReconOutcome, PersistenceError> {
    reconcile_at(store, entries, source_label, Utc::now())
}

/// Reconcile a new roster against the store at `now`.
///
/// Removed friends are deactivated and logged, added friends are inserted
/// (or their inactive record replaced), continuing friends are touched, and
/// one history row is appended. Everything runs in a single unit of work.
pub fn reconcile_at<S: RosterStore>(
    store: &mut S,
    entries: &[NormalizedEntry],
    source_label: &str,
    now: DateTime<Utc>,
) -> Result<ReconOutcome, PersistenceError> {
    if entries.is_empty() {
        return Err(PersistenceError::Constraint("refusing to reconcile an empty roster".into()));
    }

    let result = store.unit_of_work(|tx| apply(tx, entries, source_label, now));
    match &result {
        Ok(outcome) => info!(
            source = source_label,
            total = outcome.total_active,
            removed = outcome.removed.len(),
            added = outcome.added.len(),
            "roster reconciled"
        ),
        Err(e) => error!(source = source_label, error = %e, "reconciliation rolled back"),
    }
    result
}

fn apply(
    tx: &mut dyn RosterTx,
    entries: &[NormalizedEntry],
    source_label: &str,
    now: DateTime<Utc>,
) -> Result<ReconOutcome, PersistenceError> {
    let active = tx.active_names()?;

    let new_names: BTreeSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    if new_names.len() != entries.len() {
        return Err(PersistenceError::Constraint("roster contains duplicate names".into()));
    }

    let removed: BTreeSet<String> = active
        .iter()
        .filter(|name| !new_names.contains(name.as_str()))
        .cloned()
        .collect();
    let added: BTreeSet<String> = new_names
        .iter()
        .filter(|name| !active.contains(**name))
        .map(|name| name.to_string())
        .collect();

    for name in &removed {
        let duration_days = tx.deactivate_friend(name, now)?;
        tx.append_removal(&RemovalRecord { name: name.clone(), removed_at: now, duration_days })?;
    }

    for entry in entries {
        if !added.contains(&entry.name) {
            tx.touch_friend(&entry.name, now)?;
            continue;
        }
        let friend = Friend::first_sighting(entry, now);
        match tx.find_friend(&entry.name)? {
            None => tx.insert_friend(&friend)?,
            Some(prior) if !prior.is_active() => tx.update_friend(&friend)?,
            Some(_) => {
                return Err(PersistenceError::Constraint(format!(
                    "'{}' is active but missing from the active roster",
                    entry.name
                )))
            }
        }
    }

    tx.append_history(&HistoryEntry {
        total_active_count: new_names.len(),
        removed_count: removed.len(),
        added_count: added.len(),
        recorded_at: now,
        source_label: source_label.to_string(),
    })?;

    Ok(ReconOutcome { removed, added, total_active: new_names.len(), recorded_at: now })
}

// ---------------------------------------------------------------------------
// Serialized access
// ---------------------------------------------------------------------------

/// Owns a store and lets one reconciliation run at a time, so a shared
/// reconciler never interleaves "read roster, diff, write".
pub struct Reconciler<S> {
    store: Mutex<S>,
}

impl<S: RosterStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store: Mutex::new(store) }
    }

    pub fn reconcile(
        &self,
        entries: &[NormalizedEntry],
        source_label: &str,
    ) -> Result<ReconOutcome, PersistenceError> {
        reconcile(&mut *self.store.lock(), entries, source_label)
    }

    pub fn reconcile_at(
        &self,
        entries: &[NormalizedEntry],
        source_label: &str,
        now: DateTime<Utc>,
    ) -> Result<ReconOutcome, PersistenceError> {
        reconcile_at(&mut *self.store.lock(), entries, source_label, now)
    }

    pub fn into_inner(self) -> S {
        self.store.into_inner()
    }
}
