//! Persistence port for the roster, plus an in-memory implementation.
//!
//! The engine never touches storage directly. It asks a [`RosterStore`] for a
//! unit of work and performs every read and write through the [`RosterTx`]
//! handed to its closure. A store must apply all writes of a unit of work or
//! none of them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::PersistenceError;
use crate::model::{duration_days, Friend, FriendStatus, HistoryEntry, RemovalRecord};

/// Operations available inside one atomic unit of work.
pub trait RosterTx {
    /// Names of every ACTIVE friend.
    fn active_names(&mut self) -> Result<BTreeSet<String>, PersistenceError>;

    /// The record for `name`, active or not.
    fn find_friend(&mut self, name: &str) -> Result<Option<Friend>, PersistenceError>;

    /// Store a friend that has no record yet.
    fn insert_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError>;

    /// Replace the existing record for `friend.name` in full.
    fn update_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError>;

    /// Refresh `last_updated` of an ACTIVE friend.
    fn touch_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<(), PersistenceError>;

    /// Flip an ACTIVE friend to INACTIVE and return whole days since `first_seen`.
    fn deactivate_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<i64, PersistenceError>;

    fn append_removal(&mut self, record: &RemovalRecord) -> Result<(), PersistenceError>;

    fn append_history(&mut self, entry: &HistoryEntry) -> Result<(), PersistenceError>;
}

pub trait RosterStore {
    /// Run `work` atomically. If it returns `Err`, nothing it wrote is kept.
    fn unit_of_work<T, F>(&mut self, work: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut dyn RosterTx) -> Result<T, PersistenceError>;

    fn count_active(&self) -> Result<usize, PersistenceError>;

    fn history_len(&self) -> Result<usize, PersistenceError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Write step at which [`MemoryStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Insert,
    Update,
    Touch,
    Deactivate,
    AppendRemoval,
    AppendHistory,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    friends: BTreeMap<String, Friend>,
    removals: Vec<RemovalRecord>,
    history: Vec<HistoryEntry>,
}

/// Roster held in memory. A unit of work runs against a copy of the state
/// that replaces the original only on success.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: MemoryState,
    fail_at: Option<FailPoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later unit of work fail when it reaches `point`.
    pub fn inject_failure(&mut self, point: Option<FailPoint>) {
        self.fail_at = point;
    }

    pub fn friend(&self, name: &str) -> Option<&Friend> {
        self.state.friends.get(name)
    }

    pub fn friends(&self) -> impl Iterator<Item = &Friend> {
        self.state.friends.values()
    }

    pub fn removals(&self) -> &[RemovalRecord] {
        &self.state.removals
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.state.history
    }
}

impl RosterStore for MemoryStore {
    fn unit_of_work<T, F>(&mut self, work: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut dyn RosterTx) -> Result<T, PersistenceError>,
    {
        let mut draft = self.state.clone();
        let mut tx = MemoryTx { state: &mut draft, fail_at: self.fail_at };
        let out = work(&mut tx as &mut dyn RosterTx)?;
        self.state = draft;
        Ok(out)
    }

    fn count_active(&self) -> Result<usize, PersistenceError> {
        Ok(self.state.friends.values().filter(|f| f.is_active()).count())
    }

    fn history_len(&self) -> Result<usize, PersistenceError> {
        Ok(self.state.history.len())
    }
}

struct MemoryTx<'a> {
    state: &'a mut MemoryState,
    fail_at: Option<FailPoint>,
}

impl MemoryTx<'_> {
    fn check(&self, point: FailPoint) -> Result<(), PersistenceError> {
        if self.fail_at == Some(point) {
            return Err(PersistenceError::Storage(format!("injected failure at {point:?}")));
        }
        Ok(())
    }

    fn active_mut(&mut self, name: &str) -> Result<&mut Friend, PersistenceError> {
        match self.state.friends.get_mut(name) {
            Some(friend) if friend.is_active() => Ok(friend),
            _ => Err(PersistenceError::Constraint(format!("'{name}' is not an active friend"))),
        }
    }
}

impl RosterTx for MemoryTx<'_> {
    fn active_names(&mut self) -> Result<BTreeSet<String>, PersistenceError> {
        Ok(self
            .state
            .friends
            .values()
            .filter(|f| f.is_active())
            .map(|f| f.name.clone())
            .collect())
    }

    fn find_friend(&mut self, name: &str) -> Result<Option<Friend>, PersistenceError> {
        Ok(self.state.friends.get(name).cloned())
    }

    fn insert_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError> {
        self.check(FailPoint::Insert)?;
        if self.state.friends.contains_key(&friend.name) {
            return Err(PersistenceError::Constraint(format!(
                "'{}' already has a record",
                friend.name
            )));
        }
        self.state.friends.insert(friend.name.clone(), friend.clone());
        Ok(())
    }

    fn update_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError> {
        self.check(FailPoint::Update)?;
        match self.state.friends.get_mut(&friend.name) {
            Some(slot) => {
                *slot = friend.clone();
                Ok(())
            }
            None => Err(PersistenceError::Constraint(format!("'{}' has no record", friend.name))),
        }
    }

    fn touch_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check(FailPoint::Touch)?;
        self.active_mut(name)?.last_updated = when;
        Ok(())
    }

    fn deactivate_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<i64, PersistenceError> {
        self.check(FailPoint::Deactivate)?;
        let friend = self.active_mut(name)?;
        friend.status = FriendStatus::Inactive;
        friend.last_updated = when;
        Ok(duration_days(friend.first_seen, when))
    }

    fn append_removal(&mut self, record: &RemovalRecord) -> Result<(), PersistenceError> {
        self.check(FailPoint::AppendRemoval)?;
        self.state.removals.push(record.clone());
        Ok(())
    }

    fn append_history(&mut self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        self.check(FailPoint::AppendHistory)?;
        self.state.history.push(entry.clone());
        Ok(())
    }
}
