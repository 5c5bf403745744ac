// Roster persistence using SQLite

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, warn};

use unfriend_recon::model::duration_days;
use unfriend_recon::{Friend, FriendStatus, HistoryEntry, PersistenceError, RemovalRecord, RosterStore, RosterTx};

use crate::SCHEMA_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS friends (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL CHECK (status IN ('active', 'inactive')),
    external_timestamp INTEGER NOT NULL DEFAULT 0,  -- epoch seconds from the export, 0 = unknown
    first_seen INTEGER NOT NULL,                    -- epoch seconds, UTC
    last_updated INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_friends_status ON friends(status);

CREATE TABLE IF NOT EXISTS unfriends (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    removed_at INTEGER NOT NULL,
    duration_days INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_unfriends_removed_at ON unfriends(removed_at);

CREATE TABLE IF NOT EXISTS tracking_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    total_active INTEGER NOT NULL,
    removed_count INTEGER NOT NULL,
    added_count INTEGER NOT NULL,
    recorded_at INTEGER NOT NULL,
    source_label TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const FRIEND_COLUMNS: &str = "name, status, external_timestamp, first_seen, last_updated";

/// Classify a SQLite failure for the persistence port.
pub(crate) fn storage_err(e: rusqlite::Error) -> PersistenceError {
    match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => PersistenceError::Constraint(e.to_string()),
        Some(
            ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::CannotOpen
            | ErrorCode::ReadOnly
            | ErrorCode::PermissionDenied,
        ) => PersistenceError::Unavailable(e.to_string()),
        _ => PersistenceError::Storage(e.to_string()),
    }
}

/// Start of a `days`-long window ending at `now`. Windows reaching past
/// the representable range start at the earliest instant instead.
pub fn window_start(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn epoch(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, secs))
}

fn count_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let n: i64 = row.get(idx)?;
    usize::try_from(n).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, n))
}

fn friend_from_row(row: &Row<'_>) -> rusqlite::Result<Friend> {
    let status: String = row.get(1)?;
    let status = FriendStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, format!("unknown status '{status}'").into())
    })?;
    Ok(Friend {
        name: row.get(0)?,
        status,
        external_timestamp: row.get(2)?,
        first_seen: time_col(row, 3)?,
        last_updated: time_col(row, 4)?,
    })
}

fn removal_from_row(row: &Row<'_>) -> rusqlite::Result<RemovalRecord> {
    Ok(RemovalRecord {
        name: row.get(0)?,
        removed_at: time_col(row, 1)?,
        duration_days: row.get(2)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        total_active_count: count_col(row, 0)?,
        removed_count: count_col(row, 1)?,
        added_count: count_col(row, 2)?,
        recorded_at: time_col(row, 3)?,
        source_label: row.get(4)?,
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The roster in a single SQLite database file.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path).map_err(storage_err)?;
        let store = Self { conn, path: Some(path.to_path_buf()) };
        store.init()?;
        debug!(path = %path.display(), "roster database opened");
        Ok(store)
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        let store = Self { conn, path: None };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), PersistenceError> {
        self.conn.busy_timeout(StdDuration::from_secs(5)).map_err(storage_err)?;
        self.conn.execute_batch(SCHEMA).map_err(storage_err)?;

        self.conn
            .execute(
                "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )
            .map_err(storage_err)?;
        let stored: String = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
            .map_err(storage_err)?;
        match stored.parse::<u32>() {
            Ok(v) if v <= SCHEMA_VERSION => Ok(()),
            _ => Err(PersistenceError::Unavailable(format!(
                "database schema version '{stored}' is not supported (this build reads up to {SCHEMA_VERSION})"
            ))),
        }
    }

    /// File backing the store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw connection, for maintenance statements.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Reporting queries
    // -----------------------------------------------------------------------

    /// Every friend record, most recently updated first.
    pub fn list_friends(&self) -> Result<Vec<Friend>, PersistenceError> {
        let sql = format!("SELECT {FRIEND_COLUMNS} FROM friends ORDER BY last_updated DESC, name");
        let mut stmt = self.conn.prepare(&sql).map_err(storage_err)?;
        let rows = stmt.query_map([], friend_from_row).map_err(storage_err)?;
        rows.collect::<Result<_, _>>().map_err(storage_err)
    }

    /// Removals at or after `cutoff`, newest first.
    pub fn removals_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<RemovalRecord>, PersistenceError> {
        self.removals_from(epoch(cutoff))
    }

    pub fn all_removals(&self) -> Result<Vec<RemovalRecord>, PersistenceError> {
        self.removals_from(i64::MIN)
    }

    fn removals_from(&self, cutoff_secs: i64) -> Result<Vec<RemovalRecord>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name, removed_at, duration_days FROM unfriends
                 WHERE removed_at >= ?1 ORDER BY removed_at DESC, id DESC",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map(params![cutoff_secs], removal_from_row).map_err(storage_err)?;
        rows.collect::<Result<_, _>>().map_err(storage_err)
    }

    /// The latest `limit` history entries, newest first.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT total_active, removed_count, added_count, recorded_at, source_label
                 FROM tracking_history ORDER BY recorded_at DESC, id DESC LIMIT ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt.query_map(params![limit], history_from_row).map_err(storage_err)?;
        rows.collect::<Result<_, _>>().map_err(storage_err)
    }

    pub fn all_history(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        self.recent_history(usize::MAX)
    }

    fn count(&self, sql: &str, args: impl rusqlite::Params) -> Result<usize, PersistenceError> {
        self.conn.query_row(sql, args, |row| count_col(row, 0)).map_err(storage_err)
    }

    /// Summary counts for the stats report.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<RosterStats, PersistenceError> {
        let active = self.count("SELECT COUNT(*) FROM friends WHERE status = 'active'", [])?;
        let inactive = self.count("SELECT COUNT(*) FROM friends WHERE status = 'inactive'", [])?;
        let total_removals = self.count("SELECT COUNT(*) FROM unfriends", [])?;
        let uploads = self.count("SELECT COUNT(*) FROM tracking_history", [])?;
        let since = "SELECT COUNT(*) FROM unfriends WHERE removed_at >= ?1";
        let removals_last_7_days = self.count(since, params![epoch(window_start(now, 7))])?;
        let removals_last_30_days = self.count(since, params![epoch(window_start(now, 30))])?;

        let (first_upload, last_upload): (Option<i64>, Option<i64>) = self
            .conn
            .query_row("SELECT MIN(recorded_at), MAX(recorded_at) FROM tracking_history", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(storage_err)?;

        let database_bytes = self.path.as_deref().and_then(|p| std::fs::metadata(p).ok()).map(|m| m.len());

        Ok(RosterStats {
            active,
            inactive,
            total_ever: active + inactive,
            total_removals,
            uploads,
            removals_last_7_days,
            removals_last_30_days,
            database_bytes,
            first_upload: first_upload.and_then(|s| DateTime::from_timestamp(s, 0)),
            last_upload: last_upload.and_then(|s| DateTime::from_timestamp(s, 0)),
        })
    }

    /// SQLite's own consistency check plus removal rows with no friend record.
    pub fn integrity(&self) -> Result<IntegrityReport, PersistenceError> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check").map_err(storage_err)?;
        let problems: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(storage_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_err)?
            .into_iter()
            .filter(|line| line != "ok")
            .collect();

        let orphaned_removals = self.count(
            "SELECT COUNT(*) FROM unfriends u
             WHERE NOT EXISTS (SELECT 1 FROM friends f WHERE f.name = u.name)",
            [],
        )?;

        if !problems.is_empty() {
            warn!(count = problems.len(), "database integrity check reported problems");
        }
        if orphaned_removals > 0 {
            warn!(orphaned_removals, "removal records without a friend record");
        }
        Ok(IntegrityReport { problems, orphaned_removals })
    }

    /// Write a consistent copy of the database to `dest`.
    pub fn backup_to(&self, dest: &Path) -> Result<(), PersistenceError> {
        let dest = dest.to_str().ok_or_else(|| {
            PersistenceError::Storage(format!("backup path is not UTF-8: {}", dest.display()))
        })?;
        self.conn.execute("VACUUM INTO ?1", params![dest]).map_err(storage_err)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterStats {
    pub active: usize,
    pub inactive: usize,
    pub total_ever: usize,
    pub total_removals: usize,
    pub uploads: usize,
    pub removals_last_7_days: usize,
    pub removals_last_30_days: usize,
    pub database_bytes: Option<u64>,
    pub first_upload: Option<DateTime<Utc>>,
    pub last_upload: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Lines from `PRAGMA integrity_check` other than "ok".
    pub problems: Vec<String>,
    pub orphaned_removals: usize,
}

impl IntegrityReport {
    /// Orphans are reported but do not fail the check.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Persistence port
// ---------------------------------------------------------------------------

impl RosterStore for SqliteStore {
    fn unit_of_work<T, F>(&mut self, work: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&mut dyn RosterTx) -> Result<T, PersistenceError>,
    {
        // IMMEDIATE takes the write lock up front so a second process
        // cannot read the same roster and diff against it concurrently.
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err)?;
        let out = {
            let mut handle = SqliteTx { conn: &tx };
            work(&mut handle as &mut dyn RosterTx)?
        };
        tx.commit().map_err(storage_err)?;
        Ok(out)
    }

    fn count_active(&self) -> Result<usize, PersistenceError> {
        self.count("SELECT COUNT(*) FROM friends WHERE status = 'active'", [])
    }

    fn history_len(&self) -> Result<usize, PersistenceError> {
        self.count("SELECT COUNT(*) FROM tracking_history", [])
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

impl SqliteTx<'_> {
    fn expect_one(&self, changed: usize, name: &str, what: &str) -> Result<(), PersistenceError> {
        if changed == 1 {
            Ok(())
        } else {
            Err(PersistenceError::Constraint(format!("'{name}' {what}")))
        }
    }
}

impl RosterTx for SqliteTx<'_> {
    fn active_names(&mut self) -> Result<BTreeSet<String>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM friends WHERE status = 'active'")
            .map_err(storage_err)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(storage_err)?;
        rows.collect::<Result<_, _>>().map_err(storage_err)
    }

    fn find_friend(&mut self, name: &str) -> Result<Option<Friend>, PersistenceError> {
        let sql = format!("SELECT {FRIEND_COLUMNS} FROM friends WHERE name = ?1");
        self.conn
            .query_row(&sql, params![name], friend_from_row)
            .optional()
            .map_err(storage_err)
    }

    fn insert_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError> {
        self.conn
            .prepare_cached(
                "INSERT INTO friends (name, status, external_timestamp, first_seen, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![
                    friend.name,
                    friend.status.as_str(),
                    friend.external_timestamp,
                    epoch(friend.first_seen),
                    epoch(friend.last_updated),
                ])
            })
            .map_err(storage_err)?;
        Ok(())
    }

    fn update_friend(&mut self, friend: &Friend) -> Result<(), PersistenceError> {
        let changed = self
            .conn
            .execute(
                "UPDATE friends
                 SET status = ?2, external_timestamp = ?3, first_seen = ?4, last_updated = ?5
                 WHERE name = ?1",
                params![
                    friend.name,
                    friend.status.as_str(),
                    friend.external_timestamp,
                    epoch(friend.first_seen),
                    epoch(friend.last_updated),
                ],
            )
            .map_err(storage_err)?;
        self.expect_one(changed, &friend.name, "has no record")
    }

    fn touch_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<(), PersistenceError> {
        let changed = self
            .conn
            .prepare_cached("UPDATE friends SET last_updated = ?2 WHERE name = ?1 AND status = 'active'")
            .and_then(|mut stmt| stmt.execute(params![name, epoch(when)]))
            .map_err(storage_err)?;
        self.expect_one(changed, name, "is not an active friend")
    }

    fn deactivate_friend(&mut self, name: &str, when: DateTime<Utc>) -> Result<i64, PersistenceError> {
        let first_seen = self
            .conn
            .query_row(
                "SELECT first_seen FROM friends WHERE name = ?1 AND status = 'active'",
                params![name],
                |row| time_col(row, 0),
            )
            .optional()
            .map_err(storage_err)?
            .ok_or_else(|| PersistenceError::Constraint(format!("'{name}' is not an active friend")))?;

        let changed = self
            .conn
            .execute(
                "UPDATE friends SET status = 'inactive', last_updated = ?2 WHERE name = ?1 AND status = 'active'",
                params![name, epoch(when)],
            )
            .map_err(storage_err)?;
        self.expect_one(changed, name, "is not an active friend")?;
        Ok(duration_days(first_seen, when))
    }

    fn append_removal(&mut self, record: &RemovalRecord) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT INTO unfriends (name, removed_at, duration_days) VALUES (?1, ?2, ?3)",
                params![record.name, epoch(record.removed_at), record.duration_days],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn append_history(&mut self, entry: &HistoryEntry) -> Result<(), PersistenceError> {
        self.conn
            .execute(
                "INSERT INTO tracking_history (total_active, removed_count, added_count, recorded_at, source_label)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.total_active_count as i64,
                    entry.removed_count as i64,
                    entry.added_count as i64,
                    epoch(entry.recorded_at),
                    entry.source_label,
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }
}
