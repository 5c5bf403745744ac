// CSV snapshots and exports

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use unfriend_recon::{Friend, HistoryEntry, NormalizedEntry, RemovalRecord};

use crate::error::ReportError;
use crate::store::SqliteStore;

pub const SNAPSHOT_HEADER: [&str; 5] = ["Name", "Facebook_Date_Added", "Timestamp", "Status", "Tracked_Date"];
pub const REMOVALS_LOG_HEADER: [&str; 3] = ["Name", "Unfriended_Date", "Unfriended_Time"];
pub const FRIENDS_EXPORT_HEADER: [&str; 5] = ["Name", "Status", "Facebook_Timestamp", "First_Seen", "Last_Updated"];
pub const REMOVALS_EXPORT_HEADER: [&str; 3] = ["Name", "Unfriended_Date", "Friendship_Duration_Days"];
pub const HISTORY_EXPORT_HEADER: [&str; 5] =
    ["Check_Date", "Total_Friends", "Unfriended_Count", "New_Friends_Count", "Upload_Filename"];

pub const FRIENDS_EXPORT_FILE: &str = "all_friends.csv";
pub const REMOVALS_EXPORT_FILE: &str = "all_unfriends.csv";
pub const HISTORY_EXPORT_FILE: &str = "tracking_history.csv";

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

fn datetime(dt: DateTime<Utc>) -> String {
    dt.format(DATETIME_FMT).to_string()
}

/// The export's own "friends since" stamp, or `fallback` when it is unknown.
fn date_added(timestamp: i64, fallback: DateTime<Utc>) -> String {
    match timestamp {
        0 => datetime(fallback),
        secs => DateTime::from_timestamp(secs, 0).map(datetime).unwrap_or_else(|| datetime(fallback)),
    }
}

fn writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out)
}

fn create(path: &Path) -> Result<File, ReportError> {
    File::create(path).map_err(|e| ReportError::io(path, e))
}

/// Open a file that did not exist before, trying `<stem>.csv`, then
/// `<stem>_2.csv`, `<stem>_3.csv`, ... so no earlier file is overwritten.
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, File), ReportError> {
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 { format!("{stem}.csv") } else { format!("{stem}_{attempt}.csv") };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(ReportError::io(&path, e)),
        }
    }
}

fn ensure_dir(dir: &Path) -> Result<(), ReportError> {
    std::fs::create_dir_all(dir).map_err(|e| ReportError::io(dir, e))
}

fn snapshot_stem(now: DateTime<Utc>) -> String {
    format!("friends_backup_{}", now.format("%Y%m%d_%H%M%S"))
}

pub fn snapshot_file_name(now: DateTime<Utc>) -> String {
    format!("{}.csv", snapshot_stem(now))
}

/// One removals log per day; later uploads on the same day append to it.
pub fn removals_file_name(now: DateTime<Utc>) -> String {
    format!("unfriends_{}.csv", now.format("%Y%m%d"))
}

// ---------------------------------------------------------------------------
// Per-upload files
// ---------------------------------------------------------------------------

pub fn write_snapshot<W: Write>(out: W, entries: &[NormalizedEntry], now: DateTime<Utc>) -> Result<(), ReportError> {
    let mut w = writer(out);
    w.write_record(SNAPSHOT_HEADER)?;
    let tracked = datetime(now);
    for entry in entries {
        w.write_record([
            entry.name.clone(),
            date_added(entry.timestamp, now),
            entry.timestamp.to_string(),
            "active".to_string(),
            tracked.clone(),
        ])?;
    }
    w.flush().map_err(|e| ReportError::Csv(e.to_string()))?;
    Ok(())
}

/// Write the uploaded roster to `dir/friends_backup_<stamp>.csv`, or to a
/// suffixed name when a snapshot from the same second already exists.
pub fn write_roster_snapshot(
    dir: &Path,
    entries: &[NormalizedEntry],
    now: DateTime<Utc>,
) -> Result<PathBuf, ReportError> {
    ensure_dir(dir)?;
    let (path, file) = create_unique(dir, &snapshot_stem(now))?;
    write_snapshot(file, entries, now)?;
    debug!(path = %path.display(), rows = entries.len(), "roster snapshot written");
    Ok(path)
}

/// Append removed names to the day's removals log, writing the header only
/// when the file is new.
pub fn append_removals<'a, I>(dir: &Path, names: I, now: DateTime<Utc>) -> Result<PathBuf, ReportError>
where
    I: IntoIterator<Item = &'a String>,
{
    ensure_dir(dir)?;
    let path = dir.join(removals_file_name(now));
    let is_new = !path.exists();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ReportError::io(&path, e))?;

    let mut w = writer(file);
    if is_new {
        w.write_record(REMOVALS_LOG_HEADER)?;
    }
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H:%M:%S").to_string();
    for name in names {
        w.write_record([name, &date, &time])?;
    }
    w.flush().map_err(|e| ReportError::io(&path, e))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Full exports
// ---------------------------------------------------------------------------

pub fn write_friends<W: Write>(out: W, friends: &[Friend]) -> Result<(), ReportError> {
    let mut w = writer(out);
    w.write_record(FRIENDS_EXPORT_HEADER)?;
    for f in friends {
        w.write_record([
            f.name.clone(),
            f.status.to_string(),
            f.external_timestamp.to_string(),
            datetime(f.first_seen),
            datetime(f.last_updated),
        ])?;
    }
    w.flush().map_err(|e| ReportError::Csv(e.to_string()))?;
    Ok(())
}

pub fn write_removals<W: Write>(out: W, removals: &[RemovalRecord]) -> Result<(), ReportError> {
    let mut w = writer(out);
    w.write_record(REMOVALS_EXPORT_HEADER)?;
    for r in removals {
        w.write_record([r.name.clone(), datetime(r.removed_at), r.duration_days.to_string()])?;
    }
    w.flush().map_err(|e| ReportError::Csv(e.to_string()))?;
    Ok(())
}

pub fn write_history<W: Write>(out: W, history: &[HistoryEntry]) -> Result<(), ReportError> {
    let mut w = writer(out);
    w.write_record(HISTORY_EXPORT_HEADER)?;
    for h in history {
        w.write_record([
            datetime(h.recorded_at),
            h.total_active_count.to_string(),
            h.removed_count.to_string(),
            h.added_count.to_string(),
            h.source_label.clone(),
        ])?;
    }
    w.flush().map_err(|e| ReportError::Csv(e.to_string()))?;
    Ok(())
}

/// Dump friends (by name), removals and history (newest first) into `out_dir`.
pub fn export_all(store: &SqliteStore, out_dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    ensure_dir(out_dir)?;
    let db = |e: unfriend_recon::PersistenceError| ReportError::Database(e.to_string());

    let mut friends = store.list_friends().map_err(db)?;
    friends.sort_by(|a, b| a.name.cmp(&b.name));
    let removals = store.all_removals().map_err(db)?;
    let history = store.all_history().map_err(db)?;

    let friends_path = out_dir.join(FRIENDS_EXPORT_FILE);
    write_friends(create(&friends_path)?, &friends)?;
    let removals_path = out_dir.join(REMOVALS_EXPORT_FILE);
    write_removals(create(&removals_path)?, &removals)?;
    let history_path = out_dir.join(HISTORY_EXPORT_FILE);
    write_history(create(&history_path)?, &history)?;

    debug!(
        dir = %out_dir.display(),
        friends = friends.len(),
        removals = removals.len(),
        history = history.len(),
        "export written"
    );
    Ok(vec![friends_path, removals_path, history_path])
}
