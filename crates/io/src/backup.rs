// Database backups and retention

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ReportError;
use crate::store::{window_start, SqliteStore};

pub const BACKUP_PREFIX: &str = "backup_";
pub const MANIFEST_FILE: &str = "manifest.json";
const STAMP_FMT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Serialize)]
pub struct BackupManifest {
    pub backup_date: DateTime<Utc>,
    pub backup_type: &'static str,
    pub files_backed_up: Vec<String>,
    pub database_file: String,
    pub database_bytes: u64,
    /// blake3 of the database copy, hex.
    pub database_blake3: String,
}

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub folder: PathBuf,
    pub manifest: BackupManifest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub kept: usize,
    /// Folders whose name carries no readable stamp. Never deleted.
    pub unrecognized: Vec<String>,
}

pub fn backup_folder_name(now: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}{}", now.format(STAMP_FMT))
}

/// The creation time encoded in a `backup_<stamp>` folder name.
pub fn parse_backup_stamp(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(BACKUP_PREFIX)?;
    let stamp = stamp.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, STAMP_FMT).ok().map(|naive| naive.and_utc())
}

fn hash_file(path: &Path) -> Result<(String, u64), ReportError> {
    let mut file = fs::File::open(path).map_err(|e| ReportError::io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| ReportError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hasher.finalize().to_hex().to_string(), total))
}

/// Recursive copy of `src` into `dest`. Entries that are, or contain, `skip`
/// are left out so a backup folder nested inside `src` is not copied into
/// itself.
fn copy_dir(src: &Path, dest: &Path, skip: &Path) -> Result<(), ReportError> {
    fs::create_dir_all(dest).map_err(|e| ReportError::io(dest, e))?;
    for entry in fs::read_dir(src).map_err(|e| ReportError::io(src, e))? {
        let entry = entry.map_err(|e| ReportError::io(src, e))?;
        let from = entry.path();
        if fs::canonicalize(&from).is_ok_and(|canonical| skip.starts_with(canonical)) {
            debug!(path = %from.display(), "skipping backup destination inside data dir");
            continue;
        }
        let to = dest.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| ReportError::io(&from, e))?;
        if file_type.is_dir() {
            copy_dir(&from, &to, skip)?;
        } else if file_type.is_file() {
            fs::copy(&from, &to).map_err(|e| ReportError::io(&from, e))?;
        }
    }
    Ok(())
}

/// Create a fresh `backup_<stamp>` folder under `backup_root`. A folder left
/// by an earlier backup in the same second gets a `_2`, `_3`, ... suffix.
fn create_backup_folder(backup_root: &Path, now: DateTime<Utc>) -> Result<PathBuf, ReportError> {
    fs::create_dir_all(backup_root).map_err(|e| ReportError::io(backup_root, e))?;
    let base = backup_folder_name(now);
    let mut attempt = 1u32;
    loop {
        let name = if attempt == 1 { base.clone() } else { format!("{base}_{attempt}") };
        let folder = backup_root.join(name);
        match fs::create_dir(&folder) {
            Ok(()) => return Ok(folder),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(ReportError::io(&folder, e)),
        }
    }
}

/// Copy the database, and `data_dir` when it exists, into a new
/// `backup_root/backup_<stamp>/` folder and write a manifest next to them.
pub fn create_backup(
    store: &SqliteStore,
    data_dir: Option<&Path>,
    backup_root: &Path,
    now: DateTime<Utc>,
) -> Result<BackupResult, ReportError> {
    let folder = create_backup_folder(backup_root, now)?;

    let database_file = format!("friends_tracker_backup_{}.db", now.format(STAMP_FMT));
    let db_copy = folder.join(&database_file);
    store.backup_to(&db_copy).map_err(|e| ReportError::Database(e.to_string()))?;
    let (database_blake3, database_bytes) = hash_file(&db_copy)?;

    if let Some(dir) = data_dir.filter(|d| d.is_dir()) {
        let skip = fs::canonicalize(&folder).map_err(|e| ReportError::io(&folder, e))?;
        copy_dir(dir, &folder.join("data"), &skip)?;
    }

    let mut files_backed_up: Vec<String> = fs::read_dir(&folder)
        .map_err(|e| ReportError::io(&folder, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    files_backed_up.sort();

    let manifest = BackupManifest {
        backup_date: now,
        backup_type: "full",
        files_backed_up,
        database_file,
        database_bytes,
        database_blake3,
    };
    let json = serde_json::to_string_pretty(&manifest).map_err(|e| ReportError::Manifest(e.to_string()))?;
    let manifest_path = folder.join(MANIFEST_FILE);
    fs::write(&manifest_path, json).map_err(|e| ReportError::io(&manifest_path, e))?;

    info!(folder = %folder.display(), bytes = manifest.database_bytes, "backup created");
    Ok(BackupResult { folder, manifest })
}

/// Delete `backup_<stamp>` folders older than `keep_days`.
pub fn clean_old_backups(backup_root: &Path, keep_days: u32, now: DateTime<Utc>) -> Result<CleanupReport, ReportError> {
    let mut report = CleanupReport::default();
    if !backup_root.exists() {
        return Ok(report);
    }
    let cutoff = window_start(now, keep_days);

    let mut entries: Vec<_> = fs::read_dir(backup_root)
        .map_err(|e| ReportError::io(backup_root, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        match parse_backup_stamp(&name) {
            Some(created) if created < cutoff => {
                let path = entry.path();
                fs::remove_dir_all(&path).map_err(|e| ReportError::io(&path, e))?;
                info!(backup = %name, "old backup removed");
                report.removed.push(name);
            }
            Some(_) => report.kept += 1,
            None => {
                warn!(folder = %name, "backup folder name has no readable date; keeping it");
                report.unrecognized.push(name);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;
    use unfriend_recon::{reconcile_at, NormalizedEntry};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 9, 15, 30).unwrap()
    }

    #[test]
    fn test_stamp_round_trip() {
        let name = backup_folder_name(now());
        assert_eq!(name, "backup_20240520_091530");
        assert_eq!(parse_backup_stamp(&name), Some(now()));
        assert_eq!(parse_backup_stamp("backup_20240520_091530_extra"), Some(now()));
        assert_eq!(parse_backup_stamp("backup_latest"), None);
        assert_eq!(parse_backup_stamp("snapshot_20240520_091530"), None);
    }

    #[test]
    fn test_create_backup_with_manifest() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("nested")).unwrap();
        fs::write(data.join("friends_backup_x.csv"), "Name\n").unwrap();
        fs::write(data.join("nested").join("n.txt"), "n").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        reconcile_at(&mut store, &[NormalizedEntry::new("A", 0)], "a", now()).unwrap();

        let result = create_backup(&store, Some(&data), &dir.path().join("backups"), now()).unwrap();
        assert!(result.folder.ends_with("backup_20240520_091530"));
        assert!(result.folder.join("data/nested/n.txt").is_file());
        assert_eq!(
            result.manifest.files_backed_up,
            vec!["data".to_string(), "friends_tracker_backup_20240520_091530.db".to_string()]
        );

        let db_bytes = fs::read(result.folder.join(&result.manifest.database_file)).unwrap();
        assert_eq!(result.manifest.database_bytes, db_bytes.len() as u64);
        assert_eq!(result.manifest.database_blake3, blake3::hash(&db_bytes).to_hex().to_string());

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(result.folder.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["backup_type"], "full");
        assert_eq!(manifest["database_blake3"], result.manifest.database_blake3.as_str());
    }

    #[test]
    fn test_backup_without_data_dir() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        let result = create_backup(&store, Some(&dir.path().join("missing")), dir.path(), now()).unwrap();
        assert_eq!(result.manifest.files_backed_up.len(), 1);
    }

    #[test]
    fn test_clean_old_backups() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for name in ["backup_20240101_000000", "backup_20240510_120000", "backup_manual", "backup_20240401_080000"] {
            fs::create_dir_all(root.join(name)).unwrap();
        }
        fs::write(root.join("backup_20230101_000000"), "a file, not a folder").unwrap();

        let report = clean_old_backups(root, 30, now()).unwrap();
        assert_eq!(report.removed, vec!["backup_20240101_000000", "backup_20240401_080000"]);
        assert_eq!(report.kept, 1);
        assert_eq!(report.unrecognized, vec!["backup_manual"]);
        assert!(root.join("backup_manual").is_dir());
        assert!(root.join("backup_20230101_000000").is_file());
        assert!(!root.join("backup_20240101_000000").exists());
    }

    #[test]
    fn test_backup_dir_inside_data_dir_is_not_copied_into_itself() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("friends_backup_x.csv"), "Name\n").unwrap();
        let store = SqliteStore::open_in_memory().unwrap();

        let first = create_backup(&store, Some(&data), &data.join("backups"), now()).unwrap();
        assert!(first.folder.join("data/friends_backup_x.csv").is_file());
        assert!(!first.folder.join("data/backups").exists());

        let second = create_backup(&store, Some(&data), &data.join("backups"), now()).unwrap();
        assert!(!second.folder.join("data/backups").exists());
    }

    #[test]
    fn test_backups_in_the_same_second_get_distinct_folders() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("backups");
        let store = SqliteStore::open_in_memory().unwrap();

        let first = create_backup(&store, None, &root, now()).unwrap();
        let second = create_backup(&store, None, &root, now()).unwrap();
        let third = create_backup(&store, None, &root, now()).unwrap();
        assert!(first.folder.ends_with("backup_20240520_091530"));
        assert!(second.folder.ends_with("backup_20240520_091530_2"));
        assert!(third.folder.ends_with("backup_20240520_091530_3"));
        assert!(second.folder.join(&second.manifest.database_file).is_file());

        let name = second.folder.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(parse_backup_stamp(&name), Some(now()));
    }

    #[test]
    fn test_clean_with_huge_retention_keeps_everything() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("backup_20000101_000000")).unwrap();
        let report = clean_old_backups(dir.path(), u32::MAX, now()).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.kept, 1);
    }

    #[test]
    fn test_clean_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let report = clean_old_backups(&dir.path().join("none"), 30, now()).unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
