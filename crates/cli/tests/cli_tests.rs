// End-to-end tests for the `unfriend` binary.
// Run with: cargo test -p unfriend-cli --test cli_tests -- --nocapture

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const WEEK_ONE: &str = r#"{
  "friends": [
    {"name": "John Doe", "timestamp": 1640995200},
    {"name": "Jane Smith", "timestamp": 1641081600},
    {"name": "Bob Johnson", "timestamp": 1641168000}
  ]
}"#;

const WEEK_TWO: &str = r#"{
  "friends_v2": [
    {"name": "Jane Smith", "timestamp": 1641081600},
    {"name": "Bob Johnson", "timestamp": 1641168000},
    {"name": "  Maria Garcia  ", "timestamp": "1672531200"},
    {"name": ""}
  ]
}"#;

/// A scratch workspace with its own settings file, so nothing on the host
/// (config dir, RUST_LOG) leaks into the run.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("settings.toml"),
            "database = \"db/friends.db\"\ndata_dir = \"data\"\nbackup_dir = \"backups\"\nlog_level = \"warn\"\n",
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_unfriend"));
        cmd.current_dir(self.path())
            .env_remove("RUST_LOG")
            .env_remove("UNFRIEND_DATABASE")
            .env_remove("UNFRIEND_DATA_DIR")
            .env_remove("UNFRIEND_BACKUP_DIR")
            .env_remove("UNFRIEND_LOG")
            .env("UNFRIEND_CONFIG", self.path().join("settings.toml"));
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.cmd().args(args).output().expect("run unfriend")
    }

    fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.run(args);
        assert!(output.status.success(), "{:?} failed: {}", args, String::from_utf8_lossy(&output.stderr));
        serde_json::from_slice(&output.stdout).expect("valid JSON on stdout")
    }

    fn files_starting_with(&self, dir: &str, prefix: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.path().join(dir)) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(prefix))
            .collect()
    }
}

fn ingest_both(ws: &Workspace) -> serde_json::Value {
    ws.write("week1.json", WEEK_ONE);
    ws.write("week2.json", WEEK_TWO);
    ws.json(&["ingest", "week1.json", "--json"]);
    ws.json(&["ingest", "week2.json", "--json"])
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

#[test]
fn ingest_reports_removed_and_added() {
    let ws = Workspace::new();
    let second = ingest_both(&ws);

    assert_eq!(second["source"], "week2.json");
    assert_eq!(second["entries"], 3);
    assert_eq!(second["removed"], serde_json::json!(["John Doe"]));
    assert_eq!(second["added"], serde_json::json!(["Maria Garcia"]));
    assert_eq!(second["total_active"], 3);
    assert_eq!(second["skipped"]["counts"]["missing_name"], 1);

    assert!(ws.path().join("db/friends.db").is_file());
    // One snapshot per upload, even when both land in the same second.
    assert_eq!(ws.files_starting_with("data", "friends_backup_").len(), 2);
    assert_eq!(ws.files_starting_with("data", "unfriends_").len(), 1);
}

#[test]
fn ingest_human_summary_and_label() {
    let ws = Workspace::new();
    ws.write("week1.json", WEEK_ONE);
    let output = ws.run(&["ingest", "week1.json", "--label", "first check", "--no-csv"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Processed 3 friends from first check"), "{stdout}");
    assert!(stdout.contains("  + John Doe"), "{stdout}");
    assert!(!ws.path().join("data").exists());

    let history = ws.json(&["history", "--json"]);
    assert_eq!(history[0]["source_label"], "first check");
}

#[test]
fn ingest_same_file_twice_is_unchanged() {
    let ws = Workspace::new();
    ws.write("week1.json", WEEK_ONE);
    ws.json(&["ingest", "week1.json", "--json", "--no-csv"]);
    let again = ws.json(&["ingest", "week1.json", "--json", "--no-csv"]);
    assert_eq!(again["removed"], serde_json::json!([]));
    assert_eq!(again["added"], serde_json::json!([]));

    let history = ws.json(&["history", "--json"]);
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[test]
fn rejected_uploads_use_distinct_exit_codes() {
    let ws = Workspace::new();
    ws.write("empty.json", "   \n");
    ws.write("broken.json", "{not json");
    ws.write("other.json", r#"{"unexpected": 1}"#);
    ws.write("blank.json", r#"{"friends": [{"name": "  ", "timestamp": 5}]}"#);
    ws.write("friends.txt", WEEK_ONE);
    fs::write(ws.path().join("latin1.json"), [0x5b, 0xff, 0xfe, 0x5d]).unwrap();
    ws.write("shapes.json", "[42, true, null]");

    let cases = [
        ("missing.json", 4),
        ("empty.json", 5),
        ("broken.json", 8),
        ("other.json", 9),
        ("blank.json", 9),
        ("shapes.json", 9),
        ("latin1.json", 7),
        ("friends.txt", 2),
    ];
    for (file, code) in cases {
        let output = ws.run(&["ingest", file]);
        assert_eq!(output.status.code(), Some(code), "{file}: {}", String::from_utf8_lossy(&output.stderr));
        assert!(String::from_utf8_lossy(&output.stderr).contains("error:"), "{file}");
    }

    // Nothing reached the database.
    let stats = ws.json(&["stats", "--json"]);
    assert_eq!(stats["uploads"], 0);
}

#[test]
fn report_failure_after_commit_shows_category_only() {
    let ws = Workspace::new();
    ws.write("week1.json", WEEK_ONE);
    // A plain file where the data directory should be.
    ws.write("data", "not a directory");

    let output = ws.run(&["ingest", "week1.json"]);
    assert_eq!(output.status.code(), Some(11));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let error_line = stderr.lines().find(|l| l.starts_with("error:")).unwrap();
    assert_eq!(error_line, "error: A report file could not be written.");
    assert!(stderr.contains("report write failed"), "{stderr}");

    // The reconciliation itself was committed.
    let stats = ws.json(&["stats", "--json"]);
    assert_eq!(stats["uploads"], 1);
}

#[test]
fn upload_limit_comes_from_settings() {
    let ws = Workspace::new();
    fs::write(ws.path().join("small.toml"), "max_upload_bytes = 16\n").unwrap();
    ws.write("week1.json", WEEK_ONE);

    let output = ws.run(&["--config", "small.toml", "--database", "x.db", "ingest", "week1.json"]);
    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_upload_bytes"));
}

#[test]
fn invalid_settings_exit_3() {
    let ws = Workspace::new();
    fs::write(ws.path().join("zero.toml"), "max_upload_bytes = 0\n").unwrap();
    let output = ws.run(&["--config", "zero.toml", "stats"]);
    assert_eq!(output.status.code(), Some(3));

    let output = ws.run(&["--config", "does-not-exist.toml", "stats"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unfriend init-config"));
}

#[test]
fn init_config_writes_loadable_defaults() {
    let ws = Workspace::new();
    let output = ws.run(&["--config", "conf/new.toml", "init-config"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let written = fs::read_to_string(ws.path().join("conf/new.toml")).unwrap();
    assert!(written.contains("max_upload_bytes = 16777216"));

    let stats = ws.json(&["--config", "conf/new.toml", "--database", "fresh.db", "stats", "--json"]);
    assert_eq!(stats["uploads"], 0);

    let output = ws.run(&["--config", "conf/new.toml", "init-config"]);
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("--force"));

    fs::write(ws.path().join("conf/new.toml"), "recent_days = 1\n").unwrap();
    let output = ws.run(&["--config", "conf/new.toml", "init-config", "--force"]);
    assert!(output.status.success());
    assert_eq!(fs::read_to_string(ws.path().join("conf/new.toml")).unwrap(), written);
}

// ---------------------------------------------------------------------------
// reports
// ---------------------------------------------------------------------------

#[test]
fn reports_reflect_reconciliations() {
    let ws = Workspace::new();
    ingest_both(&ws);

    let unfriends = ws.json(&["unfriends", "--days", "7", "--json"]);
    let unfriends = unfriends.as_array().unwrap();
    assert_eq!(unfriends.len(), 1);
    assert_eq!(unfriends[0]["name"], "John Doe");
    assert_eq!(unfriends[0]["duration_days"], 0);

    let friends = ws.json(&["friends", "--json"]);
    let friends = friends.as_array().unwrap();
    assert_eq!(friends.len(), 4);
    let john = friends.iter().find(|f| f["name"] == "John Doe").unwrap();
    assert_eq!(john["status"], "inactive");

    let stats = ws.json(&["stats", "--json"]);
    assert_eq!(stats["active"], 3);
    assert_eq!(stats["inactive"], 1);
    assert_eq!(stats["total_ever"], 4);
    assert_eq!(stats["total_removals"], 1);
    assert_eq!(stats["uploads"], 2);
    assert_eq!(stats["removals_last_7_days"], 1);

    let history = ws.json(&["history", "--limit", "1", "--json"]);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["source_label"], "week2.json");
}

#[test]
fn huge_day_windows_do_not_overflow() {
    let ws = Workspace::new();
    ingest_both(&ws);

    let unfriends = ws.json(&["unfriends", "--days", "4000000000", "--json"]);
    assert_eq!(unfriends.as_array().unwrap().len(), 1);

    let output = ws.run(&["unfriends", "--days", "4000000000"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    fs::create_dir_all(ws.path().join("backups/backup_20000101_000000")).unwrap();
    let output = ws.run(&["clean-backups", "--days", "4000000000"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(ws.path().join("backups/backup_20000101_000000").exists());
}

#[test]
fn export_writes_three_files() {
    let ws = Workspace::new();
    ingest_both(&ws);

    let output = ws.run(&["export", "--out", "out"]);
    assert!(output.status.success());
    for name in ["all_friends.csv", "all_unfriends.csv", "tracking_history.csv"] {
        assert!(ws.path().join("out").join(name).is_file(), "{name}");
    }
    let unfriends = fs::read_to_string(ws.path().join("out/all_unfriends.csv")).unwrap();
    assert!(unfriends.starts_with("Name,Unfriended_Date,Friendship_Duration_Days\n"));
    assert!(unfriends.contains("John Doe,"));
}

// ---------------------------------------------------------------------------
// maintenance
// ---------------------------------------------------------------------------

#[test]
fn backup_then_clean() {
    let ws = Workspace::new();
    ingest_both(&ws);

    let manifest = ws.json(&["backup", "--json"]);
    assert_eq!(manifest["backup_type"], "full");
    assert_eq!(manifest["database_blake3"].as_str().unwrap().len(), 64);
    let files = manifest["files_backed_up"].as_array().unwrap();
    assert!(files.iter().any(|f| f == "data"));

    let backups = ws.files_starting_with("backups", "backup_");
    assert_eq!(backups.len(), 1);
    assert!(ws.path().join("backups").join(&backups[0]).join("manifest.json").is_file());

    fs::create_dir_all(ws.path().join("backups/backup_20000101_000000")).unwrap();
    fs::create_dir_all(ws.path().join("backups/backup_keepme")).unwrap();
    let output = ws.run(&["clean-backups", "--days", "30"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Removed old backup: backup_20000101_000000"), "{stdout}");
    assert!(stdout.contains("Kept (no date in name): backup_keepme"), "{stdout}");

    assert!(!ws.path().join("backups/backup_20000101_000000").exists());
    assert!(ws.path().join("backups/backup_keepme").exists());
    assert!(ws.path().join("backups").join(&backups[0]).exists());
}

#[test]
fn repeated_backups_never_collide() {
    let ws = Workspace::new();
    ingest_both(&ws);

    let first = ws.json(&["backup", "--json"]);
    let second = ws.json(&["backup", "--json"]);
    assert_eq!(first["database_blake3"].as_str().unwrap().len(), 64);
    assert_eq!(second["database_blake3"].as_str().unwrap().len(), 64);
    assert_eq!(ws.files_starting_with("backups", "backup_").len(), 2);
}

#[test]
fn backup_dir_inside_data_dir() {
    let ws = Workspace::new();
    fs::write(
        ws.path().join("nested.toml"),
        "database = \"db/friends.db\"\ndata_dir = \"data\"\nbackup_dir = \"data/backups\"\nlog_level = \"warn\"\n",
    )
    .unwrap();
    ws.write("week1.json", WEEK_ONE);
    ws.json(&["--config", "nested.toml", "ingest", "week1.json", "--json"]);

    let output = ws.run(&["--config", "nested.toml", "backup"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let backups = ws.files_starting_with("data/backups", "backup_");
    assert_eq!(backups.len(), 1);
    let folder = ws.path().join("data/backups").join(&backups[0]);
    assert!(folder.join("data").is_dir());
    assert!(!folder.join("data/backups").exists());
}

#[test]
fn integrity_passes_on_fresh_database() {
    let ws = Workspace::new();
    ingest_both(&ws);
    let report = ws.json(&["integrity", "--json"]);
    assert_eq!(report["problems"], serde_json::json!([]));
    assert_eq!(report["orphaned_removals"], 0);
}
