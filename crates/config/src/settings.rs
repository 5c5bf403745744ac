// Application settings
// Loaded from ~/.config/unfriend/settings.toml

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const ENV_DATABASE: &str = "UNFRIEND_DATABASE";
pub const ENV_DATA_DIR: &str = "UNFRIEND_DATA_DIR";
pub const ENV_BACKUP_DIR: &str = "UNFRIEND_BACKUP_DIR";
pub const ENV_LOG: &str = "UNFRIEND_LOG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("invalid settings in {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("{path} already exists")]
    Exists { path: String },
    #[error("cannot write {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file.
    pub database: PathBuf,

    /// Where per-upload CSV snapshots and removal logs go.
    pub data_dir: PathBuf,

    pub backup_dir: PathBuf,

    /// Largest export file accepted by `ingest`, in bytes.
    pub max_upload_bytes: usize,

    /// Default window for the removals report.
    pub recent_days: u32,

    pub backup_retention_days: u32,

    /// Filter directive when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("friends_tracker.db"),
            data_dir: PathBuf::from("data"),
            backup_dir: PathBuf::from("backups"),
            max_upload_bytes: 16 * 1024 * 1024,
            recent_days: 30,
            backup_retention_days: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Default settings file path.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("unfriend")
            .join("settings.toml")
    }

    /// Load settings with environment overrides applied.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used when present, else built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Self::config_path();
                if default_path.is_file() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let settings = Self::from_toml(&contents).map_err(|reason| ConfigError::Parse {
            path: path.display().to_string(),
            reason,
        })?;
        debug!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn from_toml(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }

    /// Overlay `UNFRIEND_*` variables; empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(ENV_DATABASE) {
            self.database = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_BACKUP_DIR) {
            self.backup_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_LOG) {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "database", reason: "path is empty".into() });
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_upload_bytes",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Commented settings file with the built-in defaults.
    pub fn default_file_contents() -> &'static str {
        r#"# unfriend settings
# Relative paths resolve against the working directory.

database = "friends_tracker.db"
data_dir = "data"
backup_dir = "backups"

# Uploads larger than this are rejected (bytes).
max_upload_bytes = 16777216

recent_days = 30
backup_retention_days = 30

# tracing filter directive; RUST_LOG takes precedence.
log_level = "info"
"#
    }
}

/// Write the commented default settings file to `path`, creating parent
/// directories. An existing file is only replaced when `force` is set.
pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
    let write_err = |e: io::Error| ConfigError::Write { path: path.display().to_string(), reason: e.to_string() };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut file = options.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => ConfigError::Exists { path: path.display().to_string() },
        _ => write_err(e),
    })?;
    file.write_all(Settings::default_file_contents().as_bytes()).map_err(write_err)?;
    info!(path = %path.display(), "default settings written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_file_matches_defaults() {
        let parsed = Settings::from_toml(Settings::default_file_contents()).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_write_default_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        write_default(&path, false).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().recent_days, Settings::default().recent_days);

        fs::write(&path, "recent_days = 3\n").unwrap();
        assert!(matches!(write_default(&path, false), Err(ConfigError::Exists { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "recent_days = 3\n");

        write_default(&path, true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), Settings::default_file_contents());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let parsed = Settings::from_toml("recent_days = 7\ndatabase = \"/var/lib/unfriend.db\"\n").unwrap();
        assert_eq!(parsed.recent_days, 7);
        assert_eq!(parsed.database, PathBuf::from("/var/lib/unfriend.db"));
        assert_eq!(parsed.backup_dir, PathBuf::from("backups"));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "recent_days = \"soon\"\n").unwrap();
        assert!(matches!(Settings::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_read_error() {
        let dir = tempdir().unwrap();
        let err = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            [(ENV_DATABASE, "other.db"), (ENV_LOG, "debug"), (ENV_DATA_DIR, "  ")].into_iter().collect();
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(settings.database, PathBuf::from("other.db"));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.max_upload_bytes = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { field: "max_upload_bytes", .. })
        ));

        let settings = Settings { database: PathBuf::new(), ..Settings::default() };
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { field: "database", .. })));
    }
}
