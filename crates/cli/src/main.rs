// unfriend CLI - track who disappears from a friend list between exports

mod exit_codes;
mod ingest;
mod maintenance;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use unfriend_config::{write_default, ConfigError, Settings};
use unfriend_io::{ReportError, SqliteStore};
use unfriend_recon::{ParseError, PersistenceError};

use exit_codes::{
    parse_exit_code, EXIT_CONFIG, EXIT_ERROR, EXIT_PERSISTENCE, EXIT_REPORT_IO, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "unfriend")]
#[command(about = "Track friend-list exports and report who left between them")]
#[command(long_version = long_version())]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    /// Settings file (default: <config dir>/unfriend/settings.toml)
    #[arg(long, global = true, env = "UNFRIEND_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database file, overriding settings and environment
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a friend-list export (.json) against the database
    #[command(after_help = "\
Examples:
  unfriend ingest friends.json
  unfriend ingest friends.json --label 'weekly check'
  unfriend ingest friends.json --json | jq .removed
  unfriend ingest friends.json --no-csv")]
    Ingest {
        /// Export file (JSON)
        file: PathBuf,

        /// Label stored in the history ledger (default: file name)
        #[arg(long)]
        label: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Skip the CSV snapshot and removals log
        #[arg(long)]
        no_csv: bool,
    },

    /// List every friend record, most recently updated first
    Friends {
        #[arg(long)]
        json: bool,
    },

    /// List removals within a window
    #[command(after_help = "\
Examples:
  unfriend unfriends
  unfriend unfriends --days 7
  unfriend unfriends --days 365 --json")]
    Unfriends {
        /// Window in days (default: recent_days from settings)
        #[arg(long)]
        days: Option<u32>,

        #[arg(long)]
        json: bool,
    },

    /// Show the latest reconciliations
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long)]
        json: bool,
    },

    /// Summary counts for the database
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Write all_friends.csv, all_unfriends.csv and tracking_history.csv
    #[command(after_help = "\
Examples:
  unfriend export
  unfriend export --out reports/")]
    Export {
        /// Output directory (default: export_<timestamp>)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Copy the database and data directory into a timestamped backup
    Backup {
        #[arg(long)]
        json: bool,
    },

    /// Remove backups older than the retention window
    CleanBackups {
        /// Retention in days (default: backup_retention_days from settings)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Check database consistency (exit 12 on problems)
    Integrity {
        #[arg(long)]
        json: bool,
    },

    /// Write a commented settings file with the defaults
    #[command(after_help = "\
Examples:
  unfriend init-config
  unfriend --config ./settings.toml init-config --force")]
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // Logs go to stderr; stdout carries command output only.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Commands::InitConfig { force }) = cli.command {
        init_logging(&Settings::default().log_level);
        return finish(init_config(cli.config.as_deref(), force));
    }

    let result = load_context(cli.config.as_deref(), cli.database).and_then(|ctx| {
        init_logging(&ctx.settings.log_level);
        match cli.command {
            None => {
                eprintln!("Usage: unfriend <command> [options]");
                eprintln!("       unfriend --help for more information");
                Ok(())
            }
            Some(Commands::Ingest { file, label, json, no_csv }) => {
                ingest::cmd_ingest(&ctx, &file, label, json, no_csv)
            }
            Some(Commands::Friends { json }) => report::cmd_friends(&ctx, json),
            Some(Commands::Unfriends { days, json }) => report::cmd_unfriends(&ctx, days, json),
            Some(Commands::History { limit, json }) => report::cmd_history(&ctx, limit, json),
            Some(Commands::Stats { json }) => report::cmd_stats(&ctx, json),
            Some(Commands::Export { out }) => report::cmd_export(&ctx, out),
            Some(Commands::Backup { json }) => maintenance::cmd_backup(&ctx, json),
            Some(Commands::CleanBackups { days }) => maintenance::cmd_clean_backups(&ctx, days),
            Some(Commands::Integrity { json }) => maintenance::cmd_integrity(&ctx, json),
            Some(Commands::InitConfig { .. }) => Ok(()),
        }
    });

    finish(result)
}

fn finish(result: Result<(), CliError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

// ---------------------------------------------------------------------------
// Shared command context
// ---------------------------------------------------------------------------

/// Write the default settings file to `--config`, or the default location.
fn init_config(config: Option<&Path>, force: bool) -> Result<(), CliError> {
    let path = config.map(Path::to_path_buf).unwrap_or_else(Settings::config_path);
    write_default(&path, force).map_err(CliError::config)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

pub struct Context {
    pub settings: Settings,
}

fn load_context(config: Option<&Path>, database: Option<PathBuf>) -> Result<Context, CliError> {
    let mut settings = Settings::load(config).map_err(CliError::config)?;
    if let Some(db) = database {
        settings.database = db;
        settings.validate().map_err(CliError::config)?;
    }
    Ok(Context { settings })
}

impl Context {
    /// Open the roster database, creating its directory when needed.
    pub fn open_store(&self) -> Result<SqliteStore, CliError> {
        let path = &self.settings.database;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::report(ReportError::Io { path: parent.display().to_string(), reason: e.to_string() })
            })?;
        }
        SqliteStore::open(path).map_err(CliError::persistence)
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|e| CliError { code: EXIT_ERROR, message: e.to_string(), hint: None })?;
    println!("{}", output);
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::Read { .. } => {
                Some("pass --config with an existing settings.toml, or create one with `unfriend init-config`".to_string())
            }
            ConfigError::Exists { .. } => Some("use --force to replace it".to_string()),
            _ => None,
        };
        Self { code: EXIT_CONFIG, message: err.to_string(), hint }
    }

    /// Category message for the user; the detail goes to the log.
    pub fn parse(err: ParseError) -> Self {
        warn!(error = %err, "export rejected");
        let hint = match &err {
            ParseError::TooLarge { .. } => Some("raise max_upload_bytes in settings.toml".to_string()),
            ParseError::UnrecognizedStructure(_) => {
                Some("expected a top-level array or an object with a \"friends\" list".to_string())
            }
            _ => None,
        };
        Self { code: parse_exit_code(&err), message: err.user_message().to_string(), hint }
    }

    pub fn persistence(err: PersistenceError) -> Self {
        warn!(error = %err, "database operation failed");
        let hint = match &err {
            PersistenceError::Unavailable(_) => Some("is another unfriend process using the database?".to_string()),
            _ => None,
        };
        Self { code: EXIT_PERSISTENCE, message: err.user_message().to_string(), hint }
    }

    pub fn report(err: ReportError) -> Self {
        warn!(error = %err, "report write failed");
        Self { code: EXIT_REPORT_IO, message: err.user_message().to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
