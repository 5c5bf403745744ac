//! Backups, retention and integrity checks.

use chrono::Utc;
use tracing::warn;

use unfriend_io::backup::{clean_old_backups, create_backup};

use crate::exit_codes::EXIT_INTEGRITY;
use crate::{print_json, CliError, Context};

pub fn cmd_backup(ctx: &Context, json: bool) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let result = create_backup(&store, Some(&ctx.settings.data_dir), &ctx.settings.backup_dir, Utc::now())
        .map_err(CliError::report)?;
    if json {
        return print_json(&result.manifest);
    }

    println!("Backup created: {}", result.folder.display());
    for file in &result.manifest.files_backed_up {
        println!("  {}", file);
    }
    println!("blake3: {}", result.manifest.database_blake3);
    Ok(())
}

pub fn cmd_clean_backups(ctx: &Context, days: Option<u32>) -> Result<(), CliError> {
    let days = days.unwrap_or(ctx.settings.backup_retention_days);
    let report = clean_old_backups(&ctx.settings.backup_dir, days, Utc::now()).map_err(CliError::report)?;

    for name in &report.removed {
        println!("Removed old backup: {}", name);
    }
    for name in &report.unrecognized {
        println!("Kept (no date in name): {}", name);
    }
    println!("Removed {} backups older than {} days, kept {}", report.removed.len(), days, report.kept);
    Ok(())
}

pub fn cmd_integrity(ctx: &Context, json: bool) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let report = store.integrity().map_err(CliError::persistence)?;

    if json {
        print_json(&report)?;
    } else {
        if report.is_ok() {
            println!("Database integrity: ok");
        } else {
            println!("Database integrity: {} problem(s)", report.problems.len());
            for problem in &report.problems {
                println!("  {}", problem);
            }
        }
        if report.orphaned_removals > 0 {
            println!("Orphaned removal records: {}", report.orphaned_removals);
        }
    }

    if report.is_ok() {
        Ok(())
    } else {
        warn!(problems = report.problems.len(), "integrity check failed");
        Err(CliError { code: EXIT_INTEGRITY, message: "database integrity check failed".to_string(), hint: None }
            .with_hint("restore the database from a folder under the backup directory"))
    }
}
