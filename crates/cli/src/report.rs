//! Read-only reports over the roster database.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use unfriend_io::csv::export_all;
use unfriend_io::window_start;

use crate::{print_json, CliError, Context};

fn date(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}

fn datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn cmd_friends(ctx: &Context, json: bool) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let friends = store.list_friends().map_err(CliError::persistence)?;
    if json {
        return print_json(&friends);
    }

    if friends.is_empty() {
        println!("No friends tracked yet. Run `unfriend ingest <file>` first.");
        return Ok(());
    }
    let width = friends.iter().map(|f| f.name.chars().count()).max().unwrap_or(4).max(4);
    println!("{:<width$}  {:<8}  {:<10}  {}", "Name", "Status", "First seen", "Last updated");
    for f in &friends {
        println!(
            "{:<width$}  {:<8}  {:<10}  {}",
            f.name,
            f.status.as_str(),
            date(f.first_seen),
            datetime(f.last_updated)
        );
    }
    Ok(())
}

pub fn cmd_unfriends(ctx: &Context, days: Option<u32>, json: bool) -> Result<(), CliError> {
    let days = days.unwrap_or(ctx.settings.recent_days);
    let cutoff = window_start(Utc::now(), days);

    let store = ctx.open_store()?;
    let removals = store.removals_since(cutoff).map_err(CliError::persistence)?;
    if json {
        return print_json(&removals);
    }

    if removals.is_empty() {
        println!("No removals in the last {} days.", days);
        return Ok(());
    }
    println!("Removals in the last {} days: {}", days, removals.len());
    for r in &removals {
        println!("  {}  {}  (friends for {} days)", datetime(r.removed_at), r.name, r.duration_days);
    }
    Ok(())
}

pub fn cmd_history(ctx: &Context, limit: usize, json: bool) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let history = store.recent_history(limit).map_err(CliError::persistence)?;
    if json {
        return print_json(&history);
    }

    if history.is_empty() {
        println!("No uploads recorded yet.");
        return Ok(());
    }
    println!("{:<19}  {:>6}  {:>7}  {:>5}  {}", "Checked", "Active", "Removed", "Added", "Source");
    for h in &history {
        println!(
            "{:<19}  {:>6}  {:>7}  {:>5}  {}",
            datetime(h.recorded_at),
            h.total_active_count,
            h.removed_count,
            h.added_count,
            h.source_label
        );
    }
    Ok(())
}

pub fn cmd_stats(ctx: &Context, json: bool) -> Result<(), CliError> {
    let store = ctx.open_store()?;
    let stats = store.stats(Utc::now()).map_err(CliError::persistence)?;
    if json {
        return print_json(&stats);
    }

    let when = |dt: Option<DateTime<Utc>>| dt.map(datetime).unwrap_or_else(|| "never".to_string());
    println!("Roster Statistics");
    println!("-----------------");
    println!("Active friends:        {}", stats.active);
    println!("Inactive friends:      {}", stats.inactive);
    println!("Total ever tracked:    {}", stats.total_ever);
    println!("Total removals:        {}", stats.total_removals);
    println!("Removals (7 days):     {}", stats.removals_last_7_days);
    println!("Removals (30 days):    {}", stats.removals_last_30_days);
    println!("Uploads:               {}", stats.uploads);
    println!("First upload:          {}", when(stats.first_upload));
    println!("Last upload:           {}", when(stats.last_upload));
    if let Some(bytes) = stats.database_bytes {
        println!("Database size:         {:.2} MB", bytes as f64 / (1024.0 * 1024.0));
    }
    Ok(())
}

pub fn cmd_export(ctx: &Context, out: Option<PathBuf>) -> Result<(), CliError> {
    let out = out.unwrap_or_else(|| PathBuf::from(format!("export_{}", Utc::now().format("%Y%m%d_%H%M%S"))));
    let store = ctx.open_store()?;
    let paths = export_all(&store, &out).map_err(CliError::report)?;
    println!("Exported to {}", out.display());
    for path in paths {
        println!("  {}", path.display());
    }
    Ok(())
}
