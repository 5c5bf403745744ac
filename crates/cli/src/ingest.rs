//! `unfriend ingest` - parse an export and reconcile it.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use unfriend_io::csv::{append_removals, write_roster_snapshot};
use unfriend_recon::{parse_file, reconcile_at, ParseLimits, ReconOutcome, SkipReport};

use crate::{print_json, CliError, Context};

#[derive(Serialize)]
struct IngestReport<'a> {
    source: &'a str,
    entries: usize,
    skipped: &'a SkipReport,
    #[serde(flatten)]
    outcome: &'a ReconOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removals_log: Option<PathBuf>,
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

pub fn cmd_ingest(
    ctx: &Context,
    file: &Path,
    label: Option<String>,
    json: bool,
    no_csv: bool,
) -> Result<(), CliError> {
    if !is_json_file(file) {
        return Err(CliError::args(format!("{}: only .json exports are accepted", file.display()))
            .with_hint("download your friend list in JSON format"));
    }

    let limits = ParseLimits { max_bytes: ctx.settings.max_upload_bytes };
    let parsed = parse_file(file, &limits).map_err(CliError::parse)?;
    for (reason, count) in parsed.skipped.iter() {
        info!(%reason, count, "entries skipped");
    }

    let source = label.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string())
    });

    let mut store = ctx.open_store()?;
    let now = Utc::now();
    let outcome = reconcile_at(&mut store, &parsed.entries, &source, now).map_err(CliError::persistence)?;

    // The database is committed at this point; a report failure below
    // leaves it updated and only loses the CSV copies.
    let (snapshot, removals_log) = if no_csv {
        (None, None)
    } else {
        let data_dir = &ctx.settings.data_dir;
        let snapshot = write_roster_snapshot(data_dir, &parsed.entries, now).map_err(CliError::report)?;
        let removals_log = if outcome.removed.is_empty() {
            None
        } else {
            Some(append_removals(data_dir, &outcome.removed, now).map_err(CliError::report)?)
        };
        (Some(snapshot), removals_log)
    };

    if json {
        return print_json(&IngestReport {
            source: &source,
            entries: parsed.entries.len(),
            skipped: &parsed.skipped,
            outcome: &outcome,
            snapshot,
            removals_log,
        });
    }

    let skipped = parsed.skipped.total();
    if skipped > 0 {
        println!("Processed {} friends from {} ({} entries skipped)", parsed.entries.len(), source, skipped);
    } else {
        println!("Processed {} friends from {}", parsed.entries.len(), source);
    }
    println!("Active friends:  {}", outcome.total_active);
    println!("Removed:         {}", outcome.removed.len());
    for name in &outcome.removed {
        println!("  - {}", name);
    }
    println!("Added:           {}", outcome.added.len());
    for name in &outcome.added {
        println!("  + {}", name);
    }
    if let Some(path) = snapshot {
        println!("Snapshot:        {}", path.display());
    }
    if let Some(path) = removals_log {
        println!("Removals log:    {}", path.display());
    }
    Ok(())
}
