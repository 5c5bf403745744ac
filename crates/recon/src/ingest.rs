//! Friend-list ingest: raw export bytes → normalized, de-duplicated entries.
//!
//! Exports arrive in several shapes (`{"friends": [...]}`, `{"friends_v2": [...]}`,
//! `{"data": [...]}`, a bare list, or a single friend object). Entries can be
//! objects or plain strings. A malformed entry is skipped and counted; only a
//! document with zero usable entries fails.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::model::NormalizedEntry;

/// Default upload limit (16 MiB).
pub const DEFAULT_MAX_BYTES: usize = 16 * 1024 * 1024;

/// Longest accepted name, in characters, after trimming.
pub const MAX_NAME_CHARS: usize = 255;

/// Top-level keys that hold the entry list, in priority order.
const LIST_KEYS: [&str; 3] = ["friends", "friends_v2", "data"];

/// Object keys that may carry the display name, in priority order.
const NAME_KEYS: [&str; 4] = ["name", "display_name", "full_name", "title"];

const TIMESTAMP_KEY: &str = "timestamp";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_bytes: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self { max_bytes: DEFAULT_MAX_BYTES }
    }
}

// ---------------------------------------------------------------------------
// Skip accounting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Object without any non-empty name field.
    MissingName,
    /// A name field exists but holds a number, bool, list or object.
    NameNotString,
    /// Name is whitespace only.
    BlankName,
    /// Name exceeds [`MAX_NAME_CHARS`].
    NameTooLong,
    /// Exact repeat of a name seen earlier in the same document.
    Duplicate,
    /// Entry is neither an object nor a string.
    UnsupportedShape,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingName => write!(f, "missing_name"),
            Self::NameNotString => write!(f, "name_not_string"),
            Self::BlankName => write!(f, "blank_name"),
            Self::NameTooLong => write!(f, "name_too_long"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::UnsupportedShape => write!(f, "unsupported_shape"),
        }
    }
}

/// Per-reason counts of entries dropped during normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    counts: BTreeMap<SkipReason, usize>,
}

impl SkipReport {
    fn record(&mut self, reason: SkipReason) {
        *self.counts.entry(reason).or_insert(0) += 1;
    }

    pub fn count(&self, reason: SkipReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SkipReason, usize)> + '_ {
        self.counts.iter().map(|(reason, n)| (*reason, *n))
    }
}

/// Parser output: surviving entries in document order, plus what was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRoster {
    pub entries: Vec<NormalizedEntry>,
    pub skipped: SkipReport,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse an export with default limits.
pub fn parse(raw: &[u8]) -> Result<Vec<NormalizedEntry>, ParseError> {
    parse_with_report(raw, &ParseLimits::default()).map(|parsed| parsed.entries)
}

/// Parse an export, keeping the skip report.
pub fn parse_with_report(raw: &[u8], limits: &ParseLimits) -> Result<ParsedRoster, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }
    if raw.len() > limits.max_bytes {
        return Err(ParseError::TooLarge { size: raw.len(), limit: limits.max_bytes });
    }

    let raw = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);
    let text = std::str::from_utf8(raw).map_err(|e| ParseError::InvalidEncoding(e.to_string()))?;
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let doc: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let items = resolve_entry_list(doc)?;
    normalize_entries(items)
}

/// Read and parse an export file. The size limit is checked against file
/// metadata before anything is read.
pub fn parse_file(path: &Path, limits: &ParseLimits) -> Result<ParsedRoster, ParseError> {
    let not_found = |e: std::io::Error| ParseError::NotFound {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let meta = std::fs::metadata(path).map_err(not_found)?;
    let size = usize::try_from(meta.len()).unwrap_or(usize::MAX);
    if size > limits.max_bytes {
        return Err(ParseError::TooLarge { size, limit: limits.max_bytes });
    }

    let raw = std::fs::read(path).map_err(not_found)?;
    parse_with_report(&raw, limits)
}

// ---------------------------------------------------------------------------
// Structure resolution
// ---------------------------------------------------------------------------

fn resolve_entry_list(doc: Value) -> Result<Vec<Value>, ParseError> {
    match doc {
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(value) = map.remove(key) {
                    return match value {
                        Value::Array(items) => Ok(items),
                        other => Err(ParseError::UnrecognizedStructure(format!(
                            "\"{key}\" holds {}, expected a list",
                            json_kind(&other)
                        ))),
                    };
                }
            }
            if NAME_KEYS.iter().any(|key| map.contains_key(*key)) {
                return Ok(vec![Value::Object(map)]);
            }
            Err(ParseError::UnrecognizedStructure(
                "object has no friends list and no name field".into(),
            ))
        }
        Value::Array(items) => Ok(items),
        other => Err(ParseError::UnrecognizedStructure(format!(
            "top-level {}, expected an object or a list",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Entry normalization
// ---------------------------------------------------------------------------

fn normalize_entries(items: Vec<Value>) -> Result<ParsedRoster, ParseError> {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut entries = Vec::with_capacity(items.len());
    let mut skipped = SkipReport::default();

    for (index, item) in items.iter().enumerate() {
        let entry = match normalize_entry(item) {
            Ok(entry) => entry,
            Err(reason) => {
                debug!(index, %reason, "skipping friend entry");
                skipped.record(reason);
                continue;
            }
        };
        if !seen.insert(entry.name.clone()) {
            debug!(index, name = %entry.name, "skipping duplicate friend entry");
            skipped.record(SkipReason::Duplicate);
            continue;
        }
        entries.push(entry);
    }

    if entries.is_empty() {
        warn!(skipped = skipped.total(), "no usable friend entries in input");
        return Err(ParseError::NoValidEntries { skipped: skipped.total() });
    }
    if skipped.total() > 0 {
        debug!(kept = entries.len(), skipped = skipped.total(), "friend entries normalized");
    }

    Ok(ParsedRoster { entries, skipped })
}

fn normalize_entry(item: &Value) -> Result<NormalizedEntry, SkipReason> {
    match item {
        Value::String(raw) => Ok(NormalizedEntry::new(clean_name(raw)?, 0)),
        Value::Object(map) => {
            let name = clean_name(resolve_name(map)?)?;
            Ok(NormalizedEntry::new(name, resolve_timestamp(map.get(TIMESTAMP_KEY))))
        }
        _ => Err(SkipReason::UnsupportedShape),
    }
}

/// First non-empty string among [`NAME_KEYS`].
fn resolve_name(map: &Map<String, Value>) -> Result<&str, SkipReason> {
    let mut saw_non_string = false;
    for key in NAME_KEYS {
        match map.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Ok(s),
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => saw_non_string = true,
        }
    }
    Err(if saw_non_string { SkipReason::NameNotString } else { SkipReason::MissingName })
}

fn clean_name(raw: &str) -> Result<String, SkipReason> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SkipReason::BlankName);
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(SkipReason::NameTooLong);
    }
    Ok(trimmed.to_string())
}

/// Epoch seconds from a number or numeric string. Anything else, including
/// negative and non-finite values, is 0 (unknown).
fn resolve_timestamp(value: Option<&Value>) -> i64 {
    let seconds = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(float_seconds)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(float_seconds))
        }
        _ => None,
    };
    seconds.filter(|ts| *ts >= 0).unwrap_or(0)
}

fn float_seconds(value: f64) -> Option<i64> {
    if value.is_finite() && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value.trunc() as i64)
    } else {
        None
    }
}
