use thiserror::Error;

/// Whole-document failures from the ingest parser.
///
/// Per-entry problems never surface here; they are skipped and counted in
/// [`crate::ingest::SkipReport`]. `NoValidEntries` is the only variant that
/// depends on entry contents.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Source file could not be read.
    #[error("cannot read {path}: {reason}")]
    NotFound { path: String, reason: String },
    /// Zero bytes, or whitespace only.
    #[error("input is empty")]
    Empty,
    /// Input exceeds the configured byte limit.
    #[error("input is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    /// Input is not UTF-8.
    #[error("input is not valid UTF-8: {0}")]
    InvalidEncoding(String),
    /// Input is not JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// JSON parsed, but no friend list could be located in it.
    #[error("unrecognized structure: {0}")]
    UnrecognizedStructure(String),
    /// Friend list located, but every entry was rejected.
    #[error("no valid entries ({skipped} skipped)")]
    NoValidEntries { skipped: usize },
}

impl ParseError {
    /// Short category shown to end users. Detail goes to the log.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "The file could not be found or read.",
            Self::Empty => "The file is empty.",
            Self::TooLarge { .. } => "The file is too large.",
            Self::InvalidEncoding(_) => "The file is not UTF-8 text.",
            Self::InvalidJson(_) => "The file is not valid JSON.",
            Self::UnrecognizedStructure(_) => {
                "Could not find a friends list in the file. Please check the file format."
            }
            Self::NoValidEntries { .. } => "The file contains no usable friend names.",
        }
    }
}

/// Failures from the persistence port. Any of these aborts the whole
/// reconciliation with no state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Store cannot be opened, is locked, or is busy.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A roster invariant or storage constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),
    /// Any other storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PersistenceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "The friends database is unavailable. Try again later.",
            Self::Constraint(_) => "The friends database rejected the update. Nothing was changed.",
            Self::Storage(_) => "The friends database could not be updated. Nothing was changed.",
        }
    }
}
