//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain       | Description                               |
//! |---------|--------------|-------------------------------------------|
//! | 0       | Universal    | Success                                   |
//! | 1       | Universal    | General error (unspecified)               |
//! | 2       | Universal    | CLI usage error (bad args, wrong file type) |
//! | 3       | Universal    | Settings could not be loaded or validated |
//! | 4-9     | ingest       | Export file rejected, by kind             |
//! | 10-12   | storage      | Database, report files, integrity         |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use unfriend_recon::ParseError;

// =============================================================================
// Universal (0-3)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, non-JSON upload.
pub const EXIT_USAGE: u8 = 2;

/// Settings file unreadable, malformed, or invalid.
pub const EXIT_CONFIG: u8 = 3;

// =============================================================================
// Ingest (4-9)
// =============================================================================

/// Export file missing or unreadable.
pub const EXIT_INPUT_NOT_FOUND: u8 = 4;

/// Export file is empty or whitespace only.
pub const EXIT_INPUT_EMPTY: u8 = 5;

/// Export file exceeds `max_upload_bytes`.
pub const EXIT_INPUT_TOO_LARGE: u8 = 6;

/// Export file is not UTF-8.
pub const EXIT_INPUT_ENCODING: u8 = 7;

/// Export file is not JSON.
pub const EXIT_INPUT_JSON: u8 = 8;

/// JSON with no recognizable friend list, or a list with no usable names.
pub const EXIT_INPUT_STRUCTURE: u8 = 9;

// =============================================================================
// Storage (10-12)
// =============================================================================

/// Database unavailable or the reconciliation was rolled back.
pub const EXIT_PERSISTENCE: u8 = 10;

/// CSV snapshot, export, or backup could not be written.
pub const EXIT_REPORT_IO: u8 = 11;

/// `integrity` found problems.
pub const EXIT_INTEGRITY: u8 = 12;

/// Map a parse failure to its exit code.
pub fn parse_exit_code(err: &ParseError) -> u8 {
    match err {
        ParseError::NotFound { .. } => EXIT_INPUT_NOT_FOUND,
        ParseError::Empty => EXIT_INPUT_EMPTY,
        ParseError::TooLarge { .. } => EXIT_INPUT_TOO_LARGE,
        ParseError::InvalidEncoding(_) => EXIT_INPUT_ENCODING,
        ParseError::InvalidJson(_) => EXIT_INPUT_JSON,
        ParseError::UnrecognizedStructure(_) | ParseError::NoValidEntries { .. } => EXIT_INPUT_STRUCTURE,
    }
}
