// Storage and report I/O

pub mod backup;
pub mod csv;
pub mod error;
pub mod store;

pub use error::ReportError;
pub use store::{window_start, SqliteStore};

/// Roster database schema version.
/// Increment when the schema changes in a way that old versions can't read.
pub const SCHEMA_VERSION: u32 = 1;
