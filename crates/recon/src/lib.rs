//! `unfriend-recon`: friend-list ingest and snapshot reconciliation.
//!
//! Pure engine crate: parses export bytes into normalized entries and
//! reconciles them against any [`store::RosterStore`]. No CLI or file-format
//! dependencies beyond JSON input.

pub mod engine;
pub mod error;
pub mod ingest;
pub mod model;
pub mod store;

pub use engine::{reconcile, reconcile_at, Reconciler};
pub use error::{ParseError, PersistenceError};
pub use ingest::{parse, parse_file, parse_with_report, ParseLimits, ParsedRoster, SkipReason, SkipReport};
pub use model::{Friend, FriendStatus, HistoryEntry, NormalizedEntry, ReconOutcome, RemovalRecord};
pub use store::{MemoryStore, RosterStore, RosterTx};
