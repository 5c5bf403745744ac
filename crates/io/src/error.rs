use thiserror::Error;

/// Failures while writing reports, exports, or backups.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },
    #[error("CSV write error: {0}")]
    Csv(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("manifest error: {0}")]
    Manifest(String),
}

impl ReportError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io { path: path.display().to_string(), reason: err.to_string() }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } => "A report file could not be written.",
            Self::Csv(_) => "A CSV report could not be written.",
            Self::Database(_) => "The friends database could not be read.",
            Self::Manifest(_) => "The backup manifest could not be written.",
        }
    }
}

impl From<csv::Error> for ReportError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}
