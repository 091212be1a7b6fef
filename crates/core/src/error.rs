use crate::llm::error::{AnalysisError, AnalysisErrorKind};
use std::io;
use std::path::Path;

/// Every failure the core surfaces to its collaborators.
///
/// Low-level I/O, CSV and serde failures are classified into one of these
/// variants where they happen. Snapshot read absence is not an error; see
/// [`crate::storage::snapshot::SnapshotRead`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("source not readable (permission denied): {0}")]
    SourcePermissionDenied(String),

    #[error("source read failed: {0}")]
    SourceIo(String),

    #[error("source corrupted: {0}")]
    SourceCorrupted(String),

    #[error("aggregation failed: {0}")]
    Aggregation(String),

    #[error("snapshot write failed: {0}")]
    SnapshotWrite(String),

    #[error("range too large: payload is {size} bytes (limit {limit})")]
    RangeTooLarge { size: usize, limit: usize },

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Classifies an error raised while opening or reading the input export.
    pub fn from_source_io(path: &Path, err: io::Error) -> Self {
        let detail = format!("{}: {err}", path.display());
        match err.kind() {
            io::ErrorKind::NotFound => Self::SourceNotFound(detail),
            io::ErrorKind::PermissionDenied => Self::SourcePermissionDenied(detail),
            _ => Self::SourceIo(detail),
        }
    }

    /// Stable machine-readable kind, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "source_not_found",
            Self::SourcePermissionDenied(_) => "source_permission_denied",
            Self::SourceIo(_) => "source_io",
            Self::SourceCorrupted(_) => "source_corrupted",
            Self::Aggregation(_) => "aggregation_failed",
            Self::SnapshotWrite(_) => "snapshot_write_failed",
            Self::RangeTooLarge { .. } => "range_too_large",
            Self::InvalidRange(_) => "invalid_range",
            Self::Analysis(e) => e.kind.as_str(),
        }
    }

    /// One actionable sentence per kind. Never includes paths or raw upstream output.
    pub fn user_message(&self) -> String {
        match self {
            Self::SourceNotFound(_) => {
                "The analytics export could not be found. Check that the source file has been uploaded.".to_string()
            }
            Self::SourcePermissionDenied(_) => {
                "The analytics export exists but cannot be read. Check the file permissions.".to_string()
            }
            Self::SourceIo(_) => {
                "Reading the analytics export failed. Try again; if it persists, re-upload the file.".to_string()
            }
            Self::SourceCorrupted(_) => {
                "The analytics export looks corrupted or contains no valid rows. Re-export and upload it again.".to_string()
            }
            Self::Aggregation(_) => {
                "The analytics export produced no daily data. Check that the date column is populated.".to_string()
            }
            Self::SnapshotWrite(_) => {
                "Daily statistics were computed but could not be saved. Check free disk space and write permissions.".to_string()
            }
            Self::RangeTooLarge { .. } => {
                "The selected date range is too large to analyze. Choose a shorter range.".to_string()
            }
            Self::InvalidRange(detail) => format!("The date range is invalid: {detail}."),
            Self::Analysis(e) => match e.kind {
                AnalysisErrorKind::Timeout => {
                    "The analysis service timed out. Try again in a moment.".to_string()
                }
                AnalysisErrorKind::Unavailable => {
                    "The analysis service is temporarily unavailable. Try again in a moment.".to_string()
                }
                AnalysisErrorKind::AuthFailure => {
                    "The analysis service rejected our credentials. Contact the administrator.".to_string()
                }
                AnalysisErrorKind::QuotaExceeded => {
                    "The analysis service quota has been exhausted. Try again later.".to_string()
                }
                AnalysisErrorKind::InvalidResponse => {
                    "The analysis service returned an unusable response. Try again.".to_string()
                }
            },
        }
    }
}
