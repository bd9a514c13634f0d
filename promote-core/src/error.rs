use std::time::Duration;
use thiserror::Error;

/// Exit code when a report was produced (warnings allowed).
pub const EXIT_OK: u8 = 0;
/// Exit code when the history store could not answer.
pub const EXIT_BACKEND_UNAVAILABLE: u8 = 1;
/// Exit code when the pipeline ran past its wall-clock budget.
pub const EXIT_TIMEOUT: u8 = 2;
/// Exit code for bad arguments, bad patterns and unresolvable refs.
pub const EXIT_INVALID_ARGS: u8 = 3;

/// Failures raised by a [`HistoryReader`](crate::history::HistoryReader).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// A ref or commit id does not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// The history store cannot be reached or failed mid-query.
    #[error("history backend unavailable: {0}")]
    BackendUnavailable(String),
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

impl From<git2::Error> for HistoryError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => HistoryError::NotFound(err.message().to_string()),
            _ => HistoryError::BackendUnavailable(err.message().to_string()),
        }
    }
}

impl From<graph::DagError> for HistoryError {
    fn from(err: graph::DagError) -> Self {
        HistoryError::NotFound(err.to_string())
    }
}

/// Fatal pipeline failures. Any of these aborts the run without a report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalyzeError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("history backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("analysis exceeded its time budget of {0:?}")]
    Timeout(Duration),
}

impl From<HistoryError> for AnalyzeError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(what) => AnalyzeError::NotFound(what),
            HistoryError::BackendUnavailable(detail) => AnalyzeError::BackendUnavailable(detail),
        }
    }
}

impl AnalyzeError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            AnalyzeError::BackendUnavailable(_) => EXIT_BACKEND_UNAVAILABLE,
            AnalyzeError::Timeout(_) => EXIT_TIMEOUT,
            AnalyzeError::InvalidConfig(_) | AnalyzeError::NotFound(_) => EXIT_INVALID_ARGS,
        }
    }

    /// Stable machine-readable code used in failure reports
    pub fn code(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidConfig(_) => "invalid-config",
            AnalyzeError::NotFound(_) => "not-found",
            AnalyzeError::BackendUnavailable(_) => "backend-unavailable",
            AnalyzeError::Timeout(_) => "timeout",
        }
    }
}
