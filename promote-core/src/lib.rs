pub mod error;
pub mod history;
pub mod repository;
pub mod diff;
pub mod memory;
pub mod config;
pub mod sync_point;
pub mod range;
pub mod verify;
pub mod classify;
pub mod report;
pub mod pipeline;

pub use error::{AnalyzeError, HistoryError, HistoryResult};
pub use error::{EXIT_BACKEND_UNAVAILABLE, EXIT_INVALID_ARGS, EXIT_OK, EXIT_TIMEOUT};
pub use history::{Ancestors, BlobId, CommitId, CommitMeta, ContentSignature, FileChange, HistoryReader};
pub use repository::GitHistory;
pub use memory::export_snapshot;
pub use config::{AnalyzeConfig, Deadline, DEFAULT_SCAN_WINDOW, DEFAULT_SQUASH_PATTERN, DEFAULT_TIMEOUT_SECS};
pub use sync_point::{MarkerPredicate, RegexMarker, SyncMarker, SyncPointLocator};
pub use range::{ExtractedRange, RangeExtractor, SyncSource};
pub use verify::{ContentVerifier, Signals, SquashAnchor, Verdict, VerdictReason, Verification};
pub use classify::{classify, Classification, PromotionCandidate};
pub use report::{Counts, Failure, Outcome, PromotionReport, StageTip, Warning};
pub use pipeline::{AnalyzeRequest, Analyzer, Stage};
