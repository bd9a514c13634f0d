//! Read-only queries over a commit graph.
//!
//! Every analysis stage talks to history through [`HistoryReader`]. The trait
//! is object safe and `Send + Sync`, so one reader can be shared by the
//! verification workers.

use crate::error::{AnalyzeError, HistoryResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;

/// Opaque, stable commit identifier (a hex oid for git)
pub type CommitId = String;

/// Identifier of a file's content
pub type BlobId = String;

/// Changeset fingerprint independent of graph position
pub type ContentSignature = String;

/// Commit metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub id: CommitId,
    pub parents: Vec<CommitId>,
    pub message: String,
    pub authored_at: DateTime<Utc>,
}

impl CommitMeta {
    pub fn is_merge(&self) -> bool {
        self.parents.len() >= 2
    }

    /// First line of the message
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// One file touched by a commit, relative to its first parent
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    /// Post-image blob, `None` for a deletion
    pub blob: Option<BlobId>,
}

/// Commits in reverse-chronological topological order: every commit comes
/// before its parents, newer commits first among those that are ready.
#[derive(Debug)]
pub struct Ancestors {
    ids: std::vec::IntoIter<CommitId>,
}

impl Ancestors {
    pub fn new(ids: Vec<CommitId>) -> Self {
        Self { ids: ids.into_iter() }
    }
}

impl Iterator for Ancestors {
    type Item = CommitId;

    fn next(&mut self) -> Option<CommitId> {
        self.ids.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl ExactSizeIterator for Ancestors {}

pub trait HistoryReader: Send + Sync {
    /// Resolve a ref name or commit id to a commit
    fn resolve(&self, reference: &str) -> HistoryResult<CommitId>;

    fn commit(&self, id: &str) -> HistoryResult<CommitMeta>;

    fn parents(&self, id: &str) -> HistoryResult<Vec<CommitId>> {
        Ok(self.commit(id)?.parents)
    }

    fn is_merge(&self, id: &str) -> HistoryResult<bool> {
        Ok(self.parents(id)?.len() >= 2)
    }

    fn message(&self, id: &str) -> HistoryResult<String> {
        Ok(self.commit(id)?.message)
    }

    fn content_signature(&self, id: &str) -> HistoryResult<ContentSignature>;

    /// Files changed by `id` against its first parent, sorted by path
    fn changeset(&self, id: &str) -> HistoryResult<Vec<FileChange>>;

    /// Blob at `path` in the full content of `id`
    fn file_at(&self, id: &str, path: &str) -> HistoryResult<Option<BlobId>>;

    /// Ancestors of `tip` (itself included) that are not reachable from `hide`
    fn ancestors_excluding(&self, tip: &str, hide: Option<&str>) -> HistoryResult<Ancestors>;

    fn ancestors(&self, tip: &str) -> HistoryResult<Ancestors> {
        self.ancestors_excluding(tip, None)
    }

    /// Feed ancestors to `visit` in [`ancestors_excluding`] order, stopping as
    /// soon as it breaks or fails. Backends that can stream override this so
    /// callers pay only for the commits they look at.
    ///
    /// [`ancestors_excluding`]: HistoryReader::ancestors_excluding
    fn walk_ancestors(
        &self,
        tip: &str,
        hide: Option<&str>,
        visit: &mut dyn FnMut(CommitId) -> Result<ControlFlow<()>, AnalyzeError>,
    ) -> Result<(), AnalyzeError> {
        for id in self.ancestors_excluding(tip, hide)? {
            if visit(id)?.is_break() {
                break;
            }
        }
        Ok(())
    }

    /// `ancestor` is `descendant` or reachable from it
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> HistoryResult<bool>;

    /// A best common ancestor, `None` for disjoint histories
    fn merge_base(&self, a: &str, b: &str) -> HistoryResult<Option<CommitId>>;
}

/// Last path segment of a ref: `refs/remotes/origin/main` becomes `main`
pub fn stage_short_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}
