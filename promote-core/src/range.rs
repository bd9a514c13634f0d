use crate::config::Deadline;
use crate::error::AnalyzeError;
use crate::history::{CommitId, CommitMeta, HistoryReader};
use crate::sync_point::SyncMarker;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::ops::ControlFlow;
use tracing::{debug, warn};

/// Where the "already promoted" boundary came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SyncSource {
    /// An explicit sync-marker merge on the upstream line
    Marker { commit: CommitId },
    /// No marker; the best common ancestor of both tips stands in for one
    CommonAncestor { commit: CommitId },
    /// The stages share no history
    Disjoint,
}

impl SyncSource {
    /// Commit that bounds the range, if any
    pub fn boundary(&self) -> Option<&str> {
        match self {
            SyncSource::Marker { commit } | SyncSource::CommonAncestor { commit } => Some(commit.as_str()),
            SyncSource::Disjoint => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            SyncSource::Marker { commit } => commit.clone(),
            SyncSource::CommonAncestor { .. } => "none — fallback to common-ancestor".to_string(),
            SyncSource::Disjoint => "none — disjoint history".to_string(),
        }
    }
}

/// Candidate commits in promotion order
#[derive(Debug, Clone)]
pub struct ExtractedRange {
    pub sync: SyncSource,
    /// Non-merge commits, oldest first
    pub commits: Vec<CommitMeta>,
    /// Merge commits inside the range, left out of the candidates
    pub merges_skipped: usize,
}

pub struct RangeExtractor<'a> {
    history: &'a dyn HistoryReader,
}

impl<'a> RangeExtractor<'a> {
    pub fn new(history: &'a dyn HistoryReader) -> Self {
        Self { history }
    }

    pub fn extract(
        &self,
        upstream_tip: &str,
        downstream_tip: &str,
        marker: Option<&SyncMarker>,
        deadline: &Deadline,
    ) -> Result<ExtractedRange, AnalyzeError> {
        let sync = match marker {
            Some(marker) => SyncSource::Marker {
                commit: marker.commit.id.clone(),
            },
            None => match self.history.merge_base(upstream_tip, downstream_tip)? {
                Some(base) => {
                    warn!(
                        base = %base,
                        "no sync marker found, falling back to the common ancestor"
                    );
                    SyncSource::CommonAncestor { commit: base }
                }
                None => {
                    warn!("upstream and downstream share no history, every upstream commit is a candidate");
                    SyncSource::Disjoint
                }
            },
        };

        let mut in_range = Vec::new();
        self.history
            .walk_ancestors(upstream_tip, sync.boundary(), &mut |id| {
                deadline.check()?;
                in_range.push(self.history.commit(&id)?);
                Ok(ControlFlow::Continue(()))
            })?;

        let (merges, mut commits): (Vec<CommitMeta>, Vec<CommitMeta>) =
            oldest_first(in_range).into_iter().partition(|c| c.is_merge());
        let merges_skipped = merges.len();

        // Author time decides, topology breaks ties
        commits.sort_by_key(|c| c.authored_at);

        debug!(
            candidates = commits.len(),
            merges_skipped,
            sync = %sync.label(),
            "extracted range"
        );

        Ok(ExtractedRange {
            sync,
            commits,
            merges_skipped,
        })
    }
}

/// Parents before children. Among commits that are ready the oldest author
/// time goes first, then the smaller id, so the result depends only on the
/// graph and never on the order a backend walked it.
fn oldest_first(commits: Vec<CommitMeta>) -> Vec<CommitMeta> {
    let position: HashMap<&str, usize> = commits
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut waiting = vec![0usize; commits.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); commits.len()];
    for (i, commit) in commits.iter().enumerate() {
        for parent in &commit.parents {
            if let Some(&p) = position.get(parent.as_str()) {
                waiting[i] += 1;
                children[p].push(i);
            }
        }
    }

    let key = |i: usize| Reverse((commits[i].authored_at, commits[i].id.as_str(), i));
    let mut ready: BinaryHeap<_> = (0..commits.len())
        .filter(|&i| waiting[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(commits.len());
    while let Some(Reverse((_, _, i))) = ready.pop() {
        order.push(i);
        for &child in &children[i] {
            waiting[child] -= 1;
            if waiting[child] == 0 {
                ready.push(key(child));
            }
        }
    }

    let mut slots: Vec<Option<CommitMeta>> = commits.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
