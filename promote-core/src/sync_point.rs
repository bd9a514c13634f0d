use crate::config::{compile, Deadline};
use crate::error::AnalyzeError;
use crate::history::{stage_short_name, CommitId, CommitMeta, HistoryReader};
use regex::Regex;
use std::ops::ControlFlow;
use tracing::debug;

/// Decides whether a merge commit certifies a downstream sync
pub trait MarkerPredicate: Send + Sync {
    fn matches(&self, commit: &CommitMeta) -> bool;

    fn describe(&self) -> String {
        "custom predicate".to_string()
    }
}

impl<F> MarkerPredicate for F
where
    F: Fn(&CommitMeta) -> bool + Send + Sync,
{
    fn matches(&self, commit: &CommitMeta) -> bool {
        self(commit)
    }
}

/// Marker predicate over the commit message
#[derive(Debug, Clone)]
pub struct RegexMarker {
    pattern: Regex,
}

impl RegexMarker {
    pub fn new(pattern: &str) -> Result<Self, AnalyzeError> {
        Ok(Self {
            pattern: compile("marker pattern", pattern)?,
        })
    }

    /// Case-insensitive "merge ... <stage>" where `<stage>` is the last
    /// segment of the downstream ref
    pub fn for_stage(stage: &str) -> Result<Self, AnalyzeError> {
        let name = regex::escape(stage_short_name(stage));
        Self::new(&format!("(?i)merge.*{name}"))
    }
}

impl MarkerPredicate for RegexMarker {
    fn matches(&self, commit: &CommitMeta) -> bool {
        self.pattern.is_match(&commit.message)
    }

    fn describe(&self) -> String {
        format!("message matches /{}/", self.pattern.as_str())
    }
}

/// A merge commit that folded downstream content into upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMarker {
    pub commit: CommitMeta,
    /// The non-first parent reachable from the downstream tip
    pub downstream_parent: CommitId,
}

pub struct SyncPointLocator<'a> {
    history: &'a dyn HistoryReader,
    predicate: &'a dyn MarkerPredicate,
    scan_window: usize,
}

impl<'a> SyncPointLocator<'a> {
    pub fn new(
        history: &'a dyn HistoryReader,
        predicate: &'a dyn MarkerPredicate,
        scan_window: usize,
    ) -> Self {
        Self {
            history,
            predicate,
            scan_window,
        }
    }

    /// Most recent sync marker on the upstream line, if any within the
    /// window. Older markers are superseded and never returned.
    pub fn locate(
        &self,
        upstream_tip: &str,
        downstream_tip: &str,
        deadline: &Deadline,
    ) -> Result<Option<SyncMarker>, AnalyzeError> {
        let mut merges_scanned = 0;
        let mut found = None;

        self.history.walk_ancestors(upstream_tip, None, &mut |id| {
            deadline.check()?;

            let commit = self.history.commit(&id)?;
            if !commit.is_merge() {
                return Ok(ControlFlow::Continue(()));
            }
            if merges_scanned == self.scan_window {
                debug!(window = self.scan_window, "scan window exhausted without a sync marker");
                return Ok(ControlFlow::Break(()));
            }
            merges_scanned += 1;

            if !self.predicate.matches(&commit) {
                return Ok(ControlFlow::Continue(()));
            }

            let mut downstream_parent = None;
            for parent in commit.parents.iter().skip(1) {
                if self.history.is_ancestor(parent, downstream_tip)? {
                    downstream_parent = Some(parent.clone());
                    break;
                }
            }

            match downstream_parent {
                Some(downstream_parent) => {
                    debug!(
                        commit = %commit.short_id(),
                        merges_scanned,
                        "found sync marker"
                    );
                    found = Some(SyncMarker {
                        commit,
                        downstream_parent,
                    });
                    Ok(ControlFlow::Break(()))
                }
                None => {
                    debug!(
                        commit = %commit.short_id(),
                        "marker message matched but no merged parent is on the downstream stage"
                    );
                    Ok(ControlFlow::Continue(()))
                }
            }
        })?;

        Ok(found)
    }
}
