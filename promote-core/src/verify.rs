//! Content-equivalence checks that catch promoted commits the ancestry walk
//! cannot see: squashed, cherry-picked or behind a stale sync point.

use crate::config::Deadline;
use crate::error::{AnalyzeError, HistoryResult};
use crate::history::{CommitId, CommitMeta, ContentSignature, HistoryReader};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pending,
    AlreadyPresent,
    Ambiguous,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::Pending => "pending",
            Verdict::AlreadyPresent => "already-present",
            Verdict::Ambiguous => "ambiguous",
        };
        f.write_str(text)
    }
}

/// Why a candidate got its verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "kebab-case")]
pub enum VerdictReason {
    /// Merged downstream with its history intact
    ReachableFromDownstream,
    NoSignalFired,
    BothSignalsFired,
    SignatureOnly,
    ContentOnly,
    EmptyChangeset,
    DuplicateOfEarlierCandidate { earlier: CommitId },
}

impl VerdictReason {
    pub fn code(&self) -> &'static str {
        match self {
            VerdictReason::ReachableFromDownstream => "reachable-from-downstream",
            VerdictReason::NoSignalFired => "no-signal-fired",
            VerdictReason::BothSignalsFired => "both-signals-fired",
            VerdictReason::SignatureOnly => "signature-only",
            VerdictReason::ContentOnly => "content-only",
            VerdictReason::EmptyChangeset => "empty-changeset",
            VerdictReason::DuplicateOfEarlierCandidate { .. } => "duplicate-of-earlier-candidate",
        }
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictReason::ReachableFromDownstream => {
                write!(f, "already reachable from the downstream tip")
            }
            VerdictReason::NoSignalFired => {
                write!(f, "content not found downstream")
            }
            VerdictReason::BothSignalsFired => {
                write!(f, "signature and content both found downstream")
            }
            VerdictReason::SignatureOnly => {
                write!(f, "signature found downstream but content differs from the squash anchor")
            }
            VerdictReason::ContentOnly => {
                write!(f, "content matches the squash anchor but no downstream commit has this signature")
            }
            VerdictReason::EmptyChangeset => write!(f, "commit changes no files"),
            VerdictReason::DuplicateOfEarlierCandidate { earlier } => {
                write!(f, "duplicate of earlier candidate {}", earlier.get(..8).unwrap_or(earlier))
            }
        }
    }
}

/// Outcome of the two independent equivalence signals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    /// (a) a downstream commit carries the same content signature
    pub signature_match: bool,
    /// (b) every file the candidate writes already has that content in the
    /// squash anchor
    pub content_absorbed: bool,
}

/// Both signals must agree; disagreement is surfaced, never resolved here
pub fn decide(signals: Signals, empty_changeset: bool) -> (Verdict, VerdictReason) {
    if empty_changeset {
        return (Verdict::AlreadyPresent, VerdictReason::EmptyChangeset);
    }
    match (signals.signature_match, signals.content_absorbed) {
        (true, true) => (Verdict::AlreadyPresent, VerdictReason::BothSignalsFired),
        (false, false) => (Verdict::Pending, VerdictReason::NoSignalFired),
        (true, false) => (Verdict::Ambiguous, VerdictReason::SignatureOnly),
        (false, true) => (Verdict::Ambiguous, VerdictReason::ContentOnly),
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub commit: CommitMeta,
    pub signature: ContentSignature,
    pub signals: Signals,
    pub verdict: Verdict,
    pub reason: VerdictReason,
}

/// Downstream commit whose full content signal (b) compares against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquashAnchor {
    pub commit: CommitId,
    /// `false` when no squash commit was found and the tip stands in
    pub matched_pattern: bool,
}

#[derive(Clone)]
pub struct ContentVerifier {
    history: Arc<dyn HistoryReader>,
    index: Arc<HashSet<ContentSignature>>,
    downstream_tip: CommitId,
    anchor: SquashAnchor,
    max_workers: usize,
}

impl ContentVerifier {
    /// Index downstream signatures above `boundary` and pick the squash
    /// anchor. Commits below the boundary are shared by both stages.
    pub fn prepare(
        history: Arc<dyn HistoryReader>,
        downstream_tip: &str,
        boundary: Option<&str>,
        squash: &Regex,
        max_workers: usize,
        deadline: &Deadline,
    ) -> Result<Self, AnalyzeError> {
        let mut index = HashSet::new();
        history.walk_ancestors(downstream_tip, boundary, &mut |id| {
            deadline.check()?;
            if !history.is_merge(&id)? {
                index.insert(history.content_signature(&id)?);
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let anchor = find_squash_anchor(history.as_ref(), downstream_tip, squash, deadline)?;
        debug!(
            signatures = index.len(),
            anchor = %anchor.commit,
            matched = anchor.matched_pattern,
            "prepared content verifier"
        );

        Ok(Self {
            history,
            index: Arc::new(index),
            downstream_tip: downstream_tip.to_string(),
            anchor,
            max_workers,
        })
    }

    pub fn anchor(&self) -> &SquashAnchor {
        &self.anchor
    }

    /// Number of distinct downstream signatures signal (a) checks against
    pub fn indexed(&self) -> usize {
        self.index.len()
    }

    /// Run both signals for one candidate. A candidate the downstream tip
    /// already reaches is present whatever the signals say.
    pub fn verify_one(&self, commit: CommitMeta) -> HistoryResult<Verification> {
        let signature = self.history.content_signature(&commit.id)?;
        let changes = self.history.changeset(&commit.id)?;

        let mut content_absorbed = !changes.is_empty();
        for change in &changes {
            if self.history.file_at(&self.anchor.commit, &change.path)? != change.blob {
                content_absorbed = false;
                break;
            }
        }

        let signals = Signals {
            signature_match: self.index.contains(&signature),
            content_absorbed,
        };
        let (verdict, reason) = if self.history.is_ancestor(&commit.id, &self.downstream_tip)? {
            (Verdict::AlreadyPresent, VerdictReason::ReachableFromDownstream)
        } else {
            decide(signals, changes.is_empty())
        };
        if verdict == Verdict::Ambiguous {
            warn!(
                commit = %commit.short_id(),
                signature_match = signals.signature_match,
                content_absorbed = signals.content_absorbed,
                "content-equivalence signals disagree"
            );
        }

        Ok(Verification {
            commit,
            signature,
            signals,
            verdict,
            reason,
        })
    }

    /// Verify every candidate on a bounded pool of blocking workers.
    /// Results come back in candidate order.
    pub async fn verify_all(
        &self,
        candidates: Vec<CommitMeta>,
        deadline: Deadline,
    ) -> Result<Vec<Verification>, AnalyzeError> {
        let total = candidates.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let workers = total.min(self.max_workers).max(1);
        debug!(candidates = total, workers, "verifying candidates");
        let permits = Arc::new(Semaphore::new(workers));

        let mut tasks = JoinSet::new();
        for (idx, commit) in candidates.into_iter().enumerate() {
            let permits = permits.clone();
            let verifier = self.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.map_err(|e| {
                    AnalyzeError::BackendUnavailable(format!("worker pool closed: {e}"))
                })?;
                deadline.check()?;
                let verification = tokio::task::spawn_blocking(move || verifier.verify_one(commit))
                    .await
                    .map_err(|e| {
                        AnalyzeError::BackendUnavailable(format!("verification worker failed: {e}"))
                    })??;
                Ok::<_, AnalyzeError>((idx, verification))
            });
        }

        let mut slots: Vec<Option<Verification>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            let (idx, verification) = joined.map_err(|e| {
                AnalyzeError::BackendUnavailable(format!("verification worker failed: {e}"))
            })??;
            slots[idx] = Some(verification);
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Most recent squash commit on the downstream first-parent line, or the
/// tip itself when there is none
fn find_squash_anchor(
    history: &dyn HistoryReader,
    downstream_tip: &str,
    squash: &Regex,
    deadline: &Deadline,
) -> Result<SquashAnchor, AnalyzeError> {
    let mut current = downstream_tip.to_string();
    loop {
        deadline.check()?;
        let commit = history.commit(&current)?;
        if !commit.is_merge() && squash.is_match(&commit.message) {
            return Ok(SquashAnchor {
                commit: commit.id,
                matched_pattern: true,
            });
        }
        match commit.parents.into_iter().next() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    Ok(SquashAnchor {
        commit: downstream_tip.to_string(),
        matched_pattern: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SQUASH_PATTERN;
    use crate::history::{Ancestors, BlobId, FileChange};
    use crate::memory::tests::GraphBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn squash() -> Regex {
        Regex::new(DEFAULT_SQUASH_PATTERN).unwrap()
    }

    /// upstream:   root - a - b - c
    /// downstream: root - s1 "Promote (#1)" holding a's and b's content
    ///                  - hotfix carrying c's signature under new content
    fn fixture() -> Arc<dyn HistoryReader> {
        let dag = GraphBuilder::new()
            .commit("root", None, "r.txt", "r")
            .commit("a", Some("root"), "a.txt", "a1")
            .commit("b", Some("a"), "b.txt", "b1")
            .commit("c", Some("b"), "c.txt", "c1")
            .commit_with(
                "s1",
                Some("root"),
                "Promote staging (#1)",
                "sig-squash",
                &[("a.txt", Some("a1")), ("b.txt", Some("b1"))],
            )
            .commit_with("hotfix", Some("s1"), "hotfix", "sig-c", &[("c.txt", Some("c-other"))])
            .commit_with("empty", Some("c"), "empty", "sig-empty", &[])
            .build();
        Arc::new(dag)
    }

    fn verifier(history: Arc<dyn HistoryReader>) -> ContentVerifier {
        ContentVerifier::prepare(history, "hotfix", Some("root"), &squash(), 4, &deadline()).unwrap()
    }

    fn meta(history: &Arc<dyn HistoryReader>, id: &str) -> CommitMeta {
        history.commit(id).unwrap()
    }

    #[test]
    fn test_decide_truth_table() {
        let s = |a, b| Signals { signature_match: a, content_absorbed: b };
        assert_eq!(decide(s(true, true), false).0, Verdict::AlreadyPresent);
        assert_eq!(decide(s(false, false), false).0, Verdict::Pending);
        assert_eq!(decide(s(true, false), false), (Verdict::Ambiguous, VerdictReason::SignatureOnly));
        assert_eq!(decide(s(false, true), false), (Verdict::Ambiguous, VerdictReason::ContentOnly));
        assert_eq!(decide(s(false, false), true), (Verdict::AlreadyPresent, VerdictReason::EmptyChangeset));
    }

    #[test]
    fn test_squash_anchor_is_most_recent_squash() {
        let history = fixture();
        let verifier = verifier(history);
        assert_eq!(
            verifier.anchor(),
            &SquashAnchor { commit: "s1".to_string(), matched_pattern: true }
        );
    }

    #[test]
    fn test_squash_anchor_falls_back_to_tip() {
        let history = fixture();
        let anchor = find_squash_anchor(history.as_ref(), "c", &squash(), &deadline()).unwrap();
        assert_eq!(anchor, SquashAnchor { commit: "c".to_string(), matched_pattern: false });
    }

    #[test]
    fn test_content_signal_without_signature_is_ambiguous() {
        let history = fixture();
        let verifier = verifier(history.clone());

        let a = verifier.verify_one(meta(&history, "a")).unwrap();
        assert_eq!(a.signals, Signals { signature_match: false, content_absorbed: true });
        assert_eq!(a.verdict, Verdict::Ambiguous);
    }

    #[test]
    fn test_signature_signal_without_content_is_ambiguous() {
        let history = fixture();
        let verifier = verifier(history.clone());

        let c = verifier.verify_one(meta(&history, "c")).unwrap();
        assert_eq!(c.signals, Signals { signature_match: true, content_absorbed: false });
        assert_eq!(c.verdict, Verdict::Ambiguous);
        assert_eq!(c.reason, VerdictReason::SignatureOnly);
    }

    #[test]
    fn test_empty_changeset_is_already_present() {
        let history = fixture();
        let verifier = verifier(history.clone());

        let empty = verifier.verify_one(meta(&history, "empty")).unwrap();
        assert_eq!(empty.verdict, Verdict::AlreadyPresent);
        assert_eq!(empty.reason.code(), "empty-changeset");
    }

    #[tokio::test]
    async fn test_verify_all_keeps_candidate_order() {
        let history = fixture();
        let verifier = verifier(history.clone());

        let candidates: Vec<CommitMeta> =
            ["c", "a", "b", "empty"].iter().map(|id| meta(&history, id)).collect();
        let results = verifier.verify_all(candidates, deadline()).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|v| v.commit.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "empty"]);
    }

    #[tokio::test]
    async fn test_verify_all_respects_expired_deadline() {
        let history = fixture();
        let verifier = verifier(history.clone());

        let candidates = vec![meta(&history, "a")];
        let err = verifier
            .verify_all(candidates, Deadline::after(Duration::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Timeout(_)));
    }

    #[test]
    fn test_commit_reachable_from_downstream_is_already_present() {
        let history = fixture();
        // Downstream took b with its history, a plain merge rather than a squash
        let verifier =
            ContentVerifier::prepare(history.clone(), "c", Some("root"), &squash(), 4, &deadline())
                .unwrap();

        let b = verifier.verify_one(meta(&history, "b")).unwrap();
        assert_eq!(b.verdict, Verdict::AlreadyPresent);
        assert_eq!(b.reason, VerdictReason::ReachableFromDownstream);
        assert_eq!(b.reason.code(), "reachable-from-downstream");
        assert!(b.signals.signature_match);

        let empty = verifier.verify_one(meta(&history, "empty")).unwrap();
        assert_eq!(empty.reason, VerdictReason::EmptyChangeset);
    }

    /// Records how many changeset reads overlap
    struct Tracking {
        inner: graph::Dag,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl HistoryReader for Tracking {
        fn resolve(&self, reference: &str) -> HistoryResult<CommitId> {
            HistoryReader::resolve(&self.inner, reference)
        }
        fn commit(&self, id: &str) -> HistoryResult<CommitMeta> {
            self.inner.commit(id)
        }
        fn content_signature(&self, id: &str) -> HistoryResult<ContentSignature> {
            self.inner.content_signature(id)
        }
        fn changeset(&self, id: &str) -> HistoryResult<Vec<FileChange>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.changeset(id)
        }
        fn file_at(&self, id: &str, path: &str) -> HistoryResult<Option<BlobId>> {
            HistoryReader::file_at(&self.inner, id, path)
        }
        fn ancestors_excluding(&self, tip: &str, hide: Option<&str>) -> HistoryResult<Ancestors> {
            self.inner.ancestors_excluding(tip, hide)
        }
        fn is_ancestor(&self, ancestor: &str, descendant: &str) -> HistoryResult<bool> {
            HistoryReader::is_ancestor(&self.inner, ancestor, descendant)
        }
        fn merge_base(&self, a: &str, b: &str) -> HistoryResult<Option<CommitId>> {
            HistoryReader::merge_base(&self.inner, a, b)
        }
    }

    fn tracked() -> Arc<Tracking> {
        let dag = GraphBuilder::new()
            .commit("root", None, "r.txt", "r")
            .commit("a", Some("root"), "a.txt", "a")
            .commit("b", Some("a"), "b.txt", "b")
            .commit("c", Some("b"), "c.txt", "c")
            .commit("d", Some("c"), "d.txt", "d")
            .commit("e", Some("d"), "e.txt", "e")
            .commit("main", Some("root"), "m.txt", "m")
            .build();
        Arc::new(Tracking {
            inner: dag,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    async fn peak_with(max_workers: usize) -> usize {
        let tracking = tracked();
        let history: Arc<dyn HistoryReader> = tracking.clone();
        let verifier = ContentVerifier::prepare(
            history.clone(),
            "main",
            Some("root"),
            &squash(),
            max_workers,
            &deadline(),
        )
        .unwrap();

        let candidates: Vec<CommitMeta> =
            ["a", "b", "c", "d", "e"].iter().map(|id| meta(&history, id)).collect();
        let results = verifier.verify_all(candidates, deadline()).await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|v| v.verdict == Verdict::Pending));
        tracking.peak.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_verify_all_stays_within_max_workers() {
        assert_eq!(peak_with(1).await, 1);
        assert!(peak_with(2).await <= 2);
    }
}
