use crate::diff::Diff;
use crate::error::{AnalyzeError, HistoryError, HistoryResult};
use crate::history::{
    Ancestors, BlobId, CommitId, CommitMeta, ContentSignature, FileChange, HistoryReader,
};
use chrono::{DateTime, Utc};
use git2::{Oid, Repository as Git2Repository, Revwalk, Sort};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Git-backed history reader.
///
/// `git2::Repository` is `Send` but not `Sync`, so each query borrows a
/// handle from a small pool and concurrent readers open extra handles on
/// demand.
pub struct GitHistory {
    path: PathBuf,
    handles: Mutex<Vec<Git2Repository>>,
}

impl GitHistory {
    /// Open an existing repository
    pub fn open<P: AsRef<Path>>(path: P) -> HistoryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let git_repo = Git2Repository::open(&path).map_err(|e| {
            HistoryError::BackendUnavailable(format!("{}: {}", path.display(), e.message()))
        })?;

        Ok(GitHistory {
            path,
            handles: Mutex::new(vec![git_repo]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_repo<T>(
        &self,
        f: impl FnOnce(&Git2Repository) -> HistoryResult<T>,
    ) -> HistoryResult<T> {
        let pooled = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();

        let repo = match pooled {
            Some(repo) => repo,
            None => Git2Repository::open(&self.path).map_err(|e| {
                HistoryError::BackendUnavailable(format!(
                    "{}: {}",
                    self.path.display(),
                    e.message()
                ))
            })?,
        };

        let result = f(&repo);

        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(repo);

        result
    }
}

fn parse_oid(id: &str) -> HistoryResult<Oid> {
    Oid::from_str(id).map_err(|_| HistoryError::NotFound(format!("commit {id}")))
}

fn find_commit<'r>(repo: &'r Git2Repository, id: &str) -> HistoryResult<git2::Commit<'r>> {
    let oid = parse_oid(id)?;
    repo.find_commit(oid).map_err(|e| match e.code() {
        git2::ErrorCode::NotFound => HistoryError::NotFound(format!("commit {id}")),
        _ => HistoryError::from(e),
    })
}

/// Children before parents, newest first among ready commits
fn revwalk<'r>(repo: &'r Git2Repository, tip: &str, hide: Option<&str>) -> HistoryResult<Revwalk<'r>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    revwalk.push(find_commit(repo, tip)?.id())?;
    if let Some(hide) = hide {
        revwalk.hide(find_commit(repo, hide)?.id())?;
    }
    Ok(revwalk)
}

fn commit_meta(commit: &git2::Commit) -> CommitMeta {
    CommitMeta {
        id: commit.id().to_string(),
        parents: commit.parent_ids().map(|oid| oid.to_string()).collect(),
        message: commit.message().unwrap_or("").trim_end().to_string(),
        authored_at: DateTime::<Utc>::from_timestamp(commit.author().when().seconds(), 0)
            .unwrap_or_default(),
    }
}

impl HistoryReader for GitHistory {
    fn resolve(&self, reference: &str) -> HistoryResult<CommitId> {
        self.with_repo(|repo| {
            let object = repo.revparse_single(reference).map_err(|e| match e.code() {
                git2::ErrorCode::NotFound | git2::ErrorCode::Ambiguous | git2::ErrorCode::InvalidSpec => {
                    HistoryError::NotFound(format!("reference '{reference}'"))
                }
                _ => HistoryError::from(e),
            })?;
            let commit = object
                .peel_to_commit()
                .map_err(|_| HistoryError::NotFound(format!("reference '{reference}' is not a commit")))?;
            Ok(commit.id().to_string())
        })
    }

    fn commit(&self, id: &str) -> HistoryResult<CommitMeta> {
        self.with_repo(|repo| Ok(commit_meta(&find_commit(repo, id)?)))
    }

    fn content_signature(&self, id: &str) -> HistoryResult<ContentSignature> {
        self.with_repo(|repo| {
            let commit = find_commit(repo, id)?;
            Ok(Diff::new(repo).patch_id(&commit)?)
        })
    }

    fn changeset(&self, id: &str) -> HistoryResult<Vec<FileChange>> {
        self.with_repo(|repo| {
            let commit = find_commit(repo, id)?;
            Ok(Diff::new(repo).changeset(&commit)?)
        })
    }

    fn file_at(&self, id: &str, path: &str) -> HistoryResult<Option<BlobId>> {
        self.with_repo(|repo| {
            let tree = find_commit(repo, id)?.tree()?;
            match tree.get_path(Path::new(path)) {
                Ok(entry) => Ok(Some(entry.id().to_string())),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn ancestors_excluding(&self, tip: &str, hide: Option<&str>) -> HistoryResult<Ancestors> {
        self.with_repo(|repo| {
            let mut ids = Vec::new();
            for oid in revwalk(repo, tip, hide)? {
                ids.push(oid?.to_string());
            }
            Ok(Ancestors::new(ids))
        })
    }

    fn walk_ancestors(
        &self,
        tip: &str,
        hide: Option<&str>,
        visit: &mut dyn FnMut(CommitId) -> Result<ControlFlow<()>, AnalyzeError>,
    ) -> Result<(), AnalyzeError> {
        // Stream straight off the revwalk. The handle stays checked out until
        // the visitor stops; queries made by the visitor borrow other handles.
        self.with_repo(|repo| {
            for oid in revwalk(repo, tip, hide)? {
                match visit(oid?.to_string()) {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => break,
                    Err(err) => return Ok(Err(err)),
                }
            }
            Ok(Ok(()))
        })?
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> HistoryResult<bool> {
        self.with_repo(|repo| {
            let ancestor = find_commit(repo, ancestor)?.id();
            let descendant = find_commit(repo, descendant)?.id();
            if ancestor == descendant {
                return Ok(true);
            }
            Ok(repo.graph_descendant_of(descendant, ancestor)?)
        })
    }

    fn merge_base(&self, a: &str, b: &str) -> HistoryResult<Option<CommitId>> {
        self.with_repo(|repo| {
            let a = find_commit(repo, a)?.id();
            let b = find_commit(repo, b)?.id();
            match repo.merge_base(a, b) {
                Ok(oid) => Ok(Some(oid.to_string())),
                Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use git2::{Signature, Time};
    use tempfile::TempDir;

    /// Commit on top of `parents`, applying `changes` to the first parent's
    /// tree. `None` content deletes the file.
    pub(crate) fn commit_with(
        repo: &Git2Repository,
        parents: &[Oid],
        changes: &[(&str, Option<&str>)],
        message: &str,
        seconds: i64,
    ) -> Oid {
        let parent_commits: Vec<git2::Commit> =
            parents.iter().map(|p| repo.find_commit(*p).unwrap()).collect();
        let base = parent_commits.first().map(|c| c.tree().unwrap());

        let mut builder = repo.treebuilder(base.as_ref()).unwrap();
        for (path, content) in changes {
            match content {
                Some(text) => {
                    let blob = repo.blob(text.as_bytes()).unwrap();
                    builder.insert(*path, blob, 0o100644).unwrap();
                }
                None => {
                    builder.remove(*path).unwrap();
                }
            }
        }
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();

        let sig = Signature::new("Tester", "tester@example.com", &Time::new(seconds, 0)).unwrap();
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        repo.commit(None, &sig, &sig, message, &tree, &parent_refs).unwrap()
    }

    pub(crate) fn set_branch(repo: &Git2Repository, name: &str, target: Oid) {
        repo.reference(&format!("refs/heads/{name}"), target, true, "test")
            .unwrap();
    }

    fn init_repo() -> (TempDir, Git2Repository) {
        let temp_dir = TempDir::new().unwrap();
        let repo = Git2Repository::init(temp_dir.path()).unwrap();
        (temp_dir, repo)
    }

    #[test]
    fn test_open_missing_repository_is_backend_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = GitHistory::open(&missing).err().unwrap();
        assert!(matches!(err, HistoryError::BackendUnavailable(_)));
    }

    #[test]
    fn test_resolve_branch_and_unknown_ref() {
        let (dir, repo) = init_repo();
        let c1 = commit_with(&repo, &[], &[("a.txt", Some("1"))], "c1", 100);
        set_branch(&repo, "staging", c1);

        let history = GitHistory::open(dir.path()).unwrap();
        assert_eq!(history.resolve("staging").unwrap(), c1.to_string());
        assert_eq!(history.resolve(&c1.to_string()).unwrap(), c1.to_string());
        assert!(matches!(
            history.resolve("does-not-exist"),
            Err(HistoryError::NotFound(_))
        ));
        assert!(matches!(
            history.commit("0000000000000000000000000000000000000001"),
            Err(HistoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_commit_meta_and_ancestry() {
        let (dir, repo) = init_repo();
        let base = commit_with(&repo, &[], &[("f.txt", Some("1"))], "base", 100);
        let left = commit_with(&repo, &[base], &[("l.txt", Some("l"))], "left", 200);
        let right = commit_with(&repo, &[base], &[("r.txt", Some("r"))], "right", 300);
        let merge = commit_with(&repo, &[left, right], &[], "merge right into left", 400);

        let history = GitHistory::open(dir.path()).unwrap();
        let meta = history.commit(&merge.to_string()).unwrap();
        assert!(meta.is_merge());
        assert_eq!(meta.parents, vec![left.to_string(), right.to_string()]);
        assert_eq!(meta.authored_at.timestamp(), 400);
        assert!(history.is_merge(&merge.to_string()).unwrap());
        assert_eq!(history.message(&left.to_string()).unwrap(), "left");

        let order: Vec<String> = history.ancestors(&merge.to_string()).unwrap().collect();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], merge.to_string());
        assert_eq!(order[3], base.to_string());

        let partial: Vec<String> = history
            .ancestors_excluding(&merge.to_string(), Some(&left.to_string()))
            .unwrap()
            .collect();
        assert_eq!(partial, vec![merge.to_string(), right.to_string()]);

        assert!(history.is_ancestor(&base.to_string(), &merge.to_string()).unwrap());
        assert!(history.is_ancestor(&left.to_string(), &left.to_string()).unwrap());
        assert!(!history.is_ancestor(&left.to_string(), &right.to_string()).unwrap());
        assert_eq!(
            history.merge_base(&left.to_string(), &right.to_string()).unwrap(),
            Some(base.to_string())
        );
    }

    #[test]
    fn test_merge_base_of_disjoint_histories() {
        let (dir, repo) = init_repo();
        let one = commit_with(&repo, &[], &[("a.txt", Some("a"))], "one", 100);
        let other = commit_with(&repo, &[], &[("b.txt", Some("b"))], "other", 200);

        let history = GitHistory::open(dir.path()).unwrap();
        assert_eq!(history.merge_base(&one.to_string(), &other.to_string()).unwrap(), None);
    }

    #[test]
    fn test_changeset_and_file_at() {
        let (dir, repo) = init_repo();
        let c1 = commit_with(
            &repo,
            &[],
            &[("keep.txt", Some("keep")), ("gone.txt", Some("gone"))],
            "c1",
            100,
        );
        let c2 = commit_with(
            &repo,
            &[c1],
            &[("keep.txt", Some("changed")), ("gone.txt", None)],
            "c2",
            200,
        );

        let history = GitHistory::open(dir.path()).unwrap();
        let changes = history.changeset(&c2.to_string()).unwrap();
        let changed_blob = repo.blob("changed".as_bytes()).unwrap().to_string();
        assert_eq!(
            changes,
            vec![
                FileChange { path: "gone.txt".to_string(), blob: None },
                FileChange { path: "keep.txt".to_string(), blob: Some(changed_blob.clone()) },
            ]
        );

        assert_eq!(history.file_at(&c2.to_string(), "keep.txt").unwrap(), Some(changed_blob));
        assert_eq!(history.file_at(&c2.to_string(), "gone.txt").unwrap(), None);
        assert!(history.file_at(&c1.to_string(), "gone.txt").unwrap().is_some());
    }

    #[test]
    fn test_cherry_pick_keeps_content_signature() {
        let (dir, repo) = init_repo();
        let base = commit_with(&repo, &[], &[("a.txt", Some("a"))], "base", 100);
        let other = commit_with(&repo, &[base], &[("b.txt", Some("b"))], "other", 200);

        let original = commit_with(&repo, &[base], &[("fix.txt", Some("fix\n"))], "fix", 300);
        let picked = commit_with(&repo, &[other], &[("fix.txt", Some("fix\n"))], "fix (cherry picked)", 400);
        let unrelated = commit_with(&repo, &[base], &[("fix.txt", Some("other fix\n"))], "fix v2", 500);

        let history = GitHistory::open(dir.path()).unwrap();
        let sig_original = history.content_signature(&original.to_string()).unwrap();
        assert_eq!(sig_original, history.content_signature(&picked.to_string()).unwrap());
        assert_ne!(sig_original, history.content_signature(&unrelated.to_string()).unwrap());
    }

    #[test]
    fn test_concurrent_readers_share_history() {
        let (dir, repo) = init_repo();
        let mut tip = commit_with(&repo, &[], &[("0.txt", Some("0"))], "c0", 100);
        for i in 1..8 {
            let name = format!("{i}.txt");
            tip = commit_with(&repo, &[tip], &[(name.as_str(), Some("x"))], "next", 100 + i);
        }

        let history = std::sync::Arc::new(GitHistory::open(dir.path()).unwrap());
        let tip = tip.to_string();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let history = history.clone();
                let tip = tip.clone();
                std::thread::spawn(move || history.ancestors(&tip).unwrap().count())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 8);
        }
    }

    #[test]
    fn test_walk_ancestors_stops_early_and_checks_deadline() {
        let (dir, repo) = init_repo();
        let mut chain = vec![commit_with(&repo, &[], &[("0.txt", Some("0"))], "c0", 100)];
        for i in 1..6 {
            let name = format!("{i}.txt");
            let next = commit_with(&repo, &[chain[i - 1]], &[(name.as_str(), Some("x"))], "next", 100 + i as i64);
            chain.push(next);
        }
        let tip = chain[5].to_string();
        let history = GitHistory::open(dir.path()).unwrap();

        // The visitor may look up commits while the walk holds a handle
        let mut seen = Vec::new();
        history
            .walk_ancestors(&tip, None, &mut |id| {
                seen.push(history.commit(&id)?.id);
                Ok(if seen.len() == 2 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            })
            .unwrap();
        assert_eq!(seen, vec![chain[5].to_string(), chain[4].to_string()]);

        let expired = crate::config::Deadline::after(std::time::Duration::ZERO);
        let mut visited = 0;
        let err = history
            .walk_ancestors(&tip, Some(&chain[1].to_string()), &mut |_| {
                visited += 1;
                expired.check()?;
                Ok(ControlFlow::Continue(()))
            })
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::Timeout(_)));
        assert_eq!(visited, 1);
    }
}
