use crate::history::{ContentSignature, FileChange};
use git2::{Delta, DiffFindOptions, Repository as Git2Repository};

/// Per-commit diffs against the first parent
pub struct Diff<'repo> {
    repo: &'repo Git2Repository,
}

impl<'repo> Diff<'repo> {
    pub fn new(repo: &'repo Git2Repository) -> Self {
        Diff { repo }
    }

    /// Diff of a commit against its first parent (the empty tree for roots)
    fn first_parent_diff(&self, commit: &git2::Commit) -> Result<git2::Diff<'repo>, git2::Error> {
        let tree = commit.tree()?;

        let parent_tree = if commit.parent_count() > 0 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        self.repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
    }

    /// Files changed by a commit, renames split into a delete and a write
    pub fn changeset(&self, commit: &git2::Commit) -> Result<Vec<FileChange>, git2::Error> {
        let mut diff = self.first_parent_diff(commit)?;

        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let mut changes = Vec::new();
        for delta in diff.deltas() {
            let new_path = delta.new_file().path().map(|p| p.to_string_lossy().into_owned());
            let old_path = delta.old_file().path().map(|p| p.to_string_lossy().into_owned());

            match delta.status() {
                Delta::Deleted => {
                    if let Some(path) = old_path {
                        changes.push(FileChange { path, blob: None });
                    }
                }
                Delta::Renamed => {
                    if let Some(path) = old_path {
                        changes.push(FileChange { path, blob: None });
                    }
                    if let Some(path) = new_path {
                        changes.push(FileChange {
                            path,
                            blob: Some(delta.new_file().id().to_string()),
                        });
                    }
                }
                Delta::Unmodified | Delta::Ignored | Delta::Untracked => {}
                _ => {
                    if let Some(path) = new_path {
                        changes.push(FileChange {
                            path,
                            blob: Some(delta.new_file().id().to_string()),
                        });
                    }
                }
            }
        }

        changes.sort();
        Ok(changes)
    }

    /// Git patch-id of the commit's diff: stable across cherry-picks and
    /// rebases that leave the patch text alone.
    pub fn patch_id(&self, commit: &git2::Commit) -> Result<ContentSignature, git2::Error> {
        let diff = self.first_parent_diff(commit)?;
        Ok(diff.patchid(None)?.to_string())
    }
}
