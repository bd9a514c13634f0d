use crate::error::HistoryResult;
use crate::history::{
    Ancestors, BlobId, CommitId, CommitMeta, ContentSignature, FileChange, HistoryReader,
};
use graph::{CommitNode, Dag, NodeChange, Snapshot};
use std::collections::HashSet;
use tracing::debug;

impl HistoryReader for Dag {
    fn resolve(&self, reference: &str) -> HistoryResult<CommitId> {
        Ok(Dag::resolve(self, reference)?)
    }

    fn commit(&self, id: &str) -> HistoryResult<CommitMeta> {
        let node = self.get(id)?;
        Ok(CommitMeta {
            id: node.id.clone(),
            parents: node.parents.clone(),
            message: node.message.clone(),
            authored_at: node.timestamp,
        })
    }

    fn content_signature(&self, id: &str) -> HistoryResult<ContentSignature> {
        Ok(self.get(id)?.signature.clone())
    }

    fn changeset(&self, id: &str) -> HistoryResult<Vec<FileChange>> {
        let mut changes: Vec<FileChange> = self
            .get(id)?
            .changes
            .iter()
            .map(|c| FileChange {
                path: c.path.clone(),
                blob: c.blob.clone(),
            })
            .collect();
        changes.sort();
        Ok(changes)
    }

    fn file_at(&self, id: &str, path: &str) -> HistoryResult<Option<BlobId>> {
        Ok(Dag::file_at(self, id, path)?)
    }

    fn ancestors_excluding(&self, tip: &str, hide: Option<&str>) -> HistoryResult<Ancestors> {
        Ok(Ancestors::new(self.topo_ancestors(tip, hide)?))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> HistoryResult<bool> {
        Ok(Dag::is_ancestor(self, ancestor, descendant)?)
    }

    fn merge_base(&self, a: &str, b: &str) -> HistoryResult<Option<CommitId>> {
        Ok(Dag::merge_base(self, a, b)?)
    }
}

/// Capture every commit reachable from `refs` into a snapshot. Refs keep the
/// names they were given so the snapshot can be analyzed with the same
/// arguments.
pub fn export_snapshot(history: &dyn HistoryReader, refs: &[String]) -> HistoryResult<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut seen = HashSet::new();
    let mut ordered = Vec::new();

    for reference in refs {
        let tip = history.resolve(reference)?;
        snapshot.refs.insert(reference.clone(), tip.clone());

        // Parents before children within each ref
        let mut fresh: Vec<CommitId> = history
            .ancestors(&tip)?
            .filter(|id| seen.insert(id.clone()))
            .collect();
        fresh.reverse();
        ordered.extend(fresh);
    }

    for id in ordered {
        let meta = history.commit(&id)?;
        let changes = history
            .changeset(&id)?
            .into_iter()
            .map(|c| NodeChange {
                path: c.path,
                blob: c.blob,
            })
            .collect();
        let node = CommitNode::new(meta.id, meta.parents, meta.authored_at, String::new(), meta.message)
            .with_signature(history.content_signature(&id)?)
            .with_changes(changes);
        snapshot.commits.push(node);
    }

    debug!(commits = snapshot.commits.len(), refs = refs.len(), "exported snapshot");
    Ok(snapshot)
}
