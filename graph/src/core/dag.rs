use super::node::CommitNode;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("unknown commit: {0}")]
    UnknownCommit(String),
    #[error("unknown reference: {0}")]
    UnknownRef(String),
    #[error("ambiguous reference '{0}' matches several commits")]
    AmbiguousRef(String),
}

/// Directed Acyclic Graph representing commit history
#[derive(Debug, Clone)]
pub struct Dag {
    /// All nodes indexed by commit ID
    pub nodes: HashMap<String, CommitNode>,
    /// Named refs (branch name -> commit ID)
    pub refs: BTreeMap<String, String>,
    /// Insertion sequence, used to break author-time ties deterministically
    order: HashMap<String, usize>,
}

impl Dag {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            refs: BTreeMap::new(),
            order: HashMap::new(),
        }
    }

    /// Add a commit node to the DAG
    pub fn add_node(&mut self, node: CommitNode) {
        let id = node.id.clone();
        let seq = self.order.len();
        self.order.entry(id.clone()).or_insert(seq);
        self.nodes.insert(id, node);
    }

    /// Point a named ref at a commit
    pub fn set_ref(&mut self, name: impl Into<String>, target: impl Into<String>) {
        self.refs.insert(name.into(), target.into());
    }

    pub fn get(&self, commit_id: &str) -> Result<&CommitNode, DagError> {
        self.nodes
            .get(commit_id)
            .ok_or_else(|| DagError::UnknownCommit(commit_id.to_string()))
    }

    /// Resolve a ref name, full commit ID or unique ID prefix
    pub fn resolve(&self, reference: &str) -> Result<String, DagError> {
        let short = reference
            .strip_prefix("refs/heads/")
            .unwrap_or(reference);
        if let Some(target) = self.refs.get(reference).or_else(|| self.refs.get(short)) {
            return Ok(target.clone());
        }
        if self.nodes.contains_key(reference) {
            return Ok(reference.to_string());
        }
        if reference.len() >= 4 {
            let mut matches = self.nodes.keys().filter(|id| id.starts_with(reference));
            if let Some(first) = matches.next() {
                if matches.next().is_some() {
                    return Err(DagError::AmbiguousRef(reference.to_string()));
                }
                return Ok(first.clone());
            }
        }
        Err(DagError::UnknownRef(reference.to_string()))
    }

    /// Count of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Every commit reachable from `tip`, `tip` included.
    /// Parents missing from the graph (a truncated snapshot) end the walk.
    pub fn reachable(&self, tip: &str) -> Result<HashSet<String>, DagError> {
        self.get(tip)?;
        let mut seen = HashSet::new();
        let mut stack = vec![tip.to_string()];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            stack.extend(node.parents.iter().cloned());
        }
        Ok(seen)
    }

    /// Commits reachable from `tip` but not from `hide`, children before
    /// parents, newest author time first among commits that are ready.
    pub fn topo_ancestors(&self, tip: &str, hide: Option<&str>) -> Result<Vec<String>, DagError> {
        let mut included = self.reachable(tip)?;
        if let Some(hide) = hide {
            for hidden in self.reachable(hide)? {
                included.remove(&hidden);
            }
        }

        let mut pending_children: HashMap<&str, usize> = HashMap::new();
        for id in &included {
            for parent in &self.nodes[id].parents {
                if included.contains(parent) {
                    *pending_children.entry(parent.as_str()).or_default() += 1;
                }
            }
        }

        let key = |id: &str| {
            let node = &self.nodes[id];
            (node.timestamp, self.order.get(id).copied().unwrap_or(0), Reverse(id.to_string()))
        };

        let mut ready = BinaryHeap::new();
        for id in &included {
            if !pending_children.contains_key(id.as_str()) {
                ready.push(key(id.as_str()));
            }
        }

        let mut out = Vec::with_capacity(included.len());
        while let Some((_, _, Reverse(id))) = ready.pop() {
            for parent in &self.nodes[&id].parents {
                if let Some(count) = pending_children.get_mut(parent.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(key(parent.as_str()));
                    }
                }
            }
            out.push(id);
        }

        Ok(out)
    }

    /// Is `ancestor` reachable from `descendant` (or the same commit)?
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, DagError> {
        self.get(ancestor)?;
        Ok(self.reachable(descendant)?.contains(ancestor))
    }

    /// A best common ancestor of `a` and `b`: the first common commit in
    /// `a`'s topological walk, which no other common ancestor descends from.
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, DagError> {
        let from_b = self.reachable(b)?;
        Ok(self
            .topo_ancestors(a, None)?
            .into_iter()
            .find(|id| from_b.contains(id)))
    }

    /// Blob at `path` in the cumulative content of `commit_id`, found by
    /// following the first-parent chain to the last change of that path.
    pub fn file_at(&self, commit_id: &str, path: &str) -> Result<Option<String>, DagError> {
        let mut current = self.get(commit_id)?;
        loop {
            if let Some(change) = current.changes.iter().rev().find(|c| c.path == path) {
                return Ok(change.blob.clone());
            }
            match current.parents.first().and_then(|p| self.nodes.get(p)) {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }
}

impl Default for Dag {
    fn default() -> Self {
        Self::new()
    }
}
