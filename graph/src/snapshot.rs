use crate::core::{CommitNode, Dag};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Commits reachable from a set of refs, frozen so an analysis can be
/// replayed without the original repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    /// Ref name -> commit ID
    pub refs: BTreeMap<String, String>,
    /// Commits, ordered the way they should be inserted (parents first is
    /// not required)
    pub commits: Vec<CommitNode>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            refs: BTreeMap::new(),
            commits: Vec::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            anyhow::bail!(
                "Unsupported snapshot version {} (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
        Ok(())
    }

    pub fn into_dag(self) -> Dag {
        let mut dag = Dag::new();
        for commit in self.commits {
            dag.add_node(commit);
        }
        for (name, target) in self.refs {
            dag.set_ref(name, target);
        }
        dag
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}
