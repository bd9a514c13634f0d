use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single file touched by a commit, relative to its first parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChange {
    /// Path of the file after the change
    pub path: String,
    /// Blob id of the post-image, `None` when the file was deleted
    pub blob: Option<String>,
}

impl NodeChange {
    pub fn write(path: impl Into<String>, blob: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob: Some(blob.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            blob: None,
        }
    }
}

/// A commit node in the DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitNode {
    /// Unique commit ID (SHA)
    pub id: String,
    /// Parent commit IDs, first parent first
    pub parents: Vec<String>,
    /// Author timestamp
    pub timestamp: DateTime<Utc>,
    /// Author name
    #[serde(default)]
    pub author: String,
    /// Full commit message
    pub message: String,
    /// Changeset fingerprint, stable across cherry-picks of the same patch
    pub signature: String,
    /// Changes against the first parent
    #[serde(default)]
    pub changes: Vec<NodeChange>,
}

impl CommitNode {
    pub fn new(
        id: String,
        parents: Vec<String>,
        timestamp: DateTime<Utc>,
        author: String,
        message: String,
    ) -> Self {
        // Until told otherwise the commit fingerprints as itself.
        let signature = format!("sig-{id}");
        Self {
            id,
            parents,
            timestamp,
            author,
            message,
            signature,
            changes: Vec::new(),
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn with_changes(mut self, changes: Vec<NodeChange>) -> Self {
        self.changes = changes;
        self
    }
}
