pub mod core;
pub mod snapshot;

pub use core::{Dag, DagError, CommitNode, NodeChange};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
