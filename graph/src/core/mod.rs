pub mod node;
pub mod dag;

pub use node::{CommitNode, NodeChange};
pub use dag::{Dag, DagError};
