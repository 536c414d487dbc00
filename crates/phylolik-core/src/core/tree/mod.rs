//! Phylogenetic trees: an arena representation with stable node ids, Newick
//! reading and writing, topology comparison and distance-based reconstruction.

pub mod arena;
pub mod compare;
pub mod construct;
pub mod newick;

pub use arena::{Node, NodeId, Tree};
pub use compare::robinson_foulds_distance;
pub use construct::{DistanceMatrix, ReconstructionMethod};
pub use newick::{parse_newick, to_newick};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("Node {id} does not exist")]
    NodeNotFound { id: NodeId },

    #[error("Node {id} has no branch length")]
    MissingBranchLength { id: NodeId },

    #[error("Invalid topology move: {reason}")]
    InvalidMove { reason: String },

    #[error("Newick parse error at byte {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Leaf '{name}' is not shared by both trees")]
    LeafSetMismatch { name: String },

    #[error("At least {required} leaves are required, found {found}")]
    TooFewLeaves { found: usize, required: usize },
}
