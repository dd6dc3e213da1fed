//! Graph algorithms and message passing.

pub mod adjacency_graph;
pub mod collective;
pub mod communicator;
pub mod coupling;
pub mod distributor;
pub mod ordering;
pub mod reorder;
pub mod wire;

pub use distributor::{GatherOp, HaloDistributor};
pub use reorder::{compute_block_ordering, compute_reordering};
