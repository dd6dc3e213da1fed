//! AssemblerError: unified error type for mesh-assembler public APIs.
//!
//! Configuration errors carry the rank of the process that detected them so
//! that messages from a parallel run can be told apart. They are logged at
//! `error` level by the caller that constructs them (see [`config_error`]).

use thiserror::Error;

/// Unified error type for assembler operations.
#[derive(Debug, Error)]
pub enum AssemblerError {
    /// A global node id outside `[0, ownerRange[P])`.
    #[error("[{rank}] node {node} out of range [0, {num_nodes})")]
    NodeOutOfRange {
        rank: usize,
        node: i64,
        num_nodes: usize,
    },
    /// A dependent node reference `-(k+1)` with `k` outside the dependent table.
    #[error("[{rank}] dependent node {node} out of range (have {num_dep})")]
    DependentNodeOutOfRange {
        rank: usize,
        node: i64,
        num_dep: usize,
    },
    /// A dependent node whose parent is itself dependent.
    #[error("[{rank}] dependent node {dep} refers to dependent node {parent}; chains are not allowed")]
    ChainedDependentNode { rank: usize, dep: usize, parent: i64 },
    /// Offsets/ids arrays of a CSR input do not agree.
    #[error("[{rank}] inconsistent connectivity: {msg}")]
    ConnectivityMismatch { rank: usize, msg: String },
    /// An element reports a different node or variable count than expected.
    #[error("[{rank}] element {elem}: {msg}")]
    VarsPerNodeMismatch {
        rank: usize,
        elem: usize,
        msg: String,
    },
    /// Number of element kernels differs from the connectivity's element count.
    #[error("[{rank}] expected {expected} elements, got {got}")]
    ElementCountMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },
    /// A required setup step was skipped.
    #[error("[{rank}] setup incomplete: {msg}")]
    SetupIncomplete { rank: usize, msg: &'static str },
    /// A setup step was called in the wrong order or twice.
    #[error("[{rank}] cannot call {op} {msg}")]
    SetupOrder {
        rank: usize,
        op: &'static str,
        msg: &'static str,
    },
    /// A node is neither owned nor in the external list.
    #[error("[{rank}] node {node} is not local to this process")]
    ExternalNodeMissing { rank: usize, node: usize },
    /// Per-process counts produced an invalid owner range.
    #[error("invalid ownership: {0}")]
    InvalidOwnership(String),
    /// A permutation array is not a bijection.
    #[error("invalid permutation: {0}")]
    InvalidPermutation(String),
    /// A vector does not match the expected layout.
    #[error("vector layout mismatch: expected {expected} entries, got {got}")]
    VectorLayoutMismatch { expected: usize, got: usize },
    /// A matrix add hit a (row, col) pair missing from the nonzero pattern.
    #[error("entry ({row}, {col}) is not in the nonzero pattern")]
    PatternMissingEntry { row: usize, col: usize },
    /// Auxiliary element not compatible with its primary element.
    #[error("[{rank}] auxiliary element for element {elem}: {msg}")]
    AuxElementMismatch {
        rank: usize,
        elem: usize,
        msg: String,
    },
    /// An option value that cannot be honoured.
    #[error("invalid option: {0}")]
    InvalidOption(String),
    /// Communication with a neighbor failed.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received message had the wrong length.
    #[error("message from rank {neighbor}: expected {expected} bytes, got {got}")]
    BufferSizeMismatch {
        neighbor: usize,
        expected: usize,
        got: usize,
    },
}

impl AssemblerError {
    /// True for errors caused by caller misuse during setup.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AssemblerError::NodeOutOfRange { .. }
                | AssemblerError::DependentNodeOutOfRange { .. }
                | AssemblerError::ChainedDependentNode { .. }
                | AssemblerError::ConnectivityMismatch { .. }
                | AssemblerError::VarsPerNodeMismatch { .. }
                | AssemblerError::ElementCountMismatch { .. }
                | AssemblerError::SetupIncomplete { .. }
                | AssemblerError::SetupOrder { .. }
                | AssemblerError::AuxElementMismatch { .. }
        )
    }
}

/// Log a configuration error to the diagnostic stream and hand it back.
pub fn config_error(err: AssemblerError) -> AssemblerError {
    log::error!("{err}");
    err
}
