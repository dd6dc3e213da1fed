#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-assembler
//!
//! mesh-assembler is a distributed-memory finite-element assembly engine. Given
//! a mesh whose nodes are split in contiguous blocks across processes, it
//! builds the local/ghost index space of every process, eliminates
//! dependent nodes (multi-point constraints), computes fill-reducing node
//! orderings, and assembles residual vectors and block-sparse matrices from
//! user-supplied element kernels on a pool of worker threads.
//!
//! ## Features
//! - Contiguous node ownership with a `[ext below | owned | ext above]` local layout
//! - Dependent nodes expanded with their weights in every gather and scatter
//! - Reverse Cuthill-McKee, minimum degree and nested dissection orderings, with
//!   coupling nodes kept in a trailing block for Schur-complement solvers
//! - Pluggable communication back ends (serial, in-process ranks, MPI)
//! - Threaded element loop with per-thread workspaces
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-assembler = "0.1"
//! # features = ["mpi-support"]
//! ```
//!
//! Setup goes through [`AssemblerBuilder`](assembler::AssemblerBuilder); its
//! `initialize` returns the [`Assembler`](assembler::Assembler) which creates
//! vectors and matrices and runs the assembly passes.
//!
//! ## Determinism
//!
//! Cross-process reductions are folded in rank order, so every rank sees the
//! same value. Sums over elements are only reproducible to rounding when the
//! thread or process count changes.

pub mod algs;
pub mod assembler;
pub mod data;
pub mod debug_invariants;
pub mod mesh_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    pub use crate::algs::ordering::{MatrixOrdering, OrderingBackend, OrderingType, Permutation};
    pub use crate::assembler::element::{Element, ElementMatrixType, ElementState, JacobianCoeffs};
    pub use crate::assembler::options::{AssemblerOptions, ReorderingOptions};
    pub use crate::assembler::verify::ElementTestReport;
    pub use crate::assembler::{Assembler, AssemblerBuilder};
    pub use crate::data::bc::BcMap;
    pub use crate::data::matrix::{AssemblyMatrix, DistMat, MatrixOrientation};
    pub use crate::data::schur::SchurMat;
    pub use crate::data::vector::DistVec;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh_error::AssemblerError;
    pub use crate::topology::node::dependent_node;
    pub use crate::topology::ownership::OwnershipMap;
}
