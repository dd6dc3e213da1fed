//! Data module: constraints, boundary conditions, vectors and matrices.

pub mod bc;
pub mod constraints;
pub mod matrix;
pub mod schur;
pub mod vector;

pub use bc::BcMap;
pub use constraints::ConstraintGraph;
pub use matrix::{BlockCsr, DistMat};
pub use schur::SchurMat;
pub use vector::DistVec;
