//! Tunables of the assembler.

use serde::{Deserialize, Serialize};

use crate::algs::ordering::{MatrixOrdering, OrderingType};
use crate::mesh_error::AssemblerError;

/// Threading of the element loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerOptions {
    /// Worker threads per process; `1` runs the loop inline in element order.
    pub num_threads: usize,
    /// Elements claimed by a worker at a time.
    pub chunk_size: usize,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            chunk_size: 8,
        }
    }
}

impl AssemblerOptions {
    pub fn validate(&self) -> Result<(), AssemblerError> {
        if self.num_threads == 0 {
            return Err(AssemblerError::InvalidOption("num_threads must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(AssemblerError::InvalidOption("chunk_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Global node reordering requested before `initialize`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderingOptions {
    pub ordering: OrderingType,
    pub matrix: MatrixOrdering,
}
