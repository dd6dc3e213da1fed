//! Dependent nodes: multi-point constraints as weighted sums of independent nodes.
//!
//! Dependent node `k` is `sum_j w_j * x[parent_j]`. Any contribution routed
//! through a dependent node is redistributed onto its parents with the same
//! weights. Parents must be independent; chains are rejected when the graph
//! is built.

use itertools::Either;

use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::AssemblerError;
use crate::topology::node::NodeRef;

/// One parent of a dependent node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstraintTerm {
    pub node: usize,
    pub weight: f64,
}

/// CSR table of dependent nodes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintGraph {
    ptr: Vec<usize>,
    parents: Vec<usize>,
    weights: Vec<f64>,
}

impl ConstraintGraph {
    /// Empty table: no dependent nodes.
    pub fn empty() -> Self {
        Self {
            ptr: vec![0],
            parents: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Build and validate the table. `parents` are raw node ids; every one
    /// must be an independent id below `num_nodes`.
    pub fn new(
        rank: usize,
        num_nodes: usize,
        ptr: Vec<usize>,
        parents: Vec<i64>,
        weights: Vec<f64>,
    ) -> Result<Self, AssemblerError> {
        let mismatch = |msg: String| AssemblerError::ConnectivityMismatch { rank, msg };
        if ptr.first() != Some(&0) {
            return Err(mismatch("dependent ptr must start with 0".into()));
        }
        if ptr.windows(2).any(|w| w[1] < w[0]) {
            return Err(mismatch("dependent ptr must be non-decreasing".into()));
        }
        let end = ptr[ptr.len() - 1];
        if end != parents.len() || end != weights.len() {
            return Err(mismatch(format!(
                "dependent ptr ends at {end}, have {} parents and {} weights",
                parents.len(),
                weights.len()
            )));
        }
        let mut ids = Vec::with_capacity(parents.len());
        for (dep, w) in ptr.windows(2).enumerate() {
            for &raw in &parents[w[0]..w[1]] {
                match NodeRef::from_raw(raw) {
                    NodeRef::Dependent(_) => {
                        return Err(AssemblerError::ChainedDependentNode {
                            rank,
                            dep,
                            parent: raw,
                        });
                    }
                    NodeRef::Independent(n) if n >= num_nodes => {
                        return Err(AssemblerError::NodeOutOfRange {
                            rank,
                            node: raw,
                            num_nodes,
                        });
                    }
                    NodeRef::Independent(n) => ids.push(n),
                }
            }
        }
        Ok(Self {
            ptr,
            parents: ids,
            weights,
        })
    }

    pub fn num_dependent(&self) -> usize {
        self.ptr.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.num_dependent() == 0
    }

    /// Parents and weights of dependent node `k`.
    pub fn parents(&self, k: usize) -> (&[usize], &[f64]) {
        let r = self.ptr[k]..self.ptr[k + 1];
        (&self.parents[r.clone()], &self.weights[r])
    }

    /// Every parent reference of every dependent node.
    pub fn all_parents(&self) -> &[usize] {
        &self.parents
    }

    /// Expand a node reference into `(independent node, weight)` pairs.
    ///
    /// The reference must be valid (checked at setup); an independent node
    /// expands to itself with weight `1.0`.
    #[inline]
    pub fn expand(&self, node: NodeRef) -> impl Iterator<Item = (usize, f64)> + '_ {
        match node {
            NodeRef::Independent(n) => Either::Left(std::iter::once((n, 1.0))),
            NodeRef::Dependent(k) => {
                let (p, w) = self.parents(k);
                Either::Right(p.iter().copied().zip(w.iter().copied()))
            }
        }
    }

    /// [`expand`](Self::expand) on a raw id.
    #[inline]
    pub fn expand_raw(&self, raw: i64) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.expand(NodeRef::from_raw(raw))
    }

    /// Terms of dependent node `k`.
    pub fn terms(&self, k: usize) -> impl Iterator<Item = ConstraintTerm> + '_ {
        let (p, w) = self.parents(k);
        p.iter()
            .zip(w)
            .map(|(&node, &weight)| ConstraintTerm { node, weight })
    }

    /// Rewrite every parent id, e.g. global → local or old → new numbering.
    pub fn try_map_parents<F>(&self, f: F) -> Result<Self, AssemblerError>
    where
        F: FnMut(usize) -> Result<usize, AssemblerError>,
    {
        let parents = self
            .parents
            .iter()
            .copied()
            .map(f)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ptr: self.ptr.clone(),
            parents,
            weights: self.weights.clone(),
        })
    }

    /// Weighted combination of parent values for a dependent node with
    /// `bsize` values per node.
    pub fn combine(&self, k: usize, values: &[f64], bsize: usize, out: &mut [f64]) {
        out[..bsize].fill(0.0);
        for (p, w) in self.expand(NodeRef::Dependent(k)) {
            for (o, v) in out[..bsize].iter_mut().zip(&values[p * bsize..(p + 1) * bsize]) {
                *o += w * v;
            }
        }
    }
}

impl DebugInvariants for ConstraintGraph {
    fn validate_invariants(&self) -> Result<(), AssemblerError> {
        if self.ptr.last().copied() != Some(self.parents.len())
            || self.parents.len() != self.weights.len()
        {
            return Err(AssemblerError::InvalidOption(
                "constraint arrays out of sync".into(),
            ));
        }
        Ok(())
    }
}
