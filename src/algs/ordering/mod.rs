//! Fill-reducing orderings of node adjacency graphs.
//!
//! Every back end consumes an [`AdjacencyGraph`] without self loops and
//! returns a [`Permutation`] (new → old). The reordering engine only talks to
//! the [`OrderingBackend`] trait, so callers can install their own.

pub mod amd;
mod bfs;
#[cfg(feature = "metis-support")]
pub mod metis;
pub mod nd;
pub mod permutation;
pub mod rcm;

use serde::{Deserialize, Serialize};

use crate::algs::adjacency_graph::AdjacencyGraph;
pub use permutation::Permutation;

/// Built-in ordering back ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderingType {
    /// Identity.
    Natural,
    ReverseCuthillMcKee,
    /// Minimum degree with approximate degree updates.
    #[default]
    ApproximateMinimumDegree,
    /// METIS `NodeND` with `metis-support`, the built-in dissection otherwise.
    NestedDissection,
    /// Minimum degree that keeps the given coupling nodes in the trailing block.
    CouplingAwareMinimumDegree,
}

/// How nodes shared with other ranks are treated when reordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixOrdering {
    /// Order all owned nodes together.
    #[default]
    AdditiveSchwarz,
    /// Coupling nodes and all of their neighbors are ordered last.
    ApproximateSchur,
    /// Coupling nodes are ordered last.
    DirectSchur,
}

/// A fill-reducing ordering.
pub trait OrderingBackend {
    /// Order `graph`; vertices in `coupling` (sorted) must end up in the
    /// trailing block when the back end supports it.
    fn order(&self, graph: &AdjacencyGraph, coupling: &[usize]) -> Permutation;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl OrderingBackend for OrderingType {
    fn order(&self, graph: &AdjacencyGraph, coupling: &[usize]) -> Permutation {
        match self {
            OrderingType::Natural => Permutation::identity(graph.num_vertices()),
            OrderingType::ReverseCuthillMcKee => rcm::reverse_cuthill_mckee(graph),
            OrderingType::ApproximateMinimumDegree => {
                amd::minimum_degree(graph, &[], amd::AmdOptions::default())
            }
            OrderingType::NestedDissection => nested_dissection(graph),
            OrderingType::CouplingAwareMinimumDegree => {
                amd::minimum_degree(graph, coupling, amd::AmdOptions::default())
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            OrderingType::Natural => "natural",
            OrderingType::ReverseCuthillMcKee => "rcm",
            OrderingType::ApproximateMinimumDegree => "amd",
            OrderingType::NestedDissection => "nd",
            OrderingType::CouplingAwareMinimumDegree => "coupling-amd",
        }
    }
}

#[cfg(feature = "metis-support")]
fn nested_dissection(graph: &AdjacencyGraph) -> Permutation {
    metis::MetisNestedDissection.order(graph, &[])
}

#[cfg(not(feature = "metis-support"))]
fn nested_dissection(graph: &AdjacencyGraph) -> Permutation {
    nd::nested_dissection(graph, nd::NdOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_backend_returns_a_bijection() {
        let edges: Vec<(usize, usize)> = (0..19).map(|i| (i, (i * 7 + 3) % 20)).collect();
        let g = AdjacencyGraph::from_edges(20, &edges);
        for ty in [
            OrderingType::Natural,
            OrderingType::ReverseCuthillMcKee,
            OrderingType::ApproximateMinimumDegree,
            OrderingType::NestedDissection,
            OrderingType::CouplingAwareMinimumDegree,
        ] {
            let p = ty.order(&g, &[1, 5]);
            let mut all = p.perm().to_vec();
            all.sort_unstable();
            assert_eq!(all, (0..20).collect::<Vec<_>>(), "{}", ty.name());
        }
    }
}
