//! Coupling nodes and elements.
//!
//! A coupling node is a local node that another rank also references: every
//! external node, plus every owned node some other rank holds as a ghost.
//! The coupling nodes themselves come from
//! [`HaloDistributor::coupling_nodes`](crate::algs::distributor::HaloDistributor::coupling_nodes).

use crate::algs::adjacency_graph::AdjacencyGraph;

/// Sorted local element indices that touch at least one coupling node.
pub fn coupling_elements(node_to_elem: &AdjacencyGraph, coupling: &[usize]) -> Vec<usize> {
    let mut elems: Vec<usize> = coupling
        .iter()
        .flat_map(|&n| node_to_elem.neighbors(n).iter().copied())
        .collect();
    elems.sort_unstable();
    elems.dedup();
    elems
}

/// Widen a coupling set by every node adjacent to it (including itself).
///
/// Returns a mask over local nodes.
pub fn widen_coupling(node_to_node: &AdjacencyGraph, coupling: &[usize]) -> Vec<bool> {
    let mut mask = vec![false; node_to_node.num_vertices()];
    for &c in coupling {
        mask[c] = true;
        for &n in node_to_node.neighbors(c) {
            mask[n] = true;
        }
    }
    mask
}
