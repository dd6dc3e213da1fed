//! Nested dissection through METIS (`METIS_NodeND`).
//!
//! Only built with the `metis-support` feature. The METIS library itself is
//! compiled by `metis-sys`.

use metis_sys::idx_t;

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::ordering::nd::{NdOptions, nested_dissection};
use crate::algs::ordering::permutation::Permutation;
use crate::algs::ordering::OrderingBackend;

/// Fill-reducing permutation (new → old) from `METIS_NodeND`, or `None` if
/// the graph does not fit `idx_t` or METIS reports an error.
pub fn metis_node_nd(graph: &AdjacencyGraph) -> Option<Permutation> {
    let n = graph.num_vertices();
    if n == 0 {
        return Some(Permutation::identity(0));
    }
    let mut xadj: Vec<idx_t> = Vec::with_capacity(n + 1);
    let mut adjncy: Vec<idx_t> = Vec::new();
    xadj.push(0);
    for v in 0..n {
        for &u in graph.neighbors(v).iter().filter(|&&u| u != v) {
            adjncy.push(idx_t::try_from(u).ok()?);
        }
        xadj.push(idx_t::try_from(adjncy.len()).ok()?);
    }
    let mut nvtxs = idx_t::try_from(n).ok()?;
    let mut options: [idx_t; metis_sys::METIS_NOPTIONS as usize] = [0; metis_sys::METIS_NOPTIONS as usize];
    let mut perm: Vec<idx_t> = vec![0; n];
    let mut iperm: Vec<idx_t> = vec![0; n];

    // SAFETY: xadj has n + 1 entries, adjncy xadj[n], perm and iperm n each.
    let ret = unsafe {
        metis_sys::METIS_SetDefaultOptions(options.as_mut_ptr());
        metis_sys::METIS_NodeND(
            &mut nvtxs,
            xadj.as_mut_ptr(),
            adjncy.as_mut_ptr(),
            std::ptr::null_mut(), // vwgt
            options.as_mut_ptr(),
            perm.as_mut_ptr(),
            iperm.as_mut_ptr(),
        )
    };
    if ret != metis_sys::rstatus_et_METIS_OK {
        log::warn!("METIS_NodeND failed with status {ret} on {n} vertices");
        return None;
    }
    let perm: Vec<usize> = perm
        .into_iter()
        .map(usize::try_from)
        .collect::<Result<_, _>>()
        .ok()?;
    Permutation::from_vec(perm).ok()
}

/// METIS nested dissection; falls back to the built-in dissection when METIS
/// cannot order the graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetisNestedDissection;

impl OrderingBackend for MetisNestedDissection {
    fn order(&self, graph: &AdjacencyGraph, _coupling: &[usize]) -> Permutation {
        metis_node_nd(graph).unwrap_or_else(|| nested_dissection(graph, NdOptions::default()))
    }

    fn name(&self) -> &'static str {
        "metis-nd"
    }
}
