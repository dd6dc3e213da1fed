//! Nested dissection by BFS level-structure separators.
//!
//! A connected vertex set is split at the middle level of a BFS from a
//! pseudo-peripheral vertex; both halves are ordered recursively and the
//! separator level is numbered last. Small or non-separable sets are
//! ordered by minimum degree. Disconnected sets are split into their
//! components first.

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::ordering::amd::{AmdOptions, minimum_degree};
use crate::algs::ordering::bfs::LevelBfs;
use crate::algs::ordering::permutation::Permutation;

/// Options for [`nested_dissection`].
#[derive(Clone, Copy, Debug)]
pub struct NdOptions {
    /// Sets at or below this size are ordered directly.
    pub leaf_size: usize,
}

impl Default for NdOptions {
    fn default() -> Self {
        Self { leaf_size: 32 }
    }
}

struct Dissector<'a> {
    graph: &'a AdjacencyGraph,
    /// Id of the vertex set each vertex currently belongs to.
    part: Vec<usize>,
    /// Position of a vertex inside the leaf being ordered.
    slot: Vec<usize>,
    bfs: LevelBfs,
    next_part: usize,
    leaf_size: usize,
    order: Vec<usize>,
}

impl Dissector<'_> {
    fn fresh_part(&mut self, verts: &[usize]) -> usize {
        self.next_part += 1;
        for &v in verts {
            self.part[v] = self.next_part;
        }
        self.next_part
    }

    fn order_leaf(&mut self, verts: &[usize], id: usize) {
        for (k, &v) in verts.iter().enumerate() {
            self.slot[v] = k;
        }
        let (part, slot) = (&self.part, &self.slot);
        let sub = self.graph.induced(verts, |u| (part[u] == id).then(|| slot[u]));
        let p = minimum_degree(&sub, &[], AmdOptions::default());
        self.order.extend(p.perm().iter().map(|&k| verts[k]));
    }

    fn dissect(&mut self, verts: Vec<usize>, id: usize) {
        if verts.len() <= self.leaf_size {
            self.order_leaf(&verts, id);
            return;
        }
        let part = &self.part;
        let (_, levels) = self.bfs.peripheral(self.graph, verts[0], |v| part[v] == id);
        let reached: usize = levels.iter().map(Vec::len).sum();
        if reached < verts.len() {
            let part = &self.part;
            let comps = self.bfs.components(self.graph, &verts, |v| part[v] == id);
            for comp in comps {
                let comp_id = self.fresh_part(&comp);
                self.dissect(comp, comp_id);
            }
            return;
        }
        if levels.len() < 3 {
            self.order_leaf(&verts, id);
            return;
        }
        let mid = levels.len() / 2;
        let sep = levels[mid].clone();
        let left = levels[..mid].concat();
        let right = levels[mid + 1..].concat();
        let left_id = self.fresh_part(&left);
        let right_id = self.fresh_part(&right);
        self.fresh_part(&sep);
        self.dissect(left, left_id);
        self.dissect(right, right_id);
        self.order.extend(sep);
    }
}

/// Nested-dissection permutation (new → old) of `graph`.
pub fn nested_dissection(graph: &AdjacencyGraph, opts: NdOptions) -> Permutation {
    let n = graph.num_vertices();
    let mut d = Dissector {
        graph,
        part: vec![0; n],
        slot: vec![0; n],
        bfs: LevelBfs::new(n),
        next_part: 0,
        leaf_size: opts.leaf_size.max(1),
        order: Vec::with_capacity(n),
    };
    d.dissect((0..n).collect(), 0);
    Permutation::from_vec(d.order).unwrap_or_else(|_| Permutation::identity(n))
}
