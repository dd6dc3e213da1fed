//! Schur-complement block matrix over the local nodes of one rank.
//!
//! The local nodes are split by a [`BlockOrdering`] into interior nodes
//! (owned, touched by no other rank) and coupling nodes, giving
//!
//! ```text
//! [ B  E ]   interior rows
//! [ F  C ]   coupling rows
//! ```
//!
//! Every block is stored over the reordered positions. Nothing is exchanged
//! between ranks: the coupling block holds only this rank's contributions.

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::communicator::Communicator;
use crate::algs::reorder::BlockOrdering;
use crate::data::bc::BcMap;
use crate::data::constraints::ConstraintGraph;
use crate::data::matrix::{AssemblyMatrix, BlockCsr, MatrixOrientation, for_each_element_block};
use crate::mesh_error::AssemblerError;
use crate::topology::halo::HaloIndex;

#[derive(Clone, Debug)]
pub struct SchurMat {
    bsize: usize,
    ordering: BlockOrdering,
    owned_local: std::ops::Range<usize>,
    b: BlockCsr,
    e: BlockCsr,
    f: BlockCsr,
    c: BlockCsr,
}

/// Which of the four blocks a position pair falls into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Part {
    B,
    E,
    F,
    C,
}

impl SchurMat {
    /// Pattern from the local node graph (diagonal included).
    pub fn new(ordering: BlockOrdering, pattern: &AdjacencyGraph, halo: &HaloIndex, bsize: usize) -> Self {
        let nb = ordering.num_interior;
        let nc = ordering.num_coupling();
        let mut rows_b = vec![Vec::new(); nb];
        let mut rows_e = vec![Vec::new(); nb];
        let mut rows_f = vec![Vec::new(); nc];
        let mut rows_c = vec![Vec::new(); nc];
        for p in 0..ordering.perm.len() {
            let l = ordering.perm.source_index(p);
            for &lc in pattern.neighbors(l) {
                let q = ordering.perm.target_index(lc);
                match split(nb, p, q) {
                    (Part::B, r, c) => rows_b[r].push(c),
                    (Part::E, r, c) => rows_e[r].push(c),
                    (Part::F, r, c) => rows_f[r].push(c),
                    (Part::C, r, c) => rows_c[r].push(c),
                }
            }
        }
        let build = |mut rows: Vec<Vec<usize>>| {
            rows.iter_mut().for_each(|r| {
                r.sort_unstable();
                r.dedup();
            });
            BlockCsr::from_rows(&rows, bsize)
        };
        Self {
            bsize,
            owned_local: halo.owned_local_range(),
            b: build(rows_b),
            e: build(rows_e),
            f: build(rows_f),
            c: build(rows_c),
            ordering,
        }
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    pub fn ordering(&self) -> &BlockOrdering {
        &self.ordering
    }

    pub fn num_interior(&self) -> usize {
        self.ordering.num_interior
    }

    pub fn num_coupling(&self) -> usize {
        self.ordering.num_coupling()
    }

    /// Interior × interior.
    pub fn b(&self) -> &BlockCsr {
        &self.b
    }

    /// Interior × coupling.
    pub fn e(&self) -> &BlockCsr {
        &self.e
    }

    /// Coupling × interior.
    pub fn f(&self) -> &BlockCsr {
        &self.f
    }

    /// Coupling × coupling.
    pub fn c(&self) -> &BlockCsr {
        &self.c
    }

    /// Block `(row, col)` by local node index.
    pub fn get_block(&self, row: usize, col: usize) -> Option<&[f64]> {
        let (p, q) = (self.position(row)?, self.position(col)?);
        let (part, r, c) = split(self.ordering.num_interior, p, q);
        let m = self.part(part);
        m.find(r, c).map(|k| m.block(k))
    }

    fn position(&self, local: usize) -> Option<usize> {
        (local < self.ordering.perm.len()).then(|| self.ordering.perm.target_index(local))
    }

    fn part(&self, part: Part) -> &BlockCsr {
        match part {
            Part::B => &self.b,
            Part::E => &self.e,
            Part::F => &self.f,
            Part::C => &self.c,
        }
    }

    fn part_mut(&mut self, part: Part) -> &mut BlockCsr {
        match part {
            Part::B => &mut self.b,
            Part::E => &mut self.e,
            Part::F => &mut self.f,
            Part::C => &mut self.c,
        }
    }

    /// Zero constrained rows and columns; owned constrained rows get a unit
    /// diagonal. `bcs` is keyed by local node index.
    pub fn apply_bcs(&mut self, bcs: &BcMap) {
        let nb = self.ordering.num_interior;
        let n = self.ordering.perm.len();
        let mut masks = vec![0u32; n];
        for (l, entry) in bcs.iter().filter(|&(l, _)| l < n) {
            masks[self.ordering.perm.target_index(l)] |= entry.mask;
        }
        self.b.zero_col_dofs(|q| masks[q], |_, _| false);
        self.f.zero_col_dofs(|q| masks[q], |_, _| false);
        self.e.zero_col_dofs(|q| masks[nb + q], |_, _| false);
        self.c.zero_col_dofs(|q| masks[nb + q], |_, _| false);

        for (l, entry) in bcs.iter().filter(|&(l, _)| l < n) {
            let p = self.ordering.perm.target_index(l);
            let owned = self.owned_local.contains(&l);
            if p < nb {
                self.b.zero_row_dofs(p, entry.mask, owned.then_some(p));
                self.e.zero_row_dofs(p, entry.mask, None);
            } else {
                let r = p - nb;
                self.f.zero_row_dofs(r, entry.mask, None);
                self.c.zero_row_dofs(r, entry.mask, owned.then_some(r));
            }
        }
    }
}

/// Route position pair `(p, q)` to its block and in-block indices.
#[inline]
fn split(nb: usize, p: usize, q: usize) -> (Part, usize, usize) {
    match (p < nb, q < nb) {
        (true, true) => (Part::B, p, q),
        (true, false) => (Part::E, p, q - nb),
        (false, true) => (Part::F, p - nb, q),
        (false, false) => (Part::C, p - nb, q - nb),
    }
}

impl AssemblyMatrix for SchurMat {
    fn zero_entries(&mut self) {
        self.b.zero_entries();
        self.e.zero_entries();
        self.f.zero_entries();
        self.c.zero_entries();
    }

    fn add_element_matrix(
        &mut self,
        nodes: &[i64],
        mat: &[f64],
        deps: &ConstraintGraph,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let nvars = nodes.len() * self.bsize;
        let nb = self.ordering.num_interior;
        for_each_element_block(nodes, deps, |i, j, w, a, b| {
            let p = self.ordering.perm.target_index(i);
            let q = self.ordering.perm.target_index(j);
            let (part, r, c) = split(nb, p, q);
            self.part_mut(part)
                .add_element_block(r, c, w, mat, nvars, a, b, orient)
        })
    }

    fn finalize<C: Communicator + ?Sized>(&mut self, _comm: &C, bcs: &BcMap) -> Result<(), AssemblerError> {
        self.apply_bcs(bcs);
        Ok(())
    }
}
