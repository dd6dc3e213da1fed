//! Block sparse matrices filled by element assembly.
//!
//! [`BlockCsr`] is a plain block-CSR store with a fixed nonzero pattern.
//! [`DistMat`] is the distributed row-block matrix: elements are added into a
//! local accumulator over all local (owned and ghost) nodes; ghost rows are
//! then shipped to their owners and summed into the owned rows, whose
//! columns are global node ids.

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::collective::all_to_all_v;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::WireNode;
use crate::data::bc::BcMap;
use crate::data::constraints::ConstraintGraph;
use crate::mesh_error::AssemblerError;
use crate::topology::halo::HaloIndex;
use crate::topology::ownership::OwnershipMap;

/// Whether element matrices are added as-is or transposed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatrixOrientation {
    #[default]
    Normal,
    Transpose,
}

/// Block CSR with `bsize × bsize` row-major blocks.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockCsr {
    bsize: usize,
    rowp: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<f64>,
}

impl BlockCsr {
    /// Pattern from sorted rows.
    pub fn from_rows(rows: &[Vec<usize>], bsize: usize) -> Self {
        let mut rowp = Vec::with_capacity(rows.len() + 1);
        let mut cols = Vec::new();
        rowp.push(0);
        for r in rows {
            cols.extend_from_slice(r);
            rowp.push(cols.len());
        }
        let vals = vec![0.0; cols.len() * bsize * bsize];
        Self {
            bsize,
            rowp,
            cols,
            vals,
        }
    }

    pub fn from_graph(graph: &AdjacencyGraph, bsize: usize) -> Self {
        let vals = vec![0.0; graph.adjncy.len() * bsize * bsize];
        Self {
            bsize,
            rowp: graph.xadj.clone(),
            cols: graph.adjncy.clone(),
            vals,
        }
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    pub fn num_rows(&self) -> usize {
        self.rowp.len() - 1
    }

    pub fn num_blocks(&self) -> usize {
        self.cols.len()
    }

    /// Block indices of row `i`.
    #[inline]
    pub fn row_range(&self, i: usize) -> std::ops::Range<usize> {
        self.rowp[i]..self.rowp[i + 1]
    }

    pub fn row_cols(&self, i: usize) -> &[usize] {
        &self.cols[self.row_range(i)]
    }

    #[inline]
    pub fn find(&self, i: usize, j: usize) -> Option<usize> {
        let r = self.row_range(i);
        self.cols[r.clone()].binary_search(&j).ok().map(|k| r.start + k)
    }

    #[inline]
    pub fn block(&self, k: usize) -> &[f64] {
        let b2 = self.bsize * self.bsize;
        &self.vals[k * b2..(k + 1) * b2]
    }

    #[inline]
    pub fn block_mut(&mut self, k: usize) -> &mut [f64] {
        let b2 = self.bsize * self.bsize;
        &mut self.vals[k * b2..(k + 1) * b2]
    }

    /// Blocks of row `i`, contiguous.
    pub fn row_values(&self, i: usize) -> &[f64] {
        let b2 = self.bsize * self.bsize;
        let r = self.row_range(i);
        &self.vals[r.start * b2..r.end * b2]
    }

    pub fn values(&self) -> &[f64] {
        &self.vals
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.vals
    }

    pub fn zero_entries(&mut self) {
        self.vals.fill(0.0);
    }

    /// Add `scale` times node block `(a, b)` of a dense `nvars × nvars`
    /// element matrix into block `(i, j)`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_element_block(
        &mut self,
        i: usize,
        j: usize,
        scale: f64,
        mat: &[f64],
        nvars: usize,
        a: usize,
        b: usize,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let k = self
            .find(i, j)
            .ok_or(AssemblerError::PatternMissingEntry { row: i, col: j })?;
        let bs = self.bsize;
        let blk = self.block_mut(k);
        for r in 0..bs {
            for c in 0..bs {
                let v = match orient {
                    MatrixOrientation::Normal => mat[(a * bs + r) * nvars + b * bs + c],
                    MatrixOrientation::Transpose => mat[(b * bs + c) * nvars + a * bs + r],
                };
                blk[r * bs + c] += scale * v;
            }
        }
        Ok(())
    }

    /// Zero the DOF rows of row `i` selected by `mask`; with `diag = Some(j)`
    /// put ones on those DOFs of block `(i, j)`.
    pub fn zero_row_dofs(&mut self, i: usize, mask: u32, diag: Option<usize>) {
        let bs = self.bsize;
        for k in self.row_range(i) {
            let blk = self.block_mut(k);
            for r in (0..bs).filter(|&r| mask & (1 << r) != 0) {
                blk[r * bs..(r + 1) * bs].fill(0.0);
            }
        }
        if let Some(k) = diag.and_then(|j| self.find(i, j)) {
            let blk = self.block_mut(k);
            for r in (0..bs).filter(|&r| mask & (1 << r) != 0) {
                blk[r * bs + r] = 1.0;
            }
        }
    }

    /// Zero the DOF columns selected by `col_mask(col)` in every block,
    /// skipping the diagonal block of each row when `keep_diag` is set.
    pub fn zero_col_dofs(&mut self, col_mask: impl Fn(usize) -> u32, keep_diag: impl Fn(usize, usize) -> bool) {
        let bs = self.bsize;
        for i in 0..self.num_rows() {
            for k in self.row_range(i) {
                let j = self.cols[k];
                let mask = col_mask(j);
                if mask == 0 {
                    continue;
                }
                let keep = keep_diag(i, j);
                let blk = self.block_mut(k);
                for c in (0..bs).filter(|&c| mask & (1 << c) != 0) {
                    for r in 0..bs {
                        if keep && r == c {
                            continue;
                        }
                        blk[r * bs + c] = 0.0;
                    }
                }
            }
        }
    }
}

/// Route a dense element matrix through the dependent-node expansion.
///
/// `add(row_node, col_node, scale, a, b)` is called for every expanded pair,
/// where `a`/`b` are the positions of the nodes inside the element.
pub fn for_each_element_block<F>(
    nodes: &[i64],
    deps: &ConstraintGraph,
    mut add: F,
) -> Result<(), AssemblerError>
where
    F: FnMut(usize, usize, f64, usize, usize) -> Result<(), AssemblerError>,
{
    for (a, &ra) in nodes.iter().enumerate() {
        for (i, wa) in deps.expand_raw(ra) {
            for (b, &rb) in nodes.iter().enumerate() {
                for (j, wb) in deps.expand_raw(rb) {
                    add(i, j, wa * wb, a, b)?;
                }
            }
        }
    }
    Ok(())
}

/// Matrices the assembler can fill.
pub trait AssemblyMatrix: Send {
    /// Zero all stored values, keeping the pattern.
    fn zero_entries(&mut self);

    /// Add an element matrix for `nodes` (local indices, negative = dependent).
    fn add_element_matrix(
        &mut self,
        nodes: &[i64],
        mat: &[f64],
        deps: &ConstraintGraph,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError>;

    /// Finish an assembly pass: combine across ranks (if needed) and apply
    /// Dirichlet conditions. `bcs` is keyed by local node index.
    fn finalize<C: Communicator + ?Sized>(&mut self, comm: &C, bcs: &BcMap) -> Result<(), AssemblerError>;
}

/// Distributed row-block matrix.
#[derive(Clone, Debug)]
pub struct DistMat {
    bsize: usize,
    ext_offset: usize,
    num_owned: usize,
    owned_start: usize,
    local_to_global: Vec<usize>,
    /// Accumulator over local nodes (columns are local indices).
    local: BlockCsr,
    /// Owned rows (columns are global ids).
    rows: BlockCsr,
    /// For every block of the local owned rows, its block in `rows`.
    owned_map: Vec<usize>,
    /// Local ghost rows sent to each rank, in send order.
    send_rows: Vec<Vec<usize>>,
    /// For every block received from each rank, its block in `rows`.
    recv_pos: Vec<Vec<usize>>,
}

impl DistMat {
    /// Collective: build the pattern from the local node → node graph
    /// (diagonal included) and exchange the ghost-row patterns.
    pub fn new<C: Communicator + ?Sized>(
        comm: &C,
        ownership: &OwnershipMap,
        halo: &HaloIndex,
        pattern: &AdjacencyGraph,
        bsize: usize,
    ) -> Result<Self, AssemblerError> {
        let size = comm.size();
        let l2g = halo.local_to_global();
        let owned_local = halo.owned_local_range();
        let local = BlockCsr::from_graph(pattern, bsize);

        // Ghost rows: [row, ncols, cols...] in global ids, grouped by owner.
        let mut send_rows = vec![Vec::new(); size];
        let mut sends = vec![Vec::new(); size];
        for i in (0..halo.num_local()).filter(|i| !owned_local.contains(i)) {
            let g = l2g[i];
            let p = ownership.owner(g)?;
            send_rows[p].push(i);
            let cols = local.row_cols(i);
            sends[p].push(WireNode::of(g));
            sends[p].push(WireNode::of(cols.len()));
            sends[p].extend(cols.iter().map(|&c| WireNode::of(l2g[c])));
        }
        let recvd = all_to_all_v(comm, tags::MAT_PATTERN, &sends)?;

        // Owned row patterns: local columns plus received columns.
        let start = halo.owned_range().start;
        let mut rows: Vec<Vec<usize>> = owned_local
            .clone()
            .map(|i| local.row_cols(i).iter().map(|&c| l2g[c]).collect())
            .collect();
        let mut decoded: Vec<Vec<(usize, Vec<usize>)>> = Vec::with_capacity(size);
        for (p, recs) in recvd.iter().enumerate() {
            let mut msgs = Vec::new();
            let mut k = 0;
            while k < recs.len() {
                let bad = || AssemblerError::BufferSizeMismatch {
                    neighbor: p,
                    expected: (k + 2) * size_of::<WireNode>(),
                    got: recs.len() * size_of::<WireNode>(),
                };
                let g = recs[k].get();
                let n = recs.get(k + 1).ok_or_else(bad)?.get();
                let cols: Vec<usize> = recs
                    .get(k + 2..k + 2 + n)
                    .ok_or_else(bad)?
                    .iter()
                    .map(WireNode::get)
                    .collect();
                let row = ownership.local_offset(g)?;
                rows[row].extend_from_slice(&cols);
                msgs.push((row, cols));
                k += 2 + n;
            }
            decoded.push(msgs);
        }
        for r in rows.iter_mut() {
            r.sort_unstable();
            r.dedup();
        }
        let owned_rows = BlockCsr::from_rows(&rows, bsize);

        let mut owned_map = Vec::new();
        for (row, i) in owned_local.clone().enumerate() {
            for &c in local.row_cols(i) {
                owned_map.push(find_or_err(&owned_rows, row, l2g[c])?);
            }
        }
        let mut recv_pos = vec![Vec::new(); size];
        for (p, msgs) in decoded.into_iter().enumerate() {
            for (row, cols) in msgs {
                for c in cols {
                    recv_pos[p].push(find_or_err(&owned_rows, row, c)?);
                }
            }
        }

        Ok(Self {
            bsize,
            ext_offset: halo.ext_offset(),
            num_owned: halo.num_owned(),
            owned_start: start,
            local_to_global: l2g,
            local,
            rows: owned_rows,
            owned_map,
            send_rows,
            recv_pos,
        })
    }

    pub fn bsize(&self) -> usize {
        self.bsize
    }

    /// Owned global row ids.
    pub fn owned_rows(&self) -> std::ops::Range<usize> {
        self.owned_start..self.owned_start + self.num_owned
    }

    /// Global column ids of an owned row.
    pub fn row_pattern(&self, row: usize) -> Option<&[usize]> {
        self.owned_rows()
            .contains(&row)
            .then(|| self.rows.row_cols(row - self.owned_start))
    }

    /// Block `(row, col)` of the assembled matrix (global ids, owned row).
    pub fn get_block(&self, row: usize, col: usize) -> Option<&[f64]> {
        if !self.owned_rows().contains(&row) {
            return None;
        }
        self.rows
            .find(row - self.owned_start, col)
            .map(|k| self.rows.block(k))
    }

    /// Scalar entry `(row dof, col dof)`, zero outside the pattern.
    pub fn entry(&self, row: usize, rdof: usize, col: usize, cdof: usize) -> f64 {
        self.get_block(row, col)
            .map_or(0.0, |b| b[rdof * self.bsize + cdof])
    }

    /// The owned rows as a block CSR with global column ids.
    pub fn owned_block_rows(&self) -> &BlockCsr {
        &self.rows
    }

    /// Sum ghost rows into their owners' rows.
    fn reduce<C: Communicator + ?Sized>(&mut self, comm: &C) -> Result<(), AssemblerError> {
        let sends: Vec<Vec<f64>> = self
            .send_rows
            .iter()
            .map(|rows| {
                rows.iter()
                    .flat_map(|&i| self.local.row_values(i).iter().copied())
                    .collect()
            })
            .collect();
        let recvd = all_to_all_v(comm, tags::MAT_VALUES, &sends)?;

        self.rows.zero_entries();
        let b2 = self.bsize * self.bsize;
        let first = self.local.rowp[self.ext_offset];
        for (n, &dst) in self.owned_map.iter().enumerate() {
            let src = (first + n) * b2;
            self.rows.vals[dst * b2..(dst + 1) * b2]
                .iter_mut()
                .zip(&self.local.vals[src..src + b2])
                .for_each(|(x, v)| *x += v);
        }
        for (p, vals) in recvd.iter().enumerate() {
            let pos = &self.recv_pos[p];
            if vals.len() != pos.len() * b2 {
                return Err(AssemblerError::BufferSizeMismatch {
                    neighbor: p,
                    expected: pos.len() * b2 * size_of::<f64>(),
                    got: vals.len() * size_of::<f64>(),
                });
            }
            for (n, &dst) in pos.iter().enumerate() {
                self.rows.vals[dst * b2..(dst + 1) * b2]
                    .iter_mut()
                    .zip(&vals[n * b2..(n + 1) * b2])
                    .for_each(|(x, v)| *x += v);
            }
        }
        Ok(())
    }

    /// Zero constrained rows and columns of the owned rows and put ones on the
    /// diagonal of constrained rows. `bcs` is keyed by local node index.
    /// Applying it twice is a no-op.
    pub fn apply_bcs(&mut self, bcs: &BcMap) {
        let mut col_masks: Vec<(usize, u32)> = bcs
            .iter()
            .filter_map(|(l, e)| self.local_to_global.get(l).map(|&g| (g, e.mask)))
            .collect();
        col_masks.sort_unstable();
        let mask_of = |g: usize| {
            col_masks
                .binary_search_by_key(&g, |&(c, _)| c)
                .map_or(0, |k| col_masks[k].1)
        };
        let start = self.owned_start;
        self.rows.zero_col_dofs(mask_of, |i, j| i + start == j);
        for (l, e) in bcs.iter() {
            if l >= self.ext_offset && l < self.ext_offset + self.num_owned {
                let row = l - self.ext_offset;
                self.rows.zero_row_dofs(row, e.mask, Some(row + start));
            }
        }
    }
}

fn find_or_err(m: &BlockCsr, row: usize, col: usize) -> Result<usize, AssemblerError> {
    m.find(row, col)
        .ok_or(AssemblerError::PatternMissingEntry { row, col })
}

impl AssemblyMatrix for DistMat {
    fn zero_entries(&mut self) {
        self.local.zero_entries();
        self.rows.zero_entries();
    }

    fn add_element_matrix(
        &mut self,
        nodes: &[i64],
        mat: &[f64],
        deps: &ConstraintGraph,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let nvars = nodes.len() * self.bsize;
        let local = &mut self.local;
        for_each_element_block(nodes, deps, |i, j, w, a, b| {
            local.add_element_block(i, j, w, mat, nvars, a, b, orient)
        })
    }

    fn finalize<C: Communicator + ?Sized>(&mut self, comm: &C, bcs: &BcMap) -> Result<(), AssemblerError> {
        // Columns first, on every rank that touches them: the owner of a row
        // may not know the constraints of every column it receives.
        let mut masks = vec![0u32; self.local.num_rows()];
        for (l, e) in bcs.iter() {
            if let Some(m) = masks.get_mut(l) {
                *m |= e.mask;
            }
        }
        self.local.zero_col_dofs(|j| masks[j], |_, _| false);
        self.reduce(comm)?;
        self.apply_bcs(bcs);
        Ok(())
    }
}
