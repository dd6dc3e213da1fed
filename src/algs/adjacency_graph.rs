//! Node → element and node → node adjacency from element connectivity.
//!
//! Dependent nodes are expanded through the [`ConstraintGraph`], so an element
//! touching a dependent node couples all of that node's parents. The CSR
//! arrays are built in two passes: a conservative row-size estimate is
//! allocated and filled, then each row is sorted, deduplicated and compacted.
//!
//! Determinism: neighbor lists are always sorted and deduplicated.

use crate::data::constraints::ConstraintGraph;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::AssemblerError;
use crate::topology::connectivity::ElementConnectivity;

/// CSR-style adjacency graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyGraph {
    /// CSR offsets into `adjncy` for each vertex.
    pub xadj: Vec<usize>,
    /// CSR adjacency list.
    pub adjncy: Vec<usize>,
}

impl AdjacencyGraph {
    /// Return the neighbor index slice for vertex `i`.
    #[inline]
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.adjncy[self.xadj[i]..self.xadj[i + 1]]
    }

    pub fn num_vertices(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }

    #[inline]
    pub fn degree(&self, i: usize) -> usize {
        self.xadj[i + 1] - self.xadj[i]
    }

    /// Symmetric graph from an undirected edge list; self loops are dropped.
    pub fn from_edges(n: usize, edges: &[(usize, usize)]) -> Self {
        let mut rows = vec![Vec::new(); n];
        for &(u, v) in edges {
            if u != v {
                rows[u].push(v);
                rows[v].push(u);
            }
        }
        Self::from_rows(rows)
    }

    /// Graph from per-vertex neighbor lists (sorted and deduplicated here).
    pub fn from_rows(rows: Vec<Vec<usize>>) -> Self {
        let mut xadj = Vec::with_capacity(rows.len() + 1);
        let mut adjncy = Vec::new();
        xadj.push(0);
        for mut r in rows {
            r.sort_unstable();
            r.dedup();
            adjncy.extend(r);
            xadj.push(adjncy.len());
        }
        Self { xadj, adjncy }
    }

    /// Subgraph induced by `verts`; `index_of` gives the new index of a
    /// vertex of the set and `None` for every other vertex.
    pub fn induced<F>(&self, verts: &[usize], index_of: F) -> Self
    where
        F: Fn(usize) -> Option<usize>,
    {
        let rows: Vec<Vec<usize>> = verts
            .iter()
            .map(|&v| self.neighbors(v).iter().filter_map(|&u| index_of(u)).collect())
            .collect();
        Self::from_rows(rows)
    }
}

impl DebugInvariants for AdjacencyGraph {
    fn validate_invariants(&self) -> Result<(), AssemblerError> {
        let n = self.num_vertices();
        if self.xadj.first().copied().unwrap_or(0) != 0
            || self.xadj.windows(2).any(|w| w[1] < w[0])
            || self.xadj.last().copied().unwrap_or(0) != self.adjncy.len()
        {
            return Err(AssemblerError::InvalidOption("malformed xadj".into()));
        }
        if let Some(&bad) = self.adjncy.iter().find(|&&u| u >= n) {
            return Err(AssemblerError::InvalidOption(format!(
                "neighbor {bad} out of range for {n} vertices"
            )));
        }
        Ok(())
    }
}

/// Options for node → node adjacency.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeAdjacencyOpts {
    /// Drop `i` from row `i` (needed by ordering back ends).
    pub no_diagonal: bool,
}

/// Expanded independent nodes of element `e`, possibly with repeats.
#[inline]
pub fn element_nodes<'a>(
    conn: &'a ElementConnectivity,
    constraints: &'a ConstraintGraph,
    e: usize,
) -> impl Iterator<Item = usize> + 'a {
    conn.element(e)
        .iter()
        .flat_map(move |&raw| constraints.expand_raw(raw).map(|(n, _)| n))
}

/// Invert element → node into node → element over `num_nodes` local nodes.
///
/// `conn` and `constraints` must already use local node indices.
pub fn node_to_element(
    num_nodes: usize,
    conn: &ElementConnectivity,
    constraints: &ConstraintGraph,
) -> AdjacencyGraph {
    // Pass 1: counts (with repeats, an upper bound).
    let mut xadj = vec![0usize; num_nodes + 1];
    for e in 0..conn.num_elements() {
        for n in element_nodes(conn, constraints, e) {
            xadj[n + 1] += 1;
        }
    }
    for i in 0..num_nodes {
        xadj[i + 1] += xadj[i];
    }
    // Pass 2: fill; elements are visited in order so rows come out sorted.
    let mut fill = xadj.clone();
    let mut adjncy = vec![0usize; xadj[num_nodes]];
    for e in 0..conn.num_elements() {
        for n in element_nodes(conn, constraints, e) {
            adjncy[fill[n]] = e;
            fill[n] += 1;
        }
    }
    compact(xadj, adjncy, |_, _| true)
}

/// Node → node adjacency over all local nodes.
pub fn node_to_node(
    num_nodes: usize,
    conn: &ElementConnectivity,
    constraints: &ConstraintGraph,
    opts: NodeAdjacencyOpts,
) -> AdjacencyGraph {
    let identity: Vec<Option<usize>> = (0..num_nodes).map(Some).collect();
    node_to_node_reduced(&identity, num_nodes, conn, constraints, opts)
}

/// Node → node adjacency restricted to a subset of nodes.
///
/// `reduced[i] = Some(r)` places local node `i` at row/column `r`; nodes
/// mapped to `None` are left out of both rows and columns.
pub fn node_to_node_reduced(
    reduced: &[Option<usize>],
    num_reduced: usize,
    conn: &ElementConnectivity,
    constraints: &ConstraintGraph,
    opts: NodeAdjacencyOpts,
) -> AdjacencyGraph {
    let n2e = node_to_element(reduced.len(), conn, constraints);

    // Pass 1: estimate each row as the sum of its elements' sizes.
    let mut xadj = vec![0usize; num_reduced + 1];
    for (i, r) in reduced.iter().enumerate() {
        if let Some(r) = *r {
            xadj[r + 1] = n2e
                .neighbors(i)
                .iter()
                .map(|&e| element_nodes(conn, constraints, e).count())
                .sum();
        }
    }
    for r in 0..num_reduced {
        xadj[r + 1] += xadj[r];
    }

    // Pass 2: fill with mapped neighbors, then sort/dedup/compact.
    let mut adjncy = vec![0usize; xadj[num_reduced]];
    let mut len = vec![0usize; num_reduced];
    for (i, r) in reduced.iter().enumerate() {
        let Some(r) = *r else { continue };
        for &e in n2e.neighbors(i) {
            for n in element_nodes(conn, constraints, e) {
                if let Some(c) = reduced[n] {
                    adjncy[xadj[r] + len[r]] = c;
                    len[r] += 1;
                }
            }
        }
        let row = &mut adjncy[xadj[r]..xadj[r] + len[r]];
        row.sort_unstable();
    }
    let mut row_end = xadj.clone();
    for r in 0..num_reduced {
        row_end[r + 1] = xadj[r] + len[r];
    }
    let graph = compact_rows(&xadj, &row_end, adjncy, |row, col| {
        !(opts.no_diagonal && row == col)
    });
    graph.debug_assert_invariants();
    graph
}

/// Sort and deduplicate every full row of a CSR pair.
fn compact(
    xadj: Vec<usize>,
    mut adjncy: Vec<usize>,
    keep: impl Fn(usize, usize) -> bool,
) -> AdjacencyGraph {
    let n = xadj.len() - 1;
    for i in 0..n {
        adjncy[xadj[i]..xadj[i + 1]].sort_unstable();
    }
    let ends: Vec<usize> = std::iter::once(0).chain(xadj[1..].iter().copied()).collect();
    compact_rows(&xadj, &ends, adjncy, keep)
}

/// Compact sorted rows `adjncy[xadj[i]..ends[i + 1]]`, dropping duplicates
/// and entries rejected by `keep(row, col)`.
fn compact_rows(
    xadj: &[usize],
    ends: &[usize],
    mut adjncy: Vec<usize>,
    keep: impl Fn(usize, usize) -> bool,
) -> AdjacencyGraph {
    let n = xadj.len() - 1;
    let mut out_xadj = vec![0usize; n + 1];
    let mut w = 0usize;
    for i in 0..n {
        let mut prev = None;
        for k in xadj[i]..ends[i + 1] {
            let c = adjncy[k];
            if prev != Some(c) && keep(i, c) {
                adjncy[w] = c;
                w += 1;
            }
            prev = Some(c);
        }
        out_xadj[i + 1] = w;
    }
    adjncy.truncate(w);
    adjncy.shrink_to_fit();
    AdjacencyGraph {
        xadj: out_xadj,
        adjncy,
    }
}
