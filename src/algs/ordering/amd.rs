//! Minimum-degree ordering on the quotient graph.
//!
//! Eliminated pivots become *elements*; a variable's neighborhood is its
//! remaining variable neighbors plus the variables of its adjacent elements.
//! Elements adjacent to a new pivot are absorbed into it, so the structure
//! never grows beyond the original graph plus one list per pivot.
//!
//! Degrees are either recomputed exactly or bounded with the approximate
//! degree of Amestoy, Davis & Duff. Variables can be restricted to a trailing
//! block: they are only eligible once every other variable is eliminated.

use std::collections::BTreeSet;

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::ordering::permutation::Permutation;

/// Options for [`minimum_degree`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AmdOptions {
    /// Recompute exact external degrees instead of the approximate bound.
    pub exact_degree: bool,
}

struct QuotientGraph {
    var_adj: Vec<Vec<usize>>,
    elem_adj: Vec<Vec<usize>>,
    elem_vars: Vec<Vec<usize>>,
    eliminated: Vec<bool>,
    elem_alive: Vec<bool>,
    degree: Vec<usize>,
    stamp: Vec<usize>,
    /// `|L_e \ L_p|` of element `e`, valid where `w_mark[e]` is the current mark.
    w: Vec<usize>,
    w_mark: Vec<usize>,
    clock: usize,
}

impl QuotientGraph {
    fn new(graph: &AdjacencyGraph) -> Self {
        let n = graph.num_vertices();
        let var_adj: Vec<Vec<usize>> = (0..n)
            .map(|i| graph.neighbors(i).iter().copied().filter(|&j| j != i).collect())
            .collect();
        let degree = var_adj.iter().map(Vec::len).collect();
        Self {
            var_adj,
            elem_adj: vec![Vec::new(); n],
            elem_vars: vec![Vec::new(); n],
            eliminated: vec![false; n],
            elem_alive: vec![false; n],
            degree,
            stamp: vec![0; n],
            w: vec![0; n],
            w_mark: vec![0; n],
            clock: 0,
        }
    }

    fn tick(&mut self) -> usize {
        self.clock += 1;
        self.clock
    }

    /// Eliminate `p`; returns the variables of the new element.
    fn eliminate(&mut self, p: usize) -> Vec<usize> {
        self.eliminated[p] = true;
        let mark = self.tick();
        let mut lp = Vec::new();
        for &i in &self.var_adj[p] {
            if !self.eliminated[i] && self.stamp[i] != mark {
                self.stamp[i] = mark;
                lp.push(i);
            }
        }
        let absorbed = std::mem::take(&mut self.elem_adj[p]);
        for &e in &absorbed {
            if !self.elem_alive[e] {
                continue;
            }
            for &i in &self.elem_vars[e] {
                if !self.eliminated[i] && self.stamp[i] != mark {
                    self.stamp[i] = mark;
                    lp.push(i);
                }
            }
            self.elem_alive[e] = false;
            self.elem_vars[e].clear();
        }
        self.var_adj[p].clear();
        self.elem_vars[p] = lp.clone();
        self.elem_alive[p] = true;

        // Prune: variables of L_p reach each other through element p.
        for &i in &lp {
            let elem_alive = &self.elem_alive;
            self.elem_adj[i].retain(|&e| elem_alive[e]);
            self.elem_adj[i].push(p);
            let (eliminated, stamp) = (&self.eliminated, &self.stamp);
            self.var_adj[i].retain(|&j| !eliminated[j] && stamp[j] != mark);
        }
        lp
    }

    fn exact_degree(&mut self, i: usize) -> usize {
        let mark = self.tick();
        self.stamp[i] = mark;
        let mut d = 0;
        for &j in &self.var_adj[i] {
            if self.stamp[j] != mark {
                self.stamp[j] = mark;
                d += 1;
            }
        }
        for &e in &self.elem_adj[i] {
            for &j in &self.elem_vars[e] {
                if !self.eliminated[j] && self.stamp[j] != mark {
                    self.stamp[j] = mark;
                    d += 1;
                }
            }
        }
        d
    }

    /// Approximate degrees of every variable in `lp` (element `p`).
    fn approximate_degrees(&mut self, p: usize, lp: &[usize], remaining: usize) {
        // w[e] = |L_e \ L_p| for elements adjacent to L_p.
        let mark = self.tick();
        for &i in lp {
            for k in 0..self.elem_adj[i].len() {
                let e = self.elem_adj[i][k];
                if e == p {
                    continue;
                }
                if self.w_mark[e] != mark {
                    let eliminated = &self.eliminated;
                    self.elem_vars[e].retain(|&j| !eliminated[j]);
                    self.w_mark[e] = mark;
                    self.w[e] = self.elem_vars[e].len();
                }
                self.w[e] = self.w[e].saturating_sub(1);
            }
        }
        let lp_ext = lp.len().saturating_sub(1);
        for &i in lp {
            let outside: usize = self.elem_adj[i]
                .iter()
                .filter(|&&e| e != p && self.w_mark[e] == mark)
                .map(|&e| self.w[e])
                .sum();
            let bound = self.var_adj[i].len() + lp_ext + outside;
            let d = bound
                .min(self.degree[i] + lp_ext)
                .min(remaining.saturating_sub(1));
            self.degree[i] = d;
        }
    }
}

/// Minimum-degree permutation (new → old) of `graph`.
///
/// Vertices listed in `trailing` are ordered after all others; within each
/// block the minimum-degree rule applies with ties broken by vertex index.
pub fn minimum_degree(graph: &AdjacencyGraph, trailing: &[usize], opts: AmdOptions) -> Permutation {
    let n = graph.num_vertices();
    let mut qg = QuotientGraph::new(graph);
    let mut tier = vec![0u8; n];
    for &c in trailing {
        tier[c] = 1;
    }
    let mut queue: BTreeSet<(u8, usize, usize)> =
        (0..n).map(|i| (tier[i], qg.degree[i], i)).collect();
    let mut order = Vec::with_capacity(n);

    while let Some((_, _, p)) = queue.pop_first() {
        order.push(p);
        let lp = qg.eliminate(p);
        for &i in &lp {
            queue.remove(&(tier[i], qg.degree[i], i));
        }
        let remaining = n - order.len();
        if opts.exact_degree {
            for &i in &lp {
                qg.degree[i] = qg.exact_degree(i);
            }
        } else {
            qg.approximate_degrees(p, &lp, remaining);
        }
        for &i in &lp {
            queue.insert((tier[i], qg.degree[i], i));
        }
    }
    Permutation::from_vec(order).unwrap_or_else(|_| Permutation::identity(n))
}

/// Count the nonzeros of the Cholesky factor of `graph` (lower triangle,
/// diagonal included) under `perm`, by symbolic elimination.
pub fn symbolic_fill(graph: &AdjacencyGraph, perm: &Permutation) -> usize {
    let n = graph.num_vertices();
    let mut rows: Vec<BTreeSet<usize>> = (0..n)
        .map(|new| {
            let old = perm.source_index(new);
            graph
                .neighbors(old)
                .iter()
                .map(|&u| perm.target_index(u))
                .filter(|&u| u > new)
                .collect()
        })
        .collect();
    let mut nnz = 0;
    for k in 0..n {
        let row = std::mem::take(&mut rows[k]);
        nnz += row.len() + 1;
        let mut iter = row.iter();
        if let Some(&parent) = iter.next() {
            let rest: Vec<usize> = iter.copied().collect();
            rows[parent].extend(rest);
        }
    }
    nnz
}
