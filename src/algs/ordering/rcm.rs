//! Reverse Cuthill-McKee ordering.
//!
//! Each connected component is ordered by a BFS from a pseudo-peripheral
//! root; within one BFS level, vertices are sorted by (parent label, degree).
//! The concatenated order is then reversed.

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::algs::ordering::bfs::LevelBfs;
use crate::algs::ordering::permutation::Permutation;

/// RCM permutation (new → old) of `graph`.
pub fn reverse_cuthill_mckee(graph: &AdjacencyGraph) -> Permutation {
    let n = graph.num_vertices();
    let mut labels = vec![usize::MAX; n];
    let mut order = Vec::with_capacity(n);
    let mut bfs = LevelBfs::new(n);

    for seed in 0..n {
        if labels[seed] != usize::MAX {
            continue;
        }
        // Earlier components are fully labeled, so the unlabeled vertices
        // reachable from `seed` are exactly its component.
        let (root, _) = bfs.peripheral(graph, seed, |v| labels[v] == usize::MAX);

        // 1. Label the root
        labels[root] = order.len();
        order.push(root);
        let mut frontier = vec![root];
        while !frontier.is_empty() {
            // 2. Collect unlabeled neighbors with the label of their first parent
            let mut next: Vec<(usize, usize, usize)> = Vec::new();
            for &u in &frontier {
                for &v in graph.neighbors(u) {
                    if labels[v] == usize::MAX {
                        labels[v] = usize::MAX - 1;
                        next.push((labels[u], graph.degree(v), v));
                    }
                }
            }
            // 3. SORTPERM: (parent label, degree, v)
            next.sort_unstable();
            for &(_, _, v) in &next {
                labels[v] = order.len();
                order.push(v);
            }
            frontier = next.into_iter().map(|t| t.2).collect();
        }
    }
    order.reverse();
    // Every vertex was labeled exactly once.
    Permutation::from_vec(order).unwrap_or_else(|_| Permutation::identity(n))
}
