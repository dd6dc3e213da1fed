//! Breadth-first level structures over a filtered vertex set.
//!
//! One [`LevelBfs`] is reused for every search of an ordering run. Visited
//! vertices are stamped with the search number, so starting a new search
//! costs nothing beyond the vertices it reaches.

use crate::algs::adjacency_graph::AdjacencyGraph;

pub(crate) struct LevelBfs {
    seen: Vec<usize>,
    clock: usize,
}

impl LevelBfs {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            seen: vec![0; n],
            clock: 0,
        }
    }

    fn next_mark(&mut self) -> usize {
        self.clock += 1;
        self.clock
    }

    fn grow<F>(&mut self, graph: &AdjacencyGraph, root: usize, mark: usize, admit: &F) -> Vec<Vec<usize>>
    where
        F: Fn(usize) -> bool,
    {
        self.seen[root] = mark;
        let mut levels = vec![vec![root]];
        loop {
            let mut next = Vec::new();
            if let Some(last) = levels.last() {
                for &u in last {
                    for &v in graph.neighbors(u) {
                        if self.seen[v] != mark && admit(v) {
                            self.seen[v] = mark;
                            next.push(v);
                        }
                    }
                }
            }
            if next.is_empty() {
                return levels;
            }
            levels.push(next);
        }
    }

    /// Levels from `root` over the vertices accepted by `admit`.
    pub(crate) fn levels<F>(&mut self, graph: &AdjacencyGraph, root: usize, admit: F) -> Vec<Vec<usize>>
    where
        F: Fn(usize) -> bool,
    {
        let mark = self.next_mark();
        self.grow(graph, root, mark, &admit)
    }

    /// Root and levels of a pseudo-peripheral search: restart from the
    /// minimum-degree vertex of the last level while the depth grows.
    pub(crate) fn peripheral<F>(
        &mut self,
        graph: &AdjacencyGraph,
        start: usize,
        admit: F,
    ) -> (usize, Vec<Vec<usize>>)
    where
        F: Fn(usize) -> bool,
    {
        let mut root = start;
        let mut levels = self.levels(graph, start, &admit);
        loop {
            let Some(cand) = levels
                .last()
                .and_then(|l| l.iter().copied().min_by_key(|&v| (graph.degree(v), v)))
            else {
                return (root, levels);
            };
            let next = self.levels(graph, cand, &admit);
            if next.len() <= levels.len() {
                return (root, levels);
            }
            root = cand;
            levels = next;
        }
    }

    /// Connected components of `verts` (all admitted), in order of their
    /// first vertex.
    pub(crate) fn components<F>(&mut self, graph: &AdjacencyGraph, verts: &[usize], admit: F) -> Vec<Vec<usize>>
    where
        F: Fn(usize) -> bool,
    {
        let mark = self.next_mark();
        let mut comps = Vec::new();
        for &v in verts {
            if self.seen[v] != mark {
                comps.push(self.grow(graph, v, mark, &admit).concat());
            }
        }
        comps
    }
}
