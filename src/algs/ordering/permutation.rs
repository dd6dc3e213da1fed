//! Index permutations.
//!
//! A [`Permutation`] stores `perm` such that for *target* (new) index `i` the
//! *source* (old) index is `perm[i]`, together with the inverse map.

use serde::{Deserialize, Serialize};

use crate::algs::adjacency_graph::AdjacencyGraph;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::AssemblerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permutation {
    perm: Vec<usize>,
    #[serde(skip)]
    iperm: Vec<usize>,
}

impl Permutation {
    /// Validate `perm` (new → old) and build its inverse.
    pub fn from_vec(perm: Vec<usize>) -> Result<Self, AssemblerError> {
        let n = perm.len();
        let mut iperm = vec![usize::MAX; n];
        for (target, &source) in perm.iter().enumerate() {
            if source >= n {
                return Err(AssemblerError::InvalidPermutation(format!(
                    "index {source} out of range for length {n}"
                )));
            }
            if iperm[source] != usize::MAX {
                return Err(AssemblerError::InvalidPermutation(format!(
                    "index {source} appears twice"
                )));
            }
            iperm[source] = target;
        }
        Ok(Self { perm, iperm })
    }

    /// Build from the old → new map.
    pub fn from_new_numbers(new_of_old: Vec<usize>) -> Result<Self, AssemblerError> {
        Ok(Self::from_vec(new_of_old)?.inverse())
    }

    pub fn identity(n: usize) -> Self {
        Self {
            perm: (0..n).collect(),
            iperm: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    /// New → old.
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    /// Old → new.
    pub fn new_numbers(&self) -> &[usize] {
        &self.iperm
    }

    #[inline]
    pub fn source_index(&self, target: usize) -> usize {
        self.perm[target]
    }

    #[inline]
    pub fn target_index(&self, source: usize) -> usize {
        self.iperm[source]
    }

    pub fn inverse(&self) -> Permutation {
        Self {
            perm: self.iperm.clone(),
            iperm: self.perm.clone(),
        }
    }

    /// Rebuild the inverse after deserialization.
    pub fn restore(self) -> Result<Self, AssemblerError> {
        Self::from_vec(self.perm)
    }

    pub fn apply_to_slice<T: Clone>(&self, slice: &[T]) -> Vec<T> {
        self.perm.iter().map(|&s| slice[s].clone()).collect()
    }

    /// Relabel a graph: vertex `old` becomes `target_index(old)`.
    pub fn apply_to_graph(&self, g: &AdjacencyGraph) -> AdjacencyGraph {
        let rows = self
            .perm
            .iter()
            .map(|&old| g.neighbors(old).iter().map(|&u| self.iperm[u]).collect())
            .collect();
        AdjacencyGraph::from_rows(rows)
    }
}

impl DebugInvariants for Permutation {
    fn validate_invariants(&self) -> Result<(), AssemblerError> {
        let ok = self.perm.len() == self.iperm.len()
            && self.perm.iter().enumerate().all(|(t, &s)| self.iperm.get(s) == Some(&t));
        if ok {
            Ok(())
        } else {
            Err(AssemblerError::InvalidPermutation(
                "perm and iperm disagree".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_repeats_and_out_of_range() {
        assert!(Permutation::from_vec(vec![0, 0]).is_err());
        assert!(Permutation::from_vec(vec![0, 2]).is_err());
    }

    #[test]
    fn inverse_and_graph_roundtrip() {
        let p = Permutation::from_vec(vec![2, 0, 1]).unwrap();
        assert_eq!(p.new_numbers(), &[1, 2, 0]);
        assert_eq!(p.apply_to_slice(&['a', 'b', 'c']), vec!['c', 'a', 'b']);
        let g = AdjacencyGraph::from_edges(3, &[(0, 1), (1, 2)]);
        let back = p.inverse().apply_to_graph(&p.apply_to_graph(&g));
        assert_eq!(back, g);
    }

    #[test]
    fn serde_restores_inverse() {
        let p = Permutation::from_vec(vec![1, 2, 0]).unwrap();
        let s = serde_json::to_string(&p).unwrap();
        let back: Permutation = serde_json::from_str::<Permutation>(&s).unwrap().restore().unwrap();
        assert_eq!(back, p);
    }
}
