//! Local node index space of one rank.
//!
//! Local indices are laid out as
//!
//! ```text
//! [0, ext_offset)                         externals below the owned block
//! [ext_offset, ext_offset + num_owned)    owned nodes in global order
//! [ext_offset + num_owned, num_local)     externals above the owned block
//! ```
//!
//! so ownership of a local index is a single range test, and externals are
//! resolved by binary search in the sorted external list.

use std::ops::Range;

use crate::data::constraints::ConstraintGraph;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::AssemblerError;
use crate::topology::connectivity::ElementConnectivity;
use crate::topology::node::NodeRef;
use crate::topology::ownership::OwnershipMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HaloIndex {
    rank: usize,
    owned: Range<usize>,
    ext: Vec<usize>,
    ext_offset: usize,
}

impl HaloIndex {
    /// Index space from an arbitrary list of referenced global ids; owned ids
    /// are dropped and the rest sorted and deduplicated.
    pub fn new(ownership: &OwnershipMap, referenced: impl IntoIterator<Item = usize>) -> Self {
        let owned = ownership.owned_range();
        let mut ext: Vec<usize> = referenced
            .into_iter()
            .filter(|g| !owned.contains(g))
            .collect();
        ext.sort_unstable();
        ext.dedup();
        Self::from_sorted_ext(ownership.rank(), owned, ext)
    }

    /// External nodes of a mesh: every independent node in the element
    /// connectivity and every constraint parent outside the owned range.
    pub fn from_mesh(
        ownership: &OwnershipMap,
        conn: &ElementConnectivity,
        constraints: &ConstraintGraph,
    ) -> Self {
        let from_elems = conn.nodes().iter().filter_map(|&raw| match NodeRef::from_raw(raw) {
            NodeRef::Independent(n) => Some(n),
            NodeRef::Dependent(_) => None,
        });
        let from_deps = constraints.all_parents().iter().copied();
        Self::new(ownership, from_elems.chain(from_deps))
    }

    fn from_sorted_ext(rank: usize, owned: Range<usize>, ext: Vec<usize>) -> Self {
        let ext_offset = ext.partition_point(|&g| g < owned.start);
        let halo = Self {
            rank,
            owned,
            ext,
            ext_offset,
        };
        halo.debug_assert_invariants();
        halo
    }

    pub fn num_owned(&self) -> usize {
        self.owned.len()
    }

    pub fn num_ext(&self) -> usize {
        self.ext.len()
    }

    /// Owned plus external nodes.
    pub fn num_local(&self) -> usize {
        self.owned.len() + self.ext.len()
    }

    pub fn ext_offset(&self) -> usize {
        self.ext_offset
    }

    /// Sorted external global ids.
    pub fn ext_nodes(&self) -> &[usize] {
        &self.ext
    }

    /// Owned global ids.
    pub fn owned_range(&self) -> Range<usize> {
        self.owned.clone()
    }

    /// Local indices of owned nodes.
    pub fn owned_local_range(&self) -> Range<usize> {
        self.ext_offset..self.ext_offset + self.owned.len()
    }

    #[inline]
    pub fn is_owned_local(&self, local: usize) -> bool {
        self.owned_local_range().contains(&local)
    }

    /// Local index of an independent global node.
    pub fn local_index(&self, global: usize) -> Result<usize, AssemblerError> {
        if self.owned.contains(&global) {
            return Ok(global - self.owned.start + self.ext_offset);
        }
        match self.ext.binary_search(&global) {
            Ok(i) if i < self.ext_offset => Ok(i),
            Ok(i) => Ok(i + self.owned.len()),
            Err(_) => Err(AssemblerError::ExternalNodeMissing {
                rank: self.rank,
                node: global,
            }),
        }
    }

    /// Global id of a local index.
    pub fn global_index(&self, local: usize) -> Result<usize, AssemblerError> {
        let n_owned = self.owned.len();
        if local < self.ext_offset {
            Ok(self.ext[local])
        } else if local < self.ext_offset + n_owned {
            Ok(self.owned.start + local - self.ext_offset)
        } else if local < self.num_local() {
            Ok(self.ext[local - n_owned])
        } else {
            Err(AssemblerError::VectorLayoutMismatch {
                expected: self.num_local(),
                got: local + 1,
            })
        }
    }

    /// Local index of the `i`-th entry of the external list.
    #[inline]
    pub fn ext_local(&self, i: usize) -> usize {
        if i < self.ext_offset {
            i
        } else {
            i + self.owned.len()
        }
    }

    /// Global ids of all local indices, in local order.
    pub fn local_to_global(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.num_local());
        out.extend_from_slice(&self.ext[..self.ext_offset]);
        out.extend(self.owned.clone());
        out.extend_from_slice(&self.ext[self.ext_offset..]);
        out
    }
}

impl DebugInvariants for HaloIndex {
    fn validate_invariants(&self) -> Result<(), AssemblerError> {
        if self.ext.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AssemblerError::InvalidOption(
                "external list must be strictly increasing".into(),
            ));
        }
        if self.ext.iter().any(|g| self.owned.contains(g)) {
            return Err(AssemblerError::InvalidOption(
                "external list contains an owned node".into(),
            ));
        }
        Ok(())
    }
}
