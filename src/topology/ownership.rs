//! Ownership of global node ids.
//!
//! The [`OwnershipMap`] partitions `[0, N)` into `P` contiguous blocks, one
//! per rank, stored as the prefix sums `ranges[0..=P]` of the per-rank owned
//! counts. It is built once, collectively, and never changes.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::algs::collective::all_gather;
use crate::algs::communicator::{Communicator, tags};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::AssemblerError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipMap {
    rank: usize,
    ranges: Vec<usize>,
}

impl OwnershipMap {
    /// Collective: every rank passes its owned count and receives the same map.
    pub fn new<C: Communicator + ?Sized>(comm: &C, num_owned: usize) -> Result<Self, AssemblerError> {
        let counts = all_gather(comm, tags::OWNERSHIP, num_owned as u64)?;
        let counts: Vec<usize> = counts.into_iter().map(|c| c as usize).collect();
        let map = Self::from_counts(comm.rank(), &counts)?;
        if comm.rank() == 0 {
            log::debug!(
                "ownership: {} nodes over {} ranks",
                map.num_nodes(),
                map.num_ranks()
            );
        }
        Ok(map)
    }

    /// Build the map for `rank` from all ranks' owned counts.
    pub fn from_counts(rank: usize, counts: &[usize]) -> Result<Self, AssemblerError> {
        let mut ranges = Vec::with_capacity(counts.len() + 1);
        ranges.push(0);
        let mut acc = 0usize;
        for &c in counts {
            acc += c;
            ranges.push(acc);
        }
        Self::from_ranges(rank, ranges)
    }

    /// Build the map for `rank` from explicit prefix sums.
    pub fn from_ranges(rank: usize, ranges: Vec<usize>) -> Result<Self, AssemblerError> {
        let map = Self { rank, ranges };
        map.validate_invariants()?;
        Ok(map)
    }

    /// The rank this map answers `is_owned`/`local_offset` for.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_ranks(&self) -> usize {
        self.ranges.len() - 1
    }

    /// Total number of independent nodes across all ranks.
    pub fn num_nodes(&self) -> usize {
        self.ranges[self.num_ranks()]
    }

    /// The prefix sums `ownerRange[0..=P]`.
    pub fn ranges(&self) -> &[usize] {
        &self.ranges
    }

    /// Global ids owned by rank `r`.
    pub fn owner_range(&self, r: usize) -> Range<usize> {
        self.ranges[r]..self.ranges[r + 1]
    }

    /// Global ids owned by this rank.
    pub fn owned_range(&self) -> Range<usize> {
        self.owner_range(self.rank)
    }

    pub fn num_owned(&self) -> usize {
        self.ranges[self.rank + 1] - self.ranges[self.rank]
    }

    /// Rank owning `global`.
    pub fn owner(&self, global: usize) -> Result<usize, AssemblerError> {
        self.check_range(global)?;
        // Last rank whose range starts at or before `global`; empty ranks
        // share their start with the next rank and are skipped.
        Ok(self.ranges.partition_point(|&r| r <= global) - 1)
    }

    #[inline]
    pub fn is_owned(&self, global: usize) -> bool {
        self.owned_range().contains(&global)
    }

    /// Offset of an owned node inside this rank's block.
    pub fn local_offset(&self, global: usize) -> Result<usize, AssemblerError> {
        self.check_range(global)?;
        if !self.is_owned(global) {
            return Err(AssemblerError::ExternalNodeMissing {
                rank: self.rank,
                node: global,
            });
        }
        Ok(global - self.ranges[self.rank])
    }

    fn check_range(&self, global: usize) -> Result<(), AssemblerError> {
        if global >= self.num_nodes() {
            return Err(AssemblerError::NodeOutOfRange {
                rank: self.rank,
                node: global as i64,
                num_nodes: self.num_nodes(),
            });
        }
        Ok(())
    }
}

impl DebugInvariants for OwnershipMap {
    fn validate_invariants(&self) -> Result<(), AssemblerError> {
        if self.ranges.len() < 2 {
            return Err(AssemblerError::InvalidOwnership(
                "need at least one rank".into(),
            ));
        }
        if self.ranges[0] != 0 {
            return Err(AssemblerError::InvalidOwnership(format!(
                "ranges must start at 0, got {}",
                self.ranges[0]
            )));
        }
        if let Some(w) = self.ranges.windows(2).position(|w| w[0] > w[1]) {
            return Err(AssemblerError::InvalidOwnership(format!(
                "ranges decrease at rank {w}"
            )));
        }
        if self.rank >= self.num_ranks() {
            return Err(AssemblerError::InvalidOwnership(format!(
                "rank {} outside group of {}",
                self.rank,
                self.num_ranks()
            )));
        }
        Ok(())
    }
}
