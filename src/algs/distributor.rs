//! Owned ↔ ghost synchronization of node-blocked vectors.
//!
//! Every external node of a rank is requested once from its owner when the
//! distributor is built. After that, [`HaloDistributor::scatter`] copies owner
//! values into ghost slots and [`HaloDistributor::gather`] sends ghost
//! contributions back to the owners. Both are collective.

use std::ops::Range;

use crate::algs::collective::all_to_all_v;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::{WireBc, WireNode};
use crate::data::bc::BcMap;
use crate::mesh_error::AssemblerError;
use crate::topology::halo::HaloIndex;
use crate::topology::ownership::OwnershipMap;

/// How ghost values are combined into the owner's entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatherOp {
    /// Sum the local owned part and every ghost contribution.
    Add,
    /// Overwrite with the local owned part, then with ghost values in rank order.
    Insert,
}

#[derive(Clone, Debug)]
pub struct HaloDistributor {
    rank: usize,
    ext_offset: usize,
    num_owned: usize,
    num_local: usize,
    /// Local indices of the external nodes, in external-list order.
    ext_locals: Vec<usize>,
    /// Slice of the external list owned by each rank.
    ext_by_owner: Vec<Range<usize>>,
    /// Owned offsets requested by each rank, in that rank's external order.
    requested: Vec<Vec<usize>>,
}

impl HaloDistributor {
    /// Collective: tell every owner which of its nodes this rank holds as ghosts.
    pub fn new<C: Communicator + ?Sized>(
        comm: &C,
        ownership: &OwnershipMap,
        halo: &HaloIndex,
    ) -> Result<Self, AssemblerError> {
        let size = comm.size();
        let ext = halo.ext_nodes();
        let mut ext_by_owner = Vec::with_capacity(size);
        let mut start = 0;
        for p in 0..size {
            let end = p_end(ext, start, ownership.owner_range(p).end);
            ext_by_owner.push(start..end);
            start = end;
        }
        if start != ext.len() {
            return Err(AssemblerError::NodeOutOfRange {
                rank: comm.rank(),
                node: ext[start] as i64,
                num_nodes: ownership.num_nodes(),
            });
        }
        let sends: Vec<Vec<WireNode>> = ext_by_owner
            .iter()
            .map(|r| ext[r.clone()].iter().map(|&g| WireNode::of(g)).collect())
            .collect();
        let recvd = all_to_all_v(comm, tags::EXT_NODES, &sends)?;
        let requested = recvd
            .iter()
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|w| ownership.local_offset(w.get()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ext_locals = (0..ext.len()).map(|i| halo.ext_local(i)).collect();
        log::debug!(
            "[{}] halo: {} owned, {} external, {} requested by others",
            comm.rank(),
            halo.num_owned(),
            halo.num_ext(),
            requested.iter().map(Vec::len).sum::<usize>()
        );
        Ok(Self {
            rank: comm.rank(),
            ext_offset: halo.ext_offset(),
            num_owned: halo.num_owned(),
            num_local: halo.num_local(),
            ext_locals,
            ext_by_owner,
            requested,
        })
    }

    /// Owned offsets that rank `p` holds as ghosts.
    pub fn requested(&self, p: usize) -> &[usize] {
        &self.requested[p]
    }

    /// Ranges of the external list grouped by owning rank.
    pub fn ext_by_owner(&self) -> &[Range<usize>] {
        &self.ext_by_owner
    }

    pub fn num_local(&self) -> usize {
        self.num_local
    }

    /// Local indices of coupling nodes, sorted: every external node and every
    /// owned node some other rank holds as a ghost.
    pub fn coupling_nodes(&self) -> Vec<usize> {
        let mut owned: Vec<usize> = self
            .requested
            .iter()
            .enumerate()
            .filter(|&(p, _)| p != self.rank)
            .flat_map(|(_, r)| r.iter().map(|&o| o + self.ext_offset))
            .collect();
        owned.sort_unstable();
        owned.dedup();
        let mut out: Vec<usize> = self.ext_locals.iter().copied().filter(|&l| l < self.ext_offset).collect();
        out.extend(owned);
        out.extend(self.ext_locals.iter().copied().filter(|&l| l >= self.ext_offset));
        out
    }

    fn check(&self, owned: usize, local: usize, bsize: usize) -> Result<(), AssemblerError> {
        if owned != self.num_owned * bsize {
            return Err(AssemblerError::VectorLayoutMismatch {
                expected: self.num_owned * bsize,
                got: owned,
            });
        }
        if local != self.num_local * bsize {
            return Err(AssemblerError::VectorLayoutMismatch {
                expected: self.num_local * bsize,
                got: local,
            });
        }
        Ok(())
    }

    /// Fill `local` (owned and ghost slots) from the owned vectors of all ranks.
    pub fn scatter<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        owned: &[f64],
        bsize: usize,
        local: &mut [f64],
    ) -> Result<(), AssemblerError> {
        self.check(owned.len(), local.len(), bsize)?;
        let off = self.ext_offset * bsize;
        local[off..off + owned.len()].copy_from_slice(owned);

        let sends: Vec<Vec<f64>> = self
            .requested
            .iter()
            .map(|req| {
                req.iter()
                    .flat_map(|&o| owned[o * bsize..(o + 1) * bsize].iter().copied())
                    .collect()
            })
            .collect();
        let recvd = all_to_all_v(comm, tags::HALO_VALUES, &sends)?;
        for (p, vals) in recvd.iter().enumerate() {
            let range = self.ext_by_owner[p].clone();
            if vals.len() != range.len() * bsize {
                return Err(AssemblerError::BufferSizeMismatch {
                    neighbor: p,
                    expected: range.len() * bsize * size_of::<f64>(),
                    got: vals.len() * size_of::<f64>(),
                });
            }
            for (k, i) in range.enumerate() {
                let l = self.ext_locals[i];
                local[l * bsize..(l + 1) * bsize].copy_from_slice(&vals[k * bsize..(k + 1) * bsize]);
            }
        }
        Ok(())
    }

    /// Combine `local` (owned and ghost slots) into the owned vectors of all ranks.
    pub fn gather<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        local: &[f64],
        bsize: usize,
        owned: &mut [f64],
        op: GatherOp,
    ) -> Result<(), AssemblerError> {
        self.check(owned.len(), local.len(), bsize)?;
        let sends: Vec<Vec<f64>> = self
            .ext_by_owner
            .iter()
            .map(|range| {
                range
                    .clone()
                    .flat_map(|i| {
                        let l = self.ext_locals[i];
                        local[l * bsize..(l + 1) * bsize].iter().copied()
                    })
                    .collect()
            })
            .collect();
        let recvd = all_to_all_v(comm, tags::HALO_VALUES, &sends)?;

        let off = self.ext_offset * bsize;
        let own_part = &local[off..off + owned.len()];
        match op {
            GatherOp::Add => owned.iter_mut().zip(own_part).for_each(|(o, v)| *o += v),
            GatherOp::Insert => owned.copy_from_slice(own_part),
        }
        for (p, vals) in recvd.iter().enumerate() {
            let req = &self.requested[p];
            if vals.len() != req.len() * bsize {
                return Err(AssemblerError::BufferSizeMismatch {
                    neighbor: p,
                    expected: req.len() * bsize * size_of::<f64>(),
                    got: vals.len() * size_of::<f64>(),
                });
            }
            for (k, &o) in req.iter().enumerate() {
                let dst = &mut owned[o * bsize..(o + 1) * bsize];
                let src = &vals[k * bsize..(k + 1) * bsize];
                match op {
                    GatherOp::Add => dst.iter_mut().zip(src).for_each(|(d, s)| *d += s),
                    GatherOp::Insert => dst.copy_from_slice(src),
                }
            }
        }
        Ok(())
    }

    /// [`gather`](Self::gather) with [`GatherOp::Add`].
    pub fn gather_add<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        local: &[f64],
        bsize: usize,
        owned: &mut [f64],
    ) -> Result<(), AssemblerError> {
        self.gather(comm, local, bsize, owned, GatherOp::Add)
    }
}

impl HaloDistributor {
    /// Collective: send the boundary conditions of owned nodes to every rank
    /// holding them as ghosts. `owned_bcs` is keyed by global id and may only
    /// name owned nodes; the result is keyed by local index and covers every
    /// constrained node this rank touches.
    pub fn share_bcs<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        halo: &HaloIndex,
        owned_bcs: &BcMap,
    ) -> Result<BcMap, AssemblerError> {
        let vpn = owned_bcs.vars_per_node();
        let start = halo.owned_range().start;
        let mut recs = vec![Vec::new(); comm.size()];
        let mut vals = vec![Vec::new(); comm.size()];
        for (p, req) in self.requested.iter().enumerate() {
            for &o in req {
                if let Some(entry) = owned_bcs.get(start + o) {
                    recs[p].push(WireBc::new(start + o, entry.mask));
                    vals[p].extend_from_slice(&entry.values);
                }
            }
        }
        let recs = all_to_all_v(comm, tags::BC_EXCHANGE, &recs)?;
        let vals = all_to_all_v(comm, tags::BC_EXCHANGE.offset(1), &vals)?;

        let mut local = BcMap::new(vpn)?;
        for (g, entry) in owned_bcs.iter() {
            local.insert(halo.local_index(g)?, entry.mask, &entry.values);
        }
        for (p, (recs, vals)) in recs.iter().zip(&vals).enumerate() {
            if vals.len() != recs.len() * vpn {
                return Err(AssemblerError::BufferSizeMismatch {
                    neighbor: p,
                    expected: recs.len() * vpn * size_of::<f64>(),
                    got: vals.len() * size_of::<f64>(),
                });
            }
            for (rec, v) in recs.iter().zip(vals.chunks_exact(vpn.max(1))) {
                let (g, mask) = rec.decode();
                local.insert(halo.local_index(g)?, mask, v);
            }
        }
        log::debug!(
            "[{}] boundary conditions: {} owned, {} touched",
            self.rank,
            owned_bcs.len(),
            local.len()
        );
        Ok(local)
    }
}

/// End of the run of `ext[start..]` below `bound`.
fn p_end(ext: &[usize], start: usize, bound: usize) -> usize {
    start + ext[start..].partition_point(|&g| g < bound)
}
