//! Renumbering of the global node ids for fill-reducing factorization.
//!
//! Each rank orders the nodes it owns and keeps them inside its own owner
//! range, so the [`OwnershipMap`] is unchanged. With one rank every node is
//! ordered at once. With several ranks the owned nodes are split in two
//! blocks which are ordered separately, the first block numbered first:
//!
//! | mode                                     | trailing block                                 |
//! |------------------------------------------|------------------------------------------------|
//! | [`MatrixOrdering::AdditiveSchwarz`]  | empty                                          |
//! | [`MatrixOrdering::DirectSchur`]      | owned coupling nodes                           |
//! | [`MatrixOrdering::ApproximateSchur`] | owned coupling nodes and all of their neighbors |
//!
//! The owners then send the new numbers of shared nodes to every rank that
//! holds them as ghosts, and element connectivity, dependent nodes and
//! boundary conditions are rewritten in the new numbering. The external list
//! is rebuilt from the rewritten mesh.

use crate::algs::adjacency_graph::{NodeAdjacencyOpts, node_to_node, node_to_node_reduced};
use crate::algs::collective::all_to_all_v;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::coupling::widen_coupling;
use crate::algs::distributor::HaloDistributor;
use crate::algs::ordering::{MatrixOrdering, OrderingBackend, OrderingType, Permutation};
use crate::algs::wire::WireRenumber;
use crate::data::bc::BcMap;
use crate::data::constraints::ConstraintGraph;
use crate::mesh_error::AssemblerError;
use crate::topology::connectivity::ElementConnectivity;
use crate::topology::halo::HaloIndex;
use crate::topology::ownership::OwnershipMap;

/// Mesh description in global node ids.
#[derive(Clone, Debug)]
pub struct GlobalMesh {
    pub conn: ElementConnectivity,
    pub constraints: ConstraintGraph,
    pub bcs: BcMap,
}

/// Result of [`compute_reordering`].
#[derive(Clone, Debug)]
pub struct Reordering {
    /// New global id of every local node, indexed by the *old* local index.
    pub new_node_nums: Vec<usize>,
    /// Old global id → new global id for the owned nodes, by owned offset.
    pub owned_new_numbers: Vec<usize>,
    /// Number of owned nodes in the leading block.
    pub num_leading: usize,
    /// The mesh rewritten in the new numbering.
    pub mesh: GlobalMesh,
}

/// Collective: compute and apply a reordering of the owned nodes.
pub fn compute_reordering<C: Communicator + ?Sized>(
    comm: &C,
    ownership: &OwnershipMap,
    mesh: &GlobalMesh,
    backend: &dyn OrderingBackend,
    mode: MatrixOrdering,
) -> Result<Reordering, AssemblerError> {
    let rank = comm.rank();
    let halo = HaloIndex::from_mesh(ownership, &mesh.conn, &mesh.constraints);
    let dist = HaloDistributor::new(comm, ownership, &halo)?;
    let conn = mesh.conn.try_map_independent(|g| halo.local_index(g))?;
    let deps = mesh.constraints.try_map_parents(|g| halo.local_index(g))?;
    let n = halo.num_local();
    let start = ownership.owned_range().start;
    let no_diag = NodeAdjacencyOpts { no_diagonal: true };

    let mut new_node_nums = vec![usize::MAX; n];
    let num_leading;
    if comm.size() == 1 {
        let graph = node_to_node(n, &conn, &deps, no_diag);
        let perm = backend.order(&graph, &[]);
        for (old, slot) in new_node_nums.iter_mut().enumerate() {
            *slot = start + perm.target_index(old);
        }
        num_leading = n;
    } else {
        let coupling = dist.coupling_nodes();
        let owned = halo.owned_local_range();
        let excluded: Vec<bool> = match mode {
            MatrixOrdering::AdditiveSchwarz => vec![false; n],
            MatrixOrdering::DirectSchur => {
                let mut m = vec![false; n];
                coupling.iter().for_each(|&c| m[c] = true);
                m
            }
            MatrixOrdering::ApproximateSchur => {
                let full = node_to_node(n, &conn, &deps, NodeAdjacencyOpts::default());
                widen_coupling(&full, &coupling)
            }
        };

        // Leading block: owned, not excluded.
        let (map, count) = subset(n, |i| owned.contains(&i) && !excluded[i]);
        let graph = node_to_node_reduced(&map, count, &conn, &deps, no_diag);
        let perm = backend.order(&graph, &[]);
        for (i, r) in map.iter().enumerate() {
            if let Some(r) = *r {
                new_node_nums[i] = start + perm.target_index(r);
            }
        }
        num_leading = count;

        // Trailing block: the owned nodes left over.
        let (map, count) = subset(n, |i| owned.contains(&i) && excluded[i]);
        if count > 0 {
            if mode == MatrixOrdering::AdditiveSchwarz {
                log::error!("[{rank}] additive Schwarz reordering left {count} nodes unordered");
            }
            let graph = node_to_node_reduced(&map, count, &conn, &deps, no_diag);
            let perm = backend.order(&graph, &[]);
            for (i, r) in map.iter().enumerate() {
                if let Some(r) = *r {
                    new_node_nums[i] = start + num_leading + perm.target_index(r);
                }
            }
        }
    }

    exchange_new_numbers(comm, &halo, &dist, &mut new_node_nums)?;

    let local_new = |g: usize| -> Result<usize, AssemblerError> {
        Ok(new_node_nums[halo.local_index(g)?])
    };
    let mesh = GlobalMesh {
        conn: mesh.conn.try_map_independent(local_new)?,
        constraints: mesh.constraints.try_map_parents(local_new)?,
        bcs: mesh.bcs.try_map_nodes(local_new)?,
    };
    let owned_new_numbers = new_node_nums[halo.owned_local_range()].to_vec();

    log::info!(
        "[{rank}] reordered {} owned nodes with {} ({} leading, {} trailing)",
        halo.num_owned(),
        backend.name(),
        num_leading.min(halo.num_owned()),
        halo.num_owned().saturating_sub(num_leading)
    );
    Ok(Reordering {
        new_node_nums,
        owned_new_numbers,
        num_leading,
        mesh,
    })
}

/// Local node order of a Schur-complement matrix: interior nodes first,
/// coupling nodes last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockOrdering {
    /// New position → local index.
    pub perm: Permutation,
    /// Number of leading (interior) positions.
    pub num_interior: usize,
}

impl BlockOrdering {
    pub fn num_coupling(&self) -> usize {
        self.perm.len() - self.num_interior
    }
}

/// Order the local nodes of this rank for a Schur-complement matrix.
///
/// With [`OrderingType::CouplingAwareMinimumDegree`] all local nodes are
/// ordered at once with the coupling nodes pinned to the end. Any other back
/// end orders the interior set and the coupling set separately. The natural
/// ordering cannot separate the two sets and falls back to the coupling-aware
/// one.
pub fn compute_block_ordering(
    rank: usize,
    num_local: usize,
    conn: &ElementConnectivity,
    deps: &ConstraintGraph,
    coupling: &[usize],
    ordering: OrderingType,
) -> Result<BlockOrdering, AssemblerError> {
    let ordering = if ordering == OrderingType::Natural {
        log::warn!("[{rank}] natural ordering not supported for a block matrix, using coupling-aware minimum degree");
        OrderingType::CouplingAwareMinimumDegree
    } else {
        ordering
    };
    let no_diag = NodeAdjacencyOpts { no_diagonal: true };
    let mut is_coupling = vec![false; num_local];
    coupling.iter().for_each(|&c| is_coupling[c] = true);
    let num_interior = num_local - coupling.len();

    let order = if ordering == OrderingType::CouplingAwareMinimumDegree {
        let graph = node_to_node(num_local, conn, deps, no_diag);
        ordering.order(&graph, coupling).perm().to_vec()
    } else {
        let mut order = Vec::with_capacity(num_local);
        for want in [false, true] {
            let (map, count) = subset(num_local, |i| is_coupling[i] == want);
            let members: Vec<usize> = (0..num_local).filter(|&i| is_coupling[i] == want).collect();
            let graph = node_to_node_reduced(&map, count, conn, deps, no_diag);
            let perm = ordering.order(&graph, &[]);
            order.extend(perm.perm().iter().map(|&k| members[k]));
        }
        order
    };
    let perm = Permutation::from_vec(order)?;
    if perm.perm()[num_interior..].iter().any(|&l| !is_coupling[l]) {
        return Err(AssemblerError::InvalidPermutation(format!(
            "[{rank}] {} left an interior node in the coupling block",
            ordering.name()
        )));
    }
    log::debug!(
        "[{rank}] block ordering with {}: {num_interior} interior, {} coupling",
        ordering.name(),
        coupling.len()
    );
    Ok(BlockOrdering { perm, num_interior })
}

/// Compact indices of the local nodes selected by `keep`.
fn subset(n: usize, keep: impl Fn(usize) -> bool) -> (Vec<Option<usize>>, usize) {
    let mut count = 0;
    let map = (0..n)
        .map(|i| {
            keep(i).then(|| {
                count += 1;
                count - 1
            })
        })
        .collect();
    (map, count)
}

/// Owners send `(old, new)` for every node another rank holds as a ghost;
/// the ghost slots of `new_node_nums` are filled from the replies.
fn exchange_new_numbers<C: Communicator + ?Sized>(
    comm: &C,
    halo: &HaloIndex,
    dist: &HaloDistributor,
    new_node_nums: &mut [usize],
) -> Result<(), AssemblerError> {
    let off = halo.ext_offset();
    let start = halo.owned_range().start;
    let sends: Vec<Vec<WireRenumber>> = (0..comm.size())
        .map(|p| {
            dist.requested(p)
                .iter()
                .map(|&o| WireRenumber::new(start + o, new_node_nums[o + off]))
                .collect()
        })
        .collect();
    let recvd = all_to_all_v(comm, tags::REORDER, &sends)?;
    let ext = halo.ext_nodes();
    for (p, recs) in recvd.iter().enumerate() {
        let range = dist.ext_by_owner()[p].clone();
        if recs.len() != range.len() {
            return Err(AssemblerError::BufferSizeMismatch {
                neighbor: p,
                expected: range.len() * size_of::<WireRenumber>(),
                got: recs.len() * size_of::<WireRenumber>(),
            });
        }
        for (rec, i) in recs.iter().zip(range) {
            if rec.old() != ext[i] {
                return Err(AssemblerError::ExternalNodeMissing {
                    rank: comm.rank(),
                    node: rec.old(),
                });
            }
            new_node_nums[halo.ext_local(i)] = rec.new_id();
        }
    }
    Ok(())
}
