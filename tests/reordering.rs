//! Global renumbering and local block orderings.

mod util;
use util::*;

use std::collections::{BTreeMap, BTreeSet};

use mesh_assembler::algs::adjacency_graph::AdjacencyGraph;
use mesh_assembler::algs::ordering::amd::symbolic_fill;
use mesh_assembler::algs::reorder::{GlobalMesh, compute_reordering};
use mesh_assembler::data::constraints::ConstraintGraph;
use mesh_assembler::prelude::*;
use mesh_assembler::topology::connectivity::ElementConnectivity;
use mesh_assembler::topology::halo::HaloIndex;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

const BACKENDS: [OrderingType; 5] = [
    OrderingType::Natural,
    OrderingType::ReverseCuthillMcKee,
    OrderingType::ApproximateMinimumDegree,
    OrderingType::NestedDissection,
    OrderingType::CouplingAwareMinimumDegree,
];

fn grid_graph(nx: usize, ny: usize) -> AdjacencyGraph {
    let id = |i: usize, j: usize| j * nx + i;
    let mut edges = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            if i + 1 < nx {
                edges.push((id(i, j), id(i + 1, j)));
            }
            if j + 1 < ny {
                edges.push((id(i, j), id(i, j + 1)));
            }
        }
    }
    AdjacencyGraph::from_edges(nx * ny, &edges)
}

#[test]
fn every_backend_is_a_bijection_that_round_trips() {
    let g = grid_graph(7, 6);
    let all: Vec<usize> = (0..g.num_vertices()).collect();
    for b in BACKENDS {
        let p = b.order(&g, &[]);
        assert_permutation(p.perm(), &all);
        p.validate_invariants().unwrap();
        let back = p.inverse().apply_to_graph(&p.apply_to_graph(&g));
        assert_eq!(back, g, "{} does not round-trip", b.name());
    }
}

#[test]
fn minimum_degree_beats_a_random_ordering() {
    let g = grid_graph(12, 12);
    let mut shuffled: Vec<usize> = (0..g.num_vertices()).collect();
    shuffled.shuffle(&mut SmallRng::seed_from_u64(7));
    let random = symbolic_fill(&g, &Permutation::from_vec(shuffled).unwrap());
    let amd = symbolic_fill(&g, &OrderingType::ApproximateMinimumDegree.order(&g, &[]));
    assert!(amd < random, "{amd} >= {random}");
}

#[test]
fn coupling_aware_ordering_keeps_coupling_last() {
    let g = grid_graph(6, 6);
    let coupling = vec![3, 10, 17, 35];
    let p = OrderingType::CouplingAwareMinimumDegree.order(&g, &coupling);
    let tail: BTreeSet<usize> = p.perm()[g.num_vertices() - coupling.len()..]
        .iter()
        .copied()
        .collect();
    assert_eq!(tail, coupling.into_iter().collect());
}

/// Owned nodes that end up in the trailing block, computed from the global
/// element lists in the original numbering.
fn expected_trailing(nx: usize, ny: usize, size: usize, rank: usize, mode: MatrixOrdering) -> BTreeSet<usize> {
    let meshes: Vec<LocalMesh> = (0..size).map(|r| grid(nx, ny, size, r)).collect();
    let me = &meshes[rank];
    let owned = me.owned_start..me.owned_start + me.num_owned;
    let foreign: BTreeSet<usize> = meshes
        .iter()
        .enumerate()
        .filter(|&(r, _)| r != rank)
        .flat_map(|(_, m)| m.conn.iter().map(|&g| g as usize))
        .collect();
    let owned_coupling: BTreeSet<usize> = owned.clone().filter(|g| foreign.contains(g)).collect();
    let mut coupling: BTreeSet<usize> = me
        .conn
        .iter()
        .map(|&g| g as usize)
        .filter(|g| !owned.contains(g))
        .collect();
    coupling.extend(owned_coupling.iter().copied());
    match mode {
        MatrixOrdering::AdditiveSchwarz => BTreeSet::new(),
        MatrixOrdering::DirectSchur => owned_coupling,
        MatrixOrdering::ApproximateSchur => {
            let mut widened = owned_coupling;
            for e in me.conn.chunks(4) {
                if e.iter().any(|&g| coupling.contains(&(g as usize))) {
                    widened.extend(e.iter().map(|&g| g as usize).filter(|g| owned.contains(g)));
                }
            }
            widened
        }
    }
}

#[test]
fn schur_modes_put_coupling_nodes_last() {
    let (nx, ny, size) = (6, 5, 3);
    for mode in [
        MatrixOrdering::AdditiveSchwarz,
        MatrixOrdering::DirectSchur,
        MatrixOrdering::ApproximateSchur,
    ] {
        run_ranks(size, |comm| {
            let rank = comm.rank();
            let mesh = grid(nx, ny, size, rank);
            let ownership = OwnershipMap::new(&comm, mesh.num_owned).unwrap();
            let global = GlobalMesh {
                conn: ElementConnectivity::new(rank, mesh.ptr.clone(), mesh.conn.clone()).unwrap(),
                constraints: ConstraintGraph::empty(),
                bcs: BcMap::new(1).unwrap(),
            };
            let r = compute_reordering(&comm, &ownership, &global, &OrderingType::ReverseCuthillMcKee, mode)
                .unwrap();

            let start = mesh.owned_start;
            let owned: Vec<usize> = (start..start + mesh.num_owned).collect();
            assert_permutation(&r.owned_new_numbers, &owned);

            let trailing = expected_trailing(nx, ny, size, rank, mode);
            assert_eq!(r.num_leading, mesh.num_owned - trailing.len(), "rank {rank} {mode:?}");
            for &g in &owned {
                let new = r.owned_new_numbers[g - start];
                assert_eq!(
                    new >= start + r.num_leading,
                    trailing.contains(&g),
                    "rank {rank} {mode:?}: node {g} -> {new}"
                );
            }
            // Ghost slots carry the owners' new numbers.
            assert!(r.new_node_nums.iter().all(|&n| n < ownership.num_nodes()));
            // The rewritten mesh still references every ghost it held.
            let halo = HaloIndex::from_mesh(&ownership, &r.mesh.conn, &r.mesh.constraints);
            halo.validate_invariants().unwrap();
            assert_eq!(halo.num_local(), r.new_node_nums.len());
        });
    }
}

type Snapshot = (Vec<usize>, Vec<f64>, BTreeMap<(usize, usize), Vec<f64>>);

fn assemble(comm: RayonComm, reorder: Option<ReorderingOptions>) -> Snapshot {
    let mesh = grid(5, 4, comm.size(), comm.rank());
    let mut asm = build(comm, &mesh, 2, springs(&mesh, 2, 1.0), |b| {
        if b.ownership().is_owned(0) {
            b.add_bcs(&[0], &[0, 1], Some(&[1.0, -1.0][..])).unwrap();
        }
        if let Some(opts) = reorder {
            b.compute_reordering(opts).unwrap();
        }
    });
    let mut q = owned_field(&asm, field);
    asm.reorder_vec(&mut q).unwrap();
    asm.set_variables(Some(&q), None, None).unwrap();
    let mut res = asm.create_vec();
    let mut mat = asm.create_mat().unwrap();
    asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, Some(&mut res), &mut mat, MatrixOrientation::Normal)
        .unwrap();
    (asm.reordering(), res.values().to_vec(), mat_entries(&mat))
}

fn on_ranks(size: usize, reorder: Option<ReorderingOptions>) -> Snapshot {
    let mut new_of_old = Vec::new();
    let mut res = Vec::new();
    let mut mats = Vec::new();
    for (n, r, m) in run_ranks(size, |comm| assemble(comm, reorder)) {
        new_of_old.extend(n);
        res.push(r);
        mats.push(m);
    }
    (new_of_old, concat(res), merge_entries(mats))
}

#[test]
fn reordered_assembly_is_a_renumbering() {
    for size in [1, 2, 3] {
        let (identity, res0, mat0) = on_ranks(size, None);
        assert_eq!(identity, (0..identity.len()).collect::<Vec<_>>());
        for matrix in [MatrixOrdering::AdditiveSchwarz, MatrixOrdering::ApproximateSchur] {
            let opts = ReorderingOptions {
                ordering: OrderingType::ApproximateMinimumDegree,
                matrix,
            };
            let (new_of_old, res, mat) = on_ranks(size, Some(opts));
            assert_permutation(&new_of_old, &identity);
            for (old, &new) in new_of_old.iter().enumerate() {
                assert_close(&res[2 * new..2 * new + 2], &res0[2 * old..2 * old + 2], 1e-12);
            }
            let renamed = mat0
                .iter()
                .map(|(&(r, c), v)| ((new_of_old[r], new_of_old[c]), v.clone()))
                .collect();
            assert_mats_close(&mat, &renamed, 1e-12);
        }
    }
}

#[test]
fn block_matrix_splits_interior_and_coupling() {
    let parts = run_ranks(2, |comm| {
        let mesh = grid(4, 4, 2, comm.rank());
        let asm = build(comm, &mesh, 1, springs(&mesh, 1, 1.0), |_| {});
        let mut full = asm.create_mat().unwrap();
        asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut full, MatrixOrientation::Normal)
            .unwrap();

        for ordering in [OrderingType::Natural, OrderingType::NestedDissection] {
            // The first call fixes the ordering; later ones reuse it.
            let mut block = asm.create_reordered_mat(ordering).unwrap();
            asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut block, MatrixOrientation::Normal)
                .unwrap();
            let ord = block.ordering().clone();
            let coupling: BTreeSet<usize> = asm.coupling_nodes().iter().copied().collect();
            let tail: BTreeSet<usize> = ord.perm.perm()[ord.num_interior..].iter().copied().collect();
            assert_eq!(tail, coupling);
            assert_eq!(block.num_coupling(), coupling.len());
            assert_eq!(block.b().num_rows(), ord.num_interior);
            assert_eq!(block.c().num_rows(), coupling.len());

            // Interior rows are complete on this rank.
            for &i in &ord.perm.perm()[..ord.num_interior] {
                let gi = asm.global_node_index(i).unwrap();
                for &gj in full.row_pattern(gi).unwrap() {
                    let j = asm.local_node_index(gj as i64).unwrap();
                    assert_eq!(block.get_block(i, j), full.get_block(gi, gj));
                }
            }
        }
        let first = asm.create_reordered_mat(OrderingType::Natural).unwrap();
        let again = asm.create_reordered_mat(OrderingType::ReverseCuthillMcKee).unwrap();
        first.ordering() == again.ordering()
    });
    assert!(parts.into_iter().all(|same| same));
}
