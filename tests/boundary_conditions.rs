//! Dirichlet conditions on vectors and matrices, including constrained nodes
//! that other ranks hold as ghosts.

mod util;
use util::*;

use mesh_assembler::prelude::*;

#[test]
fn ghost_constraints_zero_columns_on_every_rank() {
    // 7 nodes over 3 ranks: [0, 3) [3, 5) [5, 7). Node 2 is owned by rank 0
    // and a ghost of rank 1.
    let parts = run_ranks(3, |comm| {
        let rank = comm.rank();
        let mesh = chain(7, 3, rank);
        let asm = build(comm, &mesh, 1, springs(&mesh, 1, 1.0), |b| {
            if b.rank() == 0 {
                b.add_bcs(&[2], &[0], Some(&[0.25][..])).unwrap();
            }
        });
        let local_constrained: Vec<usize> = asm
            .local_bcs()
            .iter()
            .map(|(l, _)| asm.global_node_index(l).unwrap())
            .collect();
        let mut mat = asm.create_mat().unwrap();
        asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut mat, MatrixOrientation::Normal)
            .unwrap();
        (local_constrained, mat_entries(&mat))
    });
    assert_eq!(parts[0].0, vec![2]);
    assert_eq!(parts[1].0, vec![2]);
    assert!(parts[2].0.is_empty());

    let mat = merge_entries(parts.into_iter().map(|p| p.1).collect());
    assert_eq!(mat[&(2, 2)], vec![1.0]);
    assert_eq!(mat[&(2, 1)], vec![0.0]);
    assert_eq!(mat[&(2, 3)], vec![0.0]);
    assert_eq!(mat[&(1, 2)], vec![0.0]);
    assert_eq!(mat[&(3, 2)], vec![0.0]);
    assert_eq!(mat[&(3, 3)], vec![2.0]);
}

#[test]
fn applying_constraints_twice_changes_nothing() {
    let parts = run_ranks(2, |comm| {
        let mesh = grid(3, 3, 2, comm.rank());
        let asm = build(comm, &mesh, 2, springs(&mesh, 2, 1.0), |b| {
            let owned: Vec<i64> = b.ownership().owned_range().map(|g| g as i64).collect();
            let picks: Vec<i64> = owned.into_iter().filter(|g| g % 3 == 0).collect();
            b.add_bcs(&picks, &[0], None).unwrap();
        });
        let mut mat = asm.create_mat().unwrap();
        asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut mat, MatrixOrientation::Normal)
            .unwrap();
        let once = mat_entries(&mat);
        mat.apply_bcs(asm.local_bcs());
        (once, mat_entries(&mat))
    });
    for (once, twice) in parts {
        assert_eq!(once, twice);
    }
}

#[test]
fn residual_and_vectors_honour_constraints() {
    let mesh = chain(4, 1, 0);
    let mut asm = build(NoComm, &mesh, 2, springs(&mesh, 2, 1.0), |b| {
        b.add_bcs(&[3], &[1], Some(&[2.0][..])).unwrap();
        b.add_bcs(&[0], &[0, 1], None).unwrap();
    });
    assert_eq!(asm.bcs().len(), 2);
    assert!(asm.bcs().is_constrained(3, 1));
    assert!(!asm.bcs().is_constrained(3, 0));

    let q = owned_field(&asm, |_, _| 1.5);
    asm.set_variables(Some(&q), None, None).unwrap();
    let mut res = asm.create_vec();
    asm.assemble_residual(&mut res).unwrap();
    assert_eq!(res.node(3).unwrap()[1], 1.5 - 2.0);
    assert_eq!(res.node(0).unwrap(), &[1.5, 1.5]);
    // Uniform displacement: no spring force.
    assert_eq!(res.node(1).unwrap(), &[0.0, 0.0]);

    let mut v = owned_field(&asm, |_, _| 7.0);
    asm.apply_bcs(&mut v);
    assert_eq!(v.node(0).unwrap(), &[0.0, 0.0]);
    assert_eq!(v.node(3).unwrap(), &[7.0, 0.0]);
    assert_eq!(v.node(2).unwrap(), &[7.0, 7.0]);
}

#[test]
fn jacobian_vector_product_zeroes_constrained_rows() {
    let mesh = chain(3, 1, 0);
    let asm = build(NoComm, &mesh, 1, springs(&mesh, 1, 1.0), |b| {
        b.add_bcs(&[1], &[0], None).unwrap();
    });
    let x = owned_field(&asm, |g, _| g as f64);
    let mut y = asm.create_vec();
    asm.add_jacobian_vec_product(1.0, JacobianCoeffs::STIFFNESS, &x, &mut y, MatrixOrientation::Normal)
        .unwrap();
    assert_eq!(y.values(), &[-1.0, 0.0, 1.0]);
}

#[test]
fn bcs_on_foreign_nodes_are_rejected() {
    let errs = run_ranks(2, |comm| {
        let mut b = AssemblerBuilder::new(comm, 1, 2).unwrap();
        let foreign = if b.rank() == 0 { 3 } else { 0 };
        let err = b.add_bcs(&[1, foreign], &[0], None).unwrap_err();
        let range = b.add_bcs(&[9], &[0], None).unwrap_err();
        let first = b.ownership().owned_range().start as i64;
        let dof = b.add_bcs(&[first], &[1], None).unwrap_err();
        (
            matches!(err, AssemblerError::InvalidOption(_)),
            matches!(range, AssemblerError::NodeOutOfRange { node: 9, .. }),
            matches!(dof, AssemblerError::InvalidOption(_)),
        )
    });
    assert!(errs.iter().all(|&(a, b, c)| a && b && c));
}

#[test]
fn schur_matrix_constrains_only_owned_rows() {
    let parts = run_ranks(2, |comm| {
        let mesh = chain(6, 2, comm.rank());
        let asm = build(comm, &mesh, 1, springs(&mesh, 1, 1.0), |b| {
            if b.rank() == 0 {
                b.add_bcs(&[2], &[0], None).unwrap();
            }
        });
        let mut mat = asm.create_reordered_mat(OrderingType::ReverseCuthillMcKee).unwrap();
        asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut mat, MatrixOrientation::Normal)
            .unwrap();
        let l2 = asm.local_node_index(2).unwrap();
        let diag = mat.get_block(l2, l2).unwrap().to_vec();
        (asm.halo().is_owned_local(l2), diag)
    });
    // Owned by rank 0: identity row. Ghost on rank 1: zeroed.
    assert_eq!(parts[0], (true, vec![1.0]));
    assert_eq!(parts[1], (false, vec![0.0]));
}
