//! Misuse of the setup phase is reported, never silently accepted.

mod util;
use util::*;

use mesh_assembler::prelude::*;

fn builder(num_nodes: usize) -> AssemblerBuilder<NoComm> {
    AssemblerBuilder::new(NoComm, 1, num_nodes).unwrap()
}

fn chain_conn(b: &mut AssemblerBuilder<NoComm>, num_elements: usize) {
    let nodes = (0..num_elements as i64).flat_map(|e| [e, e + 1]).collect();
    let ptr = (0..=num_elements).map(|e| 2 * e).collect();
    b.set_element_connectivity(ptr, nodes).unwrap();
}

fn springs_n(n: usize) -> Vec<Box<dyn Element>> {
    (0..n)
        .map(|_| Box::new(Spring::new(2, 1, 1.0)) as Box<dyn Element>)
        .collect()
}

#[test]
fn missing_steps() {
    let mut b = builder(3);
    b.set_elements(springs_n(2));
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::SetupIncomplete { rank: 0, .. }));

    let mut b = builder(3);
    chain_conn(&mut b, 2);
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::SetupIncomplete { .. }));
    assert!(err.is_config_error());
}

#[test]
fn element_and_node_counts_must_agree() {
    let mut b = builder(3);
    chain_conn(&mut b, 2);
    b.set_elements(springs_n(3));
    let err = b.initialize().err().unwrap();
    assert!(matches!(
        err,
        AssemblerError::ElementCountMismatch {
            expected: 2,
            got: 3,
            ..
        }
    ));

    let mut b = builder(3);
    chain_conn(&mut b, 2);
    b.set_elements(vec![
        Box::new(Spring::new(2, 1, 1.0)) as Box<dyn Element>,
        Box::new(Spring::new(3, 1, 1.0)) as Box<dyn Element>,
    ]);
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::ConnectivityMismatch { .. }));

    let mut b = builder(3);
    chain_conn(&mut b, 2);
    b.set_elements(vec![
        Box::new(Spring::new(2, 1, 1.0)) as Box<dyn Element>,
        Box::new(Spring::new(2, 2, 1.0)) as Box<dyn Element>,
    ]);
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::VarsPerNodeMismatch { elem: 1, .. }));
}

#[test]
fn bad_node_references() {
    let mut b = builder(3);
    b.set_element_connectivity(vec![0, 2], vec![1, 3]).unwrap();
    b.set_elements(springs_n(1));
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::NodeOutOfRange { node: 3, num_nodes: 3, .. }));

    let mut b = builder(3);
    b.set_element_connectivity(vec![0, 2], vec![1, dependent_node(0)])
        .unwrap();
    b.set_elements(springs_n(1));
    let err = b.initialize().err().unwrap();
    assert!(matches!(err, AssemblerError::DependentNodeOutOfRange { num_dep: 0, .. }));

    let mut b = builder(3);
    let err = b
        .set_dependent_nodes(vec![0, 2], vec![0, dependent_node(1)], vec![0.5, 0.5])
        .unwrap_err();
    assert!(matches!(err, AssemblerError::ChainedDependentNode { dep: 0, .. }));
    let err = b
        .set_dependent_nodes(vec![0, 2], vec![0, 1], vec![1.0])
        .unwrap_err();
    assert!(matches!(err, AssemblerError::ConnectivityMismatch { .. }));

    let err = b
        .set_element_connectivity(vec![0, 3], vec![0, 1])
        .unwrap_err();
    assert!(matches!(err, AssemblerError::ConnectivityMismatch { .. }));
}

#[test]
fn reordering_is_one_shot_and_freezes_the_mesh() {
    let mut b = builder(4);
    chain_conn(&mut b, 3);
    b.compute_reordering(ReorderingOptions::default()).unwrap();

    let err = b
        .compute_reordering(ReorderingOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        AssemblerError::SetupOrder {
            op: "compute_reordering",
            ..
        }
    ));
    let err = b.set_element_connectivity(vec![0], vec![]).unwrap_err();
    assert!(matches!(err, AssemblerError::SetupOrder { .. }));
    let err = b
        .set_dependent_nodes(vec![0], vec![], vec![])
        .unwrap_err();
    assert!(matches!(err, AssemblerError::SetupOrder { .. }));
    let err = b.add_bcs(&[0], &[0], None).unwrap_err();
    assert!(matches!(err, AssemblerError::SetupOrder { op: "add_bcs", .. }));

    // The builder is still usable.
    b.set_elements(springs_n(3));
    let asm = b.initialize().unwrap();
    assert_permutation(&asm.reordering(), &[0, 1, 2, 3]);
}

#[test]
fn reordering_needs_connectivity() {
    let mut b = builder(4);
    let err = b
        .compute_reordering(ReorderingOptions::default())
        .unwrap_err();
    assert!(matches!(err, AssemblerError::SetupIncomplete { .. }));
}

#[test]
fn invalid_options() {
    assert!(AssemblerBuilder::new(NoComm, 0, 3).is_err());
    assert!(AssemblerBuilder::new(NoComm, 33, 3).is_err());
    let mut b = builder(3);
    let err = b
        .set_options(AssemblerOptions {
            num_threads: 2,
            chunk_size: 0,
        })
        .unwrap_err();
    assert!(matches!(err, AssemblerError::InvalidOption(_)));
}

#[test]
fn errors_carry_the_rank_that_found_them() {
    let msgs = run_ranks(2, |comm| {
        let mut b = AssemblerBuilder::new(comm, 1, 2).unwrap();
        let nodes = if b.rank() == 1 { vec![2, 7] } else { vec![0, 9] };
        b.set_element_connectivity(vec![0, 2], nodes).unwrap();
        b.set_elements(springs_n(1));
        // Both ranks fail before any communication.
        b.initialize().err().unwrap().to_string()
    });
    assert!(msgs[0].starts_with("[0]"), "{}", msgs[0]);
    assert!(msgs[1].starts_with("[1]"), "{}", msgs[1]);
}
