use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use mesh_assembler::algs::adjacency_graph::AdjacencyGraph;
use mesh_assembler::prelude::*;

/// Bilinear diffusion on a unit square, one value per node.
struct Diffusion;

const QUAD_K: [[f64; 4]; 4] = [
    [4.0, -1.0, -2.0, -1.0],
    [-1.0, 4.0, -1.0, -2.0],
    [-2.0, -1.0, 4.0, -1.0],
    [-1.0, -2.0, -1.0, 4.0],
];

impl Element for Diffusion {
    fn name(&self) -> &str {
        "diffusion"
    }
    fn num_nodes(&self) -> usize {
        4
    }
    fn num_displacements(&self) -> usize {
        1
    }
    fn add_residual(&self, _time: f64, s: &ElementState<'_>, res: &mut [f64]) {
        for i in 0..4 {
            for j in 0..4 {
                res[i] += QUAD_K[i][j] / 6.0 * s.vars[j];
            }
        }
    }
    fn add_jacobian(&self, time: f64, c: JacobianCoeffs, s: &ElementState<'_>, res: &mut [f64], mat: &mut [f64]) {
        self.add_residual(time, s, res);
        for i in 0..4 {
            for j in 0..4 {
                mat[i * 4 + j] += c.alpha * QUAD_K[i][j] / 6.0;
            }
        }
    }
    fn get_mat_type(&self, _kind: ElementMatrixType, _s: &ElementState<'_>, _mat: &mut [f64]) {}
}

fn build_grid(n: usize, threads: usize) -> Assembler<NoComm> {
    let nodes = (n + 1) * (n + 1);
    let id = |i: usize, j: usize| (j * (n + 1) + i) as i64;
    let mut conn = Vec::with_capacity(4 * n * n);
    for j in 0..n {
        for i in 0..n {
            conn.extend([id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)]);
        }
    }
    let ptr = (0..=n * n).map(|e| 4 * e).collect();
    let mut b = AssemblerBuilder::new(NoComm, 1, nodes).unwrap();
    b.set_element_connectivity(ptr, conn).unwrap();
    b.set_elements((0..n * n).map(|_| Box::new(Diffusion) as Box<dyn Element>).collect());
    b.add_bcs(&[0], &[0], None).unwrap();
    b.compute_reordering(ReorderingOptions::default()).unwrap();
    b.set_options(AssemblerOptions {
        num_threads: threads,
        ..AssemblerOptions::default()
    })
    .unwrap();
    let mut asm = b.initialize().unwrap();
    let mut q = asm.create_vec();
    for (k, v) in q.values_mut().iter_mut().enumerate() {
        *v = (k as f64).sin();
    }
    asm.set_variables(Some(&q), None, None).unwrap();
    asm
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembly");

    for &threads in &[1usize, 4] {
        let asm = build_grid(64, threads);

        group.bench_with_input(BenchmarkId::new("residual", threads), &threads, |b, _| {
            let mut res = asm.create_vec();
            b.iter(|| {
                asm.assemble_residual(&mut res).unwrap();
                black_box(res.values()[0]);
            });
        });

        group.bench_with_input(BenchmarkId::new("jacobian", threads), &threads, |b, _| {
            let mut mat = asm.create_mat().unwrap();
            b.iter(|| {
                asm.assemble_jacobian(JacobianCoeffs::STIFFNESS, None, &mut mat, MatrixOrientation::Normal)
                    .unwrap();
                black_box(&mat);
            });
        });
    }

    group.finish();
}

fn grid_graph(n: usize) -> AdjacencyGraph {
    let id = |i: usize, j: usize| j * n + i;
    let mut edges = Vec::new();
    for j in 0..n {
        for i in 0..n {
            if i + 1 < n {
                edges.push((id(i, j), id(i + 1, j)));
            }
            if j + 1 < n {
                edges.push((id(i, j), id(i, j + 1)));
            }
        }
    }
    AdjacencyGraph::from_edges(n * n, &edges)
}

fn bench_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("ordering");
    for &n in &[32usize, 64] {
        let g = grid_graph(n);
        for ordering in [
            OrderingType::ReverseCuthillMcKee,
            OrderingType::ApproximateMinimumDegree,
            OrderingType::NestedDissection,
        ] {
            group.bench_with_input(BenchmarkId::new(ordering.name(), n), &n, |b, _| {
                b.iter(|| black_box(ordering.order(&g, &[])));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_assembly, bench_ordering);
criterion_main!(benches);
