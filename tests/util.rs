#![allow(dead_code)]
use std::collections::BTreeMap;

use mesh_assembler::prelude::*;

/// Run `f` on `n` in-process ranks, one thread each; results in rank order.
pub fn run_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = RayonComm::group(n)
            .into_iter()
            .map(|c| s.spawn(move || f(c)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Owned node counts of `num_nodes` nodes split over `size` ranks.
pub fn split(num_nodes: usize, size: usize) -> Vec<usize> {
    (0..size)
        .map(|r| num_nodes / size + usize::from(r < num_nodes % size))
        .collect()
}

/// The part of a global mesh one rank sees.
#[derive(Clone, Debug)]
pub struct LocalMesh {
    pub num_owned: usize,
    pub owned_start: usize,
    pub ptr: Vec<usize>,
    pub conn: Vec<i64>,
    /// `xyz` of every owned node.
    pub coords: Vec<f64>,
}

impl LocalMesh {
    pub fn num_elements(&self) -> usize {
        self.ptr.len() - 1
    }

    fn from_elements(
        counts: &[usize],
        rank: usize,
        elems: Vec<Vec<usize>>,
        coord: impl Fn(usize) -> [f64; 3],
    ) -> Self {
        let owned_start: usize = counts[..rank].iter().sum();
        let owned_end = owned_start + counts[rank];
        let mut ptr = vec![0];
        let mut conn = Vec::new();
        for e in elems {
            // An element belongs to the owner of its largest node.
            let top = *e.iter().max().unwrap();
            if (owned_start..owned_end).contains(&top) {
                conn.extend(e.iter().map(|&g| g as i64));
                ptr.push(conn.len());
            }
        }
        let coords = (owned_start..owned_end).flat_map(&coord).collect();
        Self {
            num_owned: counts[rank],
            owned_start,
            ptr,
            conn,
            coords,
        }
    }
}

/// A 1D chain of `num_nodes` nodes and `num_nodes - 1` two-node elements,
/// with node `g` at `x = g`.
pub fn chain(num_nodes: usize, size: usize, rank: usize) -> LocalMesh {
    let elems = (0..num_nodes - 1).map(|e| vec![e, e + 1]).collect();
    LocalMesh::from_elements(&split(num_nodes, size), rank, elems, |g| [g as f64, 0.0, 0.0])
}

/// An `nx` by `ny` grid of four-node quads, nodes numbered row by row.
pub fn grid(nx: usize, ny: usize, size: usize, rank: usize) -> LocalMesh {
    let id = |i: usize, j: usize| j * (nx + 1) + i;
    let elems = (0..ny)
        .flat_map(|j| (0..nx).map(move |i| (i, j)))
        .map(|(i, j)| vec![id(i, j), id(i + 1, j), id(i + 1, j + 1), id(i, j + 1)])
        .collect();
    LocalMesh::from_elements(&split((nx + 1) * (ny + 1), size), rank, elems, |g| {
        [(g % (nx + 1)) as f64, (g / (nx + 1)) as f64, 0.0]
    })
}

/// Linear spring between every pair of its nodes, with a lumped-plus-consistent
/// mass. Each displacement component is independent.
#[derive(Clone, Debug)]
pub struct Spring {
    pub nodes: usize,
    pub vpn: usize,
    pub k: f64,
    pub m: f64,
    dv: Vec<usize>,
}

impl Spring {
    pub fn new(nodes: usize, vpn: usize, k: f64) -> Self {
        Self {
            nodes,
            vpn,
            k,
            m: 1.0,
            dv: Vec::new(),
        }
    }

    /// Make the stiffness design variable `dv`.
    pub fn with_design_var(mut self, dv: usize) -> Self {
        self.dv = vec![dv];
        self
    }

    fn stiff(&self, i: usize, j: usize) -> f64 {
        let (a, di, b, dj) = (i / self.vpn, i % self.vpn, j / self.vpn, j % self.vpn);
        if di != dj {
            0.0
        } else if a == b {
            self.k * (self.nodes - 1) as f64
        } else {
            -self.k
        }
    }

    fn mass(&self, i: usize, j: usize) -> f64 {
        let (a, di, b, dj) = (i / self.vpn, i % self.vpn, j / self.vpn, j % self.vpn);
        if di != dj {
            0.0
        } else if a == b {
            2.0 * self.m / (self.nodes + 1) as f64
        } else {
            self.m / (self.nodes + 1) as f64
        }
    }

    fn n(&self) -> usize {
        self.nodes * self.vpn
    }
}

impl Element for Spring {
    fn name(&self) -> &str {
        "spring"
    }
    fn num_nodes(&self) -> usize {
        self.nodes
    }
    fn num_displacements(&self) -> usize {
        self.vpn
    }
    fn add_residual(&self, _time: f64, s: &ElementState<'_>, res: &mut [f64]) {
        let n = self.n();
        for i in 0..n {
            for j in 0..n {
                res[i] += self.stiff(i, j) * s.vars[j] + self.mass(i, j) * s.ddvars[j];
            }
        }
    }
    fn add_jacobian(&self, time: f64, c: JacobianCoeffs, s: &ElementState<'_>, res: &mut [f64], mat: &mut [f64]) {
        self.add_residual(time, s, res);
        let n = self.n();
        for i in 0..n {
            for j in 0..n {
                mat[i * n + j] += c.alpha * self.stiff(i, j) + c.gamma * self.mass(i, j);
            }
        }
    }
    fn get_mat_type(&self, kind: ElementMatrixType, _s: &ElementState<'_>, mat: &mut [f64]) {
        let n = self.n();
        for i in 0..n {
            for j in 0..n {
                mat[i * n + j] += match kind {
                    ElementMatrixType::Stiffness => self.stiff(i, j),
                    ElementMatrixType::Mass => self.mass(i, j),
                    ElementMatrixType::GeometricStiffness => 0.0,
                };
            }
        }
    }
    fn compute_energies(&self, _time: f64, s: &ElementState<'_>) -> (f64, f64) {
        let n = self.n();
        let (mut t, mut u) = (0.0, 0.0);
        for i in 0..n {
            for j in 0..n {
                t += 0.5 * s.dvars[i] * self.mass(i, j) * s.dvars[j];
                u += 0.5 * s.vars[i] * self.stiff(i, j) * s.vars[j];
            }
        }
        (t, u)
    }
    fn get_init_conditions(&self, xpts: &[f64], vars: &mut [f64], dvars: &mut [f64], _ddvars: &mut [f64]) {
        for a in 0..self.nodes {
            for d in 0..self.vpn {
                vars[a * self.vpn + d] = xpts[3 * a];
                dvars[a * self.vpn + d] = 1.0;
            }
        }
    }
    fn design_var_nums(&self) -> &[usize] {
        &self.dv
    }
    fn get_design_vars(&self, dvs: &mut [f64]) {
        for &d in &self.dv {
            dvs[d] = self.k;
        }
    }
    fn set_design_vars(&mut self, dvs: &[f64]) {
        if let Some(&d) = self.dv.first() {
            self.k = dvs[d];
        }
    }
    fn get_design_var_range(&self, lower: &mut [f64], upper: &mut [f64]) {
        for &d in &self.dv {
            lower[d] = 0.5;
            upper[d] = 5.0;
        }
    }
}

/// Residual of `1.0` on every variable; identity Jacobian.
#[derive(Clone, Debug)]
pub struct UnitLoad {
    pub nodes: usize,
    pub vpn: usize,
}

impl Element for UnitLoad {
    fn name(&self) -> &str {
        "unit-load"
    }
    fn num_nodes(&self) -> usize {
        self.nodes
    }
    fn num_displacements(&self) -> usize {
        self.vpn
    }
    fn add_residual(&self, _time: f64, _s: &ElementState<'_>, res: &mut [f64]) {
        res.iter_mut().for_each(|r| *r += 1.0);
    }
    fn add_jacobian(&self, time: f64, c: JacobianCoeffs, s: &ElementState<'_>, res: &mut [f64], mat: &mut [f64]) {
        self.add_residual(time, s, res);
        let n = res.len();
        for i in 0..n {
            mat[i * n + i] += c.alpha;
        }
    }
    fn get_mat_type(&self, _kind: ElementMatrixType, _s: &ElementState<'_>, _mat: &mut [f64]) {}
}

pub fn springs(mesh: &LocalMesh, vpn: usize, k: f64) -> Vec<Box<dyn Element>> {
    (0..mesh.num_elements())
        .map(|e| {
            let n = mesh.ptr[e + 1] - mesh.ptr[e];
            Box::new(Spring::new(n, vpn, k)) as Box<dyn Element>
        })
        .collect()
}

/// Set up an assembler for `mesh`; `setup` runs on the builder before
/// `initialize`. Node coordinates are set afterwards.
pub fn build<C: Communicator>(
    comm: C,
    mesh: &LocalMesh,
    vpn: usize,
    elements: Vec<Box<dyn Element>>,
    setup: impl FnOnce(&mut AssemblerBuilder<C>),
) -> Assembler<C> {
    let mut b = AssemblerBuilder::new(comm, vpn, mesh.num_owned).unwrap();
    b.set_element_connectivity(mesh.ptr.clone(), mesh.conn.clone())
        .unwrap();
    b.set_elements(elements);
    setup(&mut b);
    let mut asm = b.initialize().unwrap();
    let mut x = asm.create_node_vec();
    x.values_mut().copy_from_slice(&mesh.coords);
    asm.reorder_vec(&mut x).unwrap();
    asm.set_nodes(&x).unwrap();
    asm
}

/// Smooth test field over global ids.
pub fn field(g: usize, d: usize) -> f64 {
    ((g * 7 + d * 3) % 11) as f64 * 0.1 - 0.3
}

/// Owned vector with entry `(g, d) = f(g, d)`.
pub fn owned_field<C: Communicator>(asm: &Assembler<C>, f: impl Fn(usize, usize) -> f64) -> DistVec {
    let mut v = asm.create_vec();
    let vpn = v.bsize();
    for g in v.owned_range() {
        let vals = v.node_mut(g).unwrap();
        for (d, x) in vals.iter_mut().enumerate().take(vpn) {
            *x = f(g, d);
        }
    }
    v
}

/// Concatenate per-rank owned values (rank order = global order).
pub fn concat(parts: Vec<Vec<f64>>) -> Vec<f64> {
    parts.into_iter().flatten().collect()
}

/// Blocks of the owned rows, by `(row, col)` global id.
pub fn mat_entries(m: &DistMat) -> BTreeMap<(usize, usize), Vec<f64>> {
    let mut out = BTreeMap::new();
    for row in m.owned_rows() {
        for &col in m.row_pattern(row).unwrap() {
            out.insert((row, col), m.get_block(row, col).unwrap().to_vec());
        }
    }
    out
}

pub fn merge_entries(parts: Vec<BTreeMap<(usize, usize), Vec<f64>>>) -> BTreeMap<(usize, usize), Vec<f64>> {
    parts.into_iter().flatten().collect()
}

/// Blocks missing on one side count as zero.
pub fn assert_mats_close(
    a: &BTreeMap<(usize, usize), Vec<f64>>,
    b: &BTreeMap<(usize, usize), Vec<f64>>,
    tol: f64,
) {
    for key in a.keys().chain(b.keys()) {
        let (x, y) = (a.get(key), b.get(key));
        let n = x.or(y).map_or(0, |v| v.len());
        for k in 0..n {
            let xv = x.map_or(0.0, |v| v[k]);
            let yv = y.map_or(0.0, |v| v[k]);
            assert!(
                (xv - yv).abs() <= tol,
                "block {key:?} entry {k}: {xv} vs {yv}"
            );
        }
    }
}

pub fn assert_close(got: &[f64], want: &[f64], tol: f64) {
    assert_eq!(got.len(), want.len(), "length mismatch");
    for (i, (g, w)) in got.iter().zip(want).enumerate() {
        assert!((g - w).abs() <= tol, "entry {i}: got {g}, want {w}");
    }
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}
