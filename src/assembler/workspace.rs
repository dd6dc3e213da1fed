//! Per-worker scratch buffers for the element loop.
//!
//! Every worker thread owns one [`ElementWorkspace`] sized for the largest
//! element, so the loop never allocates per element.

use parking_lot::{Mutex, MutexGuard};

use crate::assembler::element::ElementState;
use crate::data::constraints::ConstraintGraph;
use crate::topology::node::NodeRef;

#[derive(Clone, Debug, Default)]
pub struct ElementWorkspace {
    pub xpts: Vec<f64>,
    pub vars: Vec<f64>,
    pub dvars: Vec<f64>,
    pub ddvars: Vec<f64>,
    pub res: Vec<f64>,
    pub mat: Vec<f64>,
    /// Element slice of an input vector (Jacobian-vector products).
    pub x: Vec<f64>,
    /// Element slice of an output vector.
    pub y: Vec<f64>,
    /// `(kinetic, potential)` energy of the last element.
    pub energies: (f64, f64),
    nnodes: usize,
    vpn: usize,
}

impl ElementWorkspace {
    pub fn new(max_nodes: usize, vpn: usize) -> Self {
        let nvars = max_nodes * vpn;
        Self {
            xpts: vec![0.0; 3 * max_nodes],
            vars: vec![0.0; nvars],
            dvars: vec![0.0; nvars],
            ddvars: vec![0.0; nvars],
            res: vec![0.0; nvars],
            mat: vec![0.0; nvars * nvars],
            x: vec![0.0; nvars],
            y: vec![0.0; nvars],
            energies: (0.0, 0.0),
            nnodes: 0,
            vpn,
        }
    }

    pub fn num_variables(&self) -> usize {
        self.nnodes * self.vpn
    }

    /// Load the nodal state of an element; dependent nodes are the weighted
    /// combination of their parents. Zeroes the output buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn gather(
        &mut self,
        nodes: &[i64],
        deps: &ConstraintGraph,
        xpts: &[f64],
        vars: &[f64],
        dvars: &[f64],
        ddvars: &[f64],
    ) {
        self.nnodes = nodes.len();
        let vpn = self.vpn;
        for (a, &raw) in nodes.iter().enumerate() {
            gather_node(raw, deps, xpts, 3, &mut self.xpts[3 * a..3 * (a + 1)]);
            gather_node(raw, deps, vars, vpn, &mut self.vars[vpn * a..vpn * (a + 1)]);
            gather_node(raw, deps, dvars, vpn, &mut self.dvars[vpn * a..vpn * (a + 1)]);
            gather_node(raw, deps, ddvars, vpn, &mut self.ddvars[vpn * a..vpn * (a + 1)]);
        }
        let n = self.num_variables();
        self.res[..n].fill(0.0);
        self.mat[..n * n].fill(0.0);
    }

    /// Load the element slice of `x` into [`x`](Self::x) and zero `y`.
    pub fn gather_input(&mut self, nodes: &[i64], deps: &ConstraintGraph, x: &[f64]) {
        let vpn = self.vpn;
        for (a, &raw) in nodes.iter().enumerate() {
            gather_node(raw, deps, x, vpn, &mut self.x[vpn * a..vpn * (a + 1)]);
        }
        self.y[..nodes.len() * vpn].fill(0.0);
    }

    /// Views of the gathered state.
    pub fn state(&self) -> ElementState<'_> {
        let n = self.num_variables();
        ElementState {
            xpts: &self.xpts[..3 * self.nnodes],
            vars: &self.vars[..n],
            dvars: &self.dvars[..n],
            ddvars: &self.ddvars[..n],
        }
    }

    /// Split borrow: the gathered state plus the residual and matrix buffers.
    pub fn state_and_outputs(&mut self) -> (ElementState<'_>, &mut [f64], &mut [f64]) {
        let n = self.num_variables();
        let state = ElementState {
            xpts: &self.xpts[..3 * self.nnodes],
            vars: &self.vars[..n],
            dvars: &self.dvars[..n],
            ddvars: &self.ddvars[..n],
        };
        (state, &mut self.res[..n], &mut self.mat[..n * n])
    }
}

/// Copy the `bsize` values of node `raw` from a local array.
#[inline]
fn gather_node(raw: i64, deps: &ConstraintGraph, src: &[f64], bsize: usize, out: &mut [f64]) {
    match NodeRef::from_raw(raw) {
        NodeRef::Independent(l) => out.copy_from_slice(&src[l * bsize..(l + 1) * bsize]),
        NodeRef::Dependent(k) => deps.combine(k, src, bsize, out),
    }
}

/// Add element values back into a local array, routing dependent nodes to
/// their parents with their weights.
pub fn scatter_add(nodes: &[i64], deps: &ConstraintGraph, bsize: usize, scale: f64, vals: &[f64], dst: &mut [f64]) {
    for (a, &raw) in nodes.iter().enumerate() {
        let src = &vals[a * bsize..(a + 1) * bsize];
        for (l, w) in deps.expand_raw(raw) {
            dst[l * bsize..(l + 1) * bsize]
                .iter_mut()
                .zip(src)
                .for_each(|(d, s)| *d += scale * w * s);
        }
    }
}

/// One workspace per worker thread.
#[derive(Debug, Default)]
pub struct WorkspacePool {
    slots: Vec<Mutex<ElementWorkspace>>,
    max_nodes: usize,
    vpn: usize,
}

impl WorkspacePool {
    pub fn new(num_threads: usize, max_nodes: usize, vpn: usize) -> Self {
        let slots = (0..num_threads)
            .map(|_| Mutex::new(ElementWorkspace::new(max_nodes, vpn)))
            .collect();
        Self {
            slots,
            max_nodes,
            vpn,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn resize(&mut self, num_threads: usize) {
        let (m, v) = (self.max_nodes, self.vpn);
        self.slots
            .resize_with(num_threads, || Mutex::new(ElementWorkspace::new(m, v)));
    }

    /// Workspace of worker `t`; each worker only ever locks its own slot.
    pub fn slot(&self, t: usize) -> MutexGuard<'_, ElementWorkspace> {
        self.slots[t].lock()
    }
}
