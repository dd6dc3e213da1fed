//! Setup and assembly.
//!
//! Setup happens on an [`AssemblerBuilder`]: element connectivity, dependent
//! nodes, boundary conditions, element kernels and (optionally) a global
//! reordering. [`AssemblerBuilder::initialize`] consumes the builder, builds
//! the halo and the distributor, propagates boundary conditions to every
//! rank that touches a constrained node, and returns an [`Assembler`] which
//! can only assemble. Setup calls after `initialize` therefore do not exist.
//!
//! Every method taking the communicator is collective: all ranks must call it
//! in the same order.

pub mod element;
pub mod options;
pub mod parallel;
pub mod verify;
pub mod workspace;

use once_cell::sync::OnceCell;

use crate::algs::adjacency_graph::{AdjacencyGraph, NodeAdjacencyOpts, node_to_element, node_to_node};
use crate::algs::collective::{all_reduce_max, all_reduce_min, all_reduce_sum};
use crate::algs::communicator::{Communicator, tags};
use crate::algs::coupling::coupling_elements;
use crate::algs::distributor::{GatherOp, HaloDistributor};
use crate::algs::ordering::OrderingType;
use crate::algs::reorder::{BlockOrdering, GlobalMesh, compute_block_ordering, compute_reordering};
use crate::data::bc::{BcMap, MAX_BC_DOFS};
use crate::data::constraints::ConstraintGraph;
use crate::data::matrix::{AssemblyMatrix, DistMat, MatrixOrientation};
use crate::data::schur::SchurMat;
use crate::data::vector::DistVec;
use crate::mesh_error::{AssemblerError, config_error};
use crate::topology::connectivity::ElementConnectivity;
use crate::topology::halo::HaloIndex;
use crate::topology::node::NodeRef;
use crate::topology::ownership::OwnershipMap;

use element::{Element, ElementMatrixType, JacobianCoeffs};
use options::{AssemblerOptions, ReorderingOptions};
use parallel::ElementLoop;
use verify::{ElementTestReport, check_element_jacobian};
use workspace::{WorkspacePool, scatter_add};

/// Coordinates per node.
const NODE_DIM: usize = 3;

/// An auxiliary kernel added on top of primary element `.0`.
pub type AuxElement = (usize, Box<dyn Element>);

/// Setup phase.
pub struct AssemblerBuilder<C: Communicator> {
    comm: C,
    ownership: OwnershipMap,
    vars_per_node: usize,
    conn: Option<ElementConnectivity>,
    constraints: ConstraintGraph,
    bcs: BcMap,
    elements: Option<Vec<Box<dyn Element>>>,
    new_numbers: Option<Vec<usize>>,
    options: AssemblerOptions,
}

impl<C: Communicator> AssemblerBuilder<C> {
    /// Collective: register `num_owned` nodes of `vars_per_node` values on
    /// this rank. Global ids are handed out in rank order.
    pub fn new(comm: C, vars_per_node: usize, num_owned: usize) -> Result<Self, AssemblerError> {
        let rank = comm.rank();
        if vars_per_node == 0 || vars_per_node > MAX_BC_DOFS {
            return Err(config_error(AssemblerError::InvalidOption(format!(
                "[{rank}] vars_per_node must be in 1..={MAX_BC_DOFS}, got {vars_per_node}"
            ))));
        }
        let ownership = OwnershipMap::new(&comm, num_owned)?;
        Ok(Self {
            comm,
            ownership,
            vars_per_node,
            conn: None,
            constraints: ConstraintGraph::empty(),
            bcs: BcMap::new(vars_per_node)?,
            elements: None,
            new_numbers: None,
            options: AssemblerOptions::default(),
        })
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn ownership(&self) -> &OwnershipMap {
        &self.ownership
    }

    pub fn set_options(&mut self, options: AssemblerOptions) -> Result<(), AssemblerError> {
        options.validate().map_err(config_error)?;
        self.options = options;
        Ok(())
    }

    fn check_not_reordered(&self, op: &'static str) -> Result<(), AssemblerError> {
        if self.new_numbers.is_some() {
            return Err(config_error(AssemblerError::SetupOrder {
                rank: self.rank(),
                op,
                msg: "after compute_reordering",
            }));
        }
        Ok(())
    }

    /// Element → node connectivity in global ids; `-(k+1)` names dependent
    /// node `k`.
    pub fn set_element_connectivity(&mut self, ptr: Vec<usize>, nodes: Vec<i64>) -> Result<(), AssemblerError> {
        self.check_not_reordered("set_element_connectivity")?;
        let conn = ElementConnectivity::new(self.rank(), ptr, nodes).map_err(config_error)?;
        self.conn = Some(conn);
        Ok(())
    }

    /// Dependent node `k` is `sum(weights[j] * parents[j])` over
    /// `ptr[k]..ptr[k + 1]`. Parents are independent global ids.
    pub fn set_dependent_nodes(
        &mut self,
        ptr: Vec<usize>,
        parents: Vec<i64>,
        weights: Vec<f64>,
    ) -> Result<(), AssemblerError> {
        self.check_not_reordered("set_dependent_nodes")?;
        let graph = ConstraintGraph::new(self.rank(), self.ownership.num_nodes(), ptr, parents, weights)
            .map_err(config_error)?;
        self.constraints = graph;
        Ok(())
    }

    /// Constrain `dofs` of every node in `nodes` (owned global ids). Without
    /// values the prescribed values are zero. Nothing is recorded on error.
    pub fn add_bcs(&mut self, nodes: &[i64], dofs: &[usize], values: Option<&[f64]>) -> Result<(), AssemblerError> {
        self.check_not_reordered("add_bcs")?;
        let rank = self.rank();
        let mut bcs = self.bcs.clone();
        for &raw in nodes {
            let node = match NodeRef::from_raw(raw) {
                NodeRef::Independent(n) if n < self.ownership.num_nodes() => n,
                _ => {
                    return Err(config_error(AssemblerError::NodeOutOfRange {
                        rank,
                        node: raw,
                        num_nodes: self.ownership.num_nodes(),
                    }));
                }
            };
            if !self.ownership.is_owned(node) {
                return Err(config_error(AssemblerError::InvalidOption(format!(
                    "[{rank}] boundary condition on node {node}, which rank {} owns",
                    self.ownership.owner(node)?
                ))));
            }
            bcs.add(node, dofs, values).map_err(config_error)?;
        }
        self.bcs = bcs;
        Ok(())
    }

    pub fn set_elements(&mut self, elements: Vec<Box<dyn Element>>) {
        self.elements = Some(elements);
    }

    fn check_mesh(&self) -> Result<&ElementConnectivity, AssemblerError> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            config_error(AssemblerError::SetupIncomplete {
                rank: self.rank(),
                msg: "element connectivity has not been set",
            })
        })?;
        conn.check_refs(
            self.rank(),
            self.ownership.num_nodes(),
            self.constraints.num_dependent(),
        )
        .map_err(config_error)?;
        Ok(conn)
    }

    /// Collective, one-shot: renumber the owned nodes of every rank.
    pub fn compute_reordering(&mut self, opts: ReorderingOptions) -> Result<(), AssemblerError> {
        if self.new_numbers.is_some() {
            return Err(config_error(AssemblerError::SetupOrder {
                rank: self.rank(),
                op: "compute_reordering",
                msg: "twice",
            }));
        }
        let conn = self.check_mesh()?;
        let mesh = GlobalMesh {
            conn: conn.clone(),
            constraints: self.constraints.clone(),
            bcs: self.bcs.clone(),
        };
        let r = compute_reordering(&self.comm, &self.ownership, &mesh, &opts.ordering, opts.matrix)?;
        self.conn = Some(r.mesh.conn);
        self.constraints = r.mesh.constraints;
        self.bcs = r.mesh.bcs;
        self.new_numbers = Some(r.owned_new_numbers);
        Ok(())
    }

    /// Collective: validate the setup and build the assembler.
    pub fn initialize(self) -> Result<Assembler<C>, AssemblerError> {
        let rank = self.rank();
        let conn = self.check_mesh()?;
        let elements = self.elements.as_ref().ok_or_else(|| {
            config_error(AssemblerError::SetupIncomplete {
                rank,
                msg: "elements have not been set",
            })
        })?;
        if elements.len() != conn.num_elements() {
            return Err(config_error(AssemblerError::ElementCountMismatch {
                rank,
                expected: conn.num_elements(),
                got: elements.len(),
            }));
        }
        let vpn = self.vars_per_node;
        for (e, elem) in elements.iter().enumerate() {
            let nodes = conn.element(e).len();
            if elem.num_nodes() != nodes {
                return Err(config_error(AssemblerError::ConnectivityMismatch {
                    rank,
                    msg: format!(
                        "element {e} ({}) has {} nodes, connectivity lists {nodes}",
                        elem.name(),
                        elem.num_nodes()
                    ),
                }));
            }
            if elem.num_displacements() != vpn || elem.num_variables() != nodes * vpn {
                return Err(config_error(AssemblerError::VarsPerNodeMismatch {
                    rank,
                    elem: e,
                    msg: format!(
                        "{} has {} values per node and {} variables, assembler has {vpn} per node",
                        elem.name(),
                        elem.num_displacements(),
                        elem.num_variables()
                    ),
                }));
            }
        }

        let halo = HaloIndex::from_mesh(&self.ownership, conn, &self.constraints);
        let dist = HaloDistributor::new(&self.comm, &self.ownership, &halo)?;
        let local_bcs = dist.share_bcs(&self.comm, &halo, &self.bcs)?;
        let conn = conn.try_map_independent(|g| halo.local_index(g))?;
        let deps = self.constraints.try_map_parents(|g| halo.local_index(g))?;
        let n = halo.num_local();
        let pattern = node_to_node(n, &conn, &deps, NodeAdjacencyOpts::default());
        let coupling = dist.coupling_nodes();

        let exec = ElementLoop::new(&self.options)?;
        let workspaces = WorkspacePool::new(self.options.num_threads, conn.max_element_nodes(), vpn);
        let owned = self.ownership.owned_range();
        log::info!(
            "[{rank}] initialized: {} elements, {} owned nodes, {} external, {} coupling, {} dependent",
            conn.num_elements(),
            halo.num_owned(),
            halo.num_ext(),
            coupling.len(),
            deps.num_dependent()
        );

        Ok(Assembler {
            vars: DistVec::new(owned.clone(), vpn),
            dvars: DistVec::new(owned.clone(), vpn),
            ddvars: DistVec::new(owned.clone(), vpn),
            xpts: DistVec::new(owned, NODE_DIM),
            vars_local: vec![0.0; n * vpn],
            dvars_local: vec![0.0; n * vpn],
            ddvars_local: vec![0.0; n * vpn],
            xpts_local: vec![0.0; n * NODE_DIM],
            elements: self.elements.unwrap_or_default(),
            comm: self.comm,
            ownership: self.ownership,
            halo,
            dist,
            vars_per_node: vpn,
            conn,
            deps,
            owned_bcs: self.bcs,
            local_bcs,
            aux: Vec::new(),
            pattern,
            coupling,
            new_numbers: self.new_numbers,
            block_ordering: OnceCell::new(),
            options: self.options,
            exec,
            workspaces,
            time: 0.0,
        })
    }
}

/// Assembly phase.
pub struct Assembler<C: Communicator> {
    comm: C,
    ownership: OwnershipMap,
    halo: HaloIndex,
    dist: HaloDistributor,
    vars_per_node: usize,
    /// Connectivity and constraints in local indices.
    conn: ElementConnectivity,
    deps: ConstraintGraph,
    /// Owned constraints by global id.
    owned_bcs: BcMap,
    /// Constraints of every local node by local index.
    local_bcs: BcMap,
    elements: Vec<Box<dyn Element>>,
    /// Sorted by element index.
    aux: Vec<AuxElement>,
    /// Local node → node graph, diagonal included.
    pattern: AdjacencyGraph,
    coupling: Vec<usize>,
    new_numbers: Option<Vec<usize>>,
    block_ordering: OnceCell<BlockOrdering>,
    options: AssemblerOptions,
    exec: ElementLoop,
    workspaces: WorkspacePool,
    time: f64,
    vars: DistVec,
    dvars: DistVec,
    ddvars: DistVec,
    xpts: DistVec,
    vars_local: Vec<f64>,
    dvars_local: Vec<f64>,
    ddvars_local: Vec<f64>,
    xpts_local: Vec<f64>,
}

/// Auxiliary kernels attached to element `e`.
fn aux_of(aux: &[AuxElement], e: usize) -> impl Iterator<Item = &dyn Element> {
    let lo = aux.partition_point(|(i, _)| *i < e);
    aux[lo..]
        .iter()
        .take_while(move |(i, _)| *i == e)
        .map(|(_, a)| a.as_ref())
}

struct JacobianTarget<'a, M> {
    res: Vec<f64>,
    mat: &'a mut M,
}

impl<C: Communicator> Assembler<C> {
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn ownership(&self) -> &OwnershipMap {
        &self.ownership
    }

    pub fn halo(&self) -> &HaloIndex {
        &self.halo
    }

    pub fn vars_per_node(&self) -> usize {
        self.vars_per_node
    }

    pub fn num_elements(&self) -> usize {
        self.conn.num_elements()
    }

    pub fn num_owned_nodes(&self) -> usize {
        self.halo.num_owned()
    }

    pub fn num_ext_nodes(&self) -> usize {
        self.halo.num_ext()
    }

    pub fn num_dependent_nodes(&self) -> usize {
        self.deps.num_dependent()
    }

    pub fn element(&self, e: usize) -> Option<&dyn Element> {
        self.elements.get(e).map(|b| b.as_ref())
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Boundary conditions of the owned nodes, by global id.
    pub fn bcs(&self) -> &BcMap {
        &self.owned_bcs
    }

    /// Boundary conditions of every local node, by local index.
    pub fn local_bcs(&self) -> &BcMap {
        &self.local_bcs
    }

    /// Local indices of the coupling nodes.
    pub fn coupling_nodes(&self) -> &[usize] {
        &self.coupling
    }

    /// Sorted local elements touching a coupling node.
    pub fn coupling_elements(&self) -> Vec<usize> {
        let n2e = node_to_element(self.halo.num_local(), &self.conn, &self.deps);
        coupling_elements(&n2e, &self.coupling)
    }

    pub fn local_node_index(&self, global: i64) -> Result<usize, AssemblerError> {
        match NodeRef::from_raw(global) {
            NodeRef::Independent(g) => self.halo.local_index(g),
            NodeRef::Dependent(_) => Err(AssemblerError::NodeOutOfRange {
                rank: self.rank(),
                node: global,
                num_nodes: self.ownership.num_nodes(),
            }),
        }
    }

    pub fn global_node_index(&self, local: usize) -> Result<usize, AssemblerError> {
        self.halo.global_index(local)
    }

    /// Old → new global id of every owned node, by owned offset.
    pub fn reordering(&self) -> Vec<usize> {
        match &self.new_numbers {
            Some(nn) => nn.clone(),
            None => self.ownership.owned_range().collect(),
        }
    }

    /// Move an owned vector from the original numbering to the reordered one.
    pub fn reorder_vec(&self, v: &mut DistVec) -> Result<(), AssemblerError> {
        if v.owned_range() != self.ownership.owned_range() {
            return Err(AssemblerError::VectorLayoutMismatch {
                expected: self.halo.num_owned() * v.bsize(),
                got: v.len(),
            });
        }
        let Some(nn) = &self.new_numbers else {
            return Ok(());
        };
        let bs = v.bsize();
        let start = self.ownership.owned_range().start;
        let old = v.values().to_vec();
        let dst = v.values_mut();
        for (o, &g) in nn.iter().enumerate() {
            let d = (g - start) * bs;
            dst[d..d + bs].copy_from_slice(&old[o * bs..(o + 1) * bs]);
        }
        Ok(())
    }

    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<(), AssemblerError> {
        let options = AssemblerOptions {
            num_threads,
            ..self.options
        };
        self.exec = ElementLoop::new(&options).map_err(config_error)?;
        self.workspaces.resize(num_threads);
        self.options = options;
        log::debug!("[{}] element loop uses {num_threads} threads", self.rank());
        Ok(())
    }

    /// Replace the auxiliary kernels. Each must have as many variables as the
    /// element it is attached to.
    pub fn set_aux_elements(&mut self, mut aux: Vec<AuxElement>) -> Result<(), AssemblerError> {
        let rank = self.rank();
        for (e, a) in &aux {
            let Some(elem) = self.elements.get(*e) else {
                return Err(config_error(AssemblerError::AuxElementMismatch {
                    rank,
                    elem: *e,
                    msg: format!("no such element (have {})", self.elements.len()),
                }));
            };
            if a.num_variables() != elem.num_variables() {
                return Err(config_error(AssemblerError::AuxElementMismatch {
                    rank,
                    elem: *e,
                    msg: format!(
                        "{} has {} variables, {} has {}",
                        a.name(),
                        a.num_variables(),
                        elem.name(),
                        elem.num_variables()
                    ),
                }));
            }
        }
        aux.sort_by_key(|(e, _)| *e);
        self.aux = aux;
        Ok(())
    }

    pub fn set_simulation_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn simulation_time(&self) -> f64 {
        self.time
    }

    // --- vectors and matrices ---

    pub fn create_vec(&self) -> DistVec {
        DistVec::new(self.ownership.owned_range(), self.vars_per_node)
    }

    /// Vector of node coordinates.
    pub fn create_node_vec(&self) -> DistVec {
        DistVec::new(self.ownership.owned_range(), NODE_DIM)
    }

    /// Collective: distributed row-block matrix.
    pub fn create_mat(&self) -> Result<DistMat, AssemblerError> {
        DistMat::new(&self.comm, &self.ownership, &self.halo, &self.pattern, self.vars_per_node)
    }

    /// Local interior/coupling block matrix. The node ordering is computed by
    /// the first call and shared by every later matrix.
    pub fn create_reordered_mat(&self, ordering: OrderingType) -> Result<SchurMat, AssemblerError> {
        let block = self.block_ordering.get_or_try_init(|| {
            compute_block_ordering(
                self.rank(),
                self.halo.num_local(),
                &self.conn,
                &self.deps,
                &self.coupling,
                ordering,
            )
        })?;
        Ok(SchurMat::new(block.clone(), &self.pattern, &self.halo, self.vars_per_node))
    }

    fn check_vec(&self, v: &DistVec, bsize: usize) -> Result<(), AssemblerError> {
        if v.owned_range() != self.ownership.owned_range() || v.bsize() != bsize {
            return Err(AssemblerError::VectorLayoutMismatch {
                expected: self.halo.num_owned() * bsize,
                got: v.len(),
            });
        }
        Ok(())
    }

    // --- state ---

    /// Collective: set the node coordinates.
    pub fn set_nodes(&mut self, x: &DistVec) -> Result<(), AssemblerError> {
        self.check_vec(x, NODE_DIM)?;
        self.xpts.copy_values(x)?;
        self.dist
            .scatter(&self.comm, self.xpts.values(), NODE_DIM, &mut self.xpts_local)
    }

    pub fn nodes(&self) -> &DistVec {
        &self.xpts
    }

    /// Collective: set any of the state vectors.
    pub fn set_variables(
        &mut self,
        q: Option<&DistVec>,
        qdot: Option<&DistVec>,
        qddot: Option<&DistVec>,
    ) -> Result<(), AssemblerError> {
        let vpn = self.vars_per_node;
        for (src, owned, local) in [
            (q, &mut self.vars, &mut self.vars_local),
            (qdot, &mut self.dvars, &mut self.dvars_local),
            (qddot, &mut self.ddvars, &mut self.ddvars_local),
        ] {
            if let Some(src) = src {
                if src.owned_range() != owned.owned_range() || src.bsize() != vpn {
                    return Err(AssemblerError::VectorLayoutMismatch {
                        expected: owned.len(),
                        got: src.len(),
                    });
                }
                owned.copy_values(src)?;
                self.dist.scatter(&self.comm, owned.values(), vpn, local)?;
            }
        }
        Ok(())
    }

    /// `(q, qdot, qddot)`.
    pub fn variables(&self) -> (&DistVec, &DistVec, &DistVec) {
        (&self.vars, &self.dvars, &self.ddvars)
    }

    pub fn zero_variables(&mut self) {
        self.vars.zero_entries();
        self.vars_local.fill(0.0);
    }

    pub fn zero_dot_variables(&mut self) {
        self.dvars.zero_entries();
        self.dvars_local.fill(0.0);
    }

    pub fn zero_ddot_variables(&mut self) {
        self.ddvars.zero_entries();
        self.ddvars_local.fill(0.0);
    }

    /// Zero the constrained entries of an owned vector.
    pub fn apply_bcs(&self, v: &mut DistVec) {
        v.apply_bcs(&self.owned_bcs);
    }

    /// Residual rows of constrained DOFs become `q - prescribed`.
    fn apply_residual_bcs(&self, res: &mut DistVec) {
        for (g, entry) in self.owned_bcs.iter() {
            let (Some(q), Some(r)) = (self.vars.node(g), res.node_mut(g)) else {
                continue;
            };
            for d in entry.dofs() {
                r[d] = q[d] - entry.values[d];
            }
        }
    }

    // --- assembly ---

    /// Collective: assemble the residual into `res`.
    pub fn assemble_residual(&self, res: &mut DistVec) -> Result<(), AssemblerError> {
        self.check_vec(res, self.vars_per_node)?;
        let vpn = self.vars_per_node;
        let (conn, deps, elements, aux, time) = (&self.conn, &self.deps, &self.elements, &self.aux, self.time);
        let (x, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        let mut local = vec![0.0; self.halo.num_local() * vpn];
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            &mut local,
            |e, ws| {
                ws.gather(conn.element(e), deps, x, q, dq, ddq);
                let (state, r, _) = ws.state_and_outputs();
                elements[e].add_residual(time, &state, r);
                for a in aux_of(aux, e) {
                    a.add_residual(time, &state, r);
                }
                Ok(())
            },
            |e, ws, local: &mut Vec<f64>| {
                scatter_add(conn.element(e), deps, vpn, 1.0, &ws.res[..ws.num_variables()], local);
                Ok(())
            },
        )?;
        res.zero_entries();
        self.dist.gather_add(&self.comm, &local, vpn, res.values_mut())?;
        self.apply_residual_bcs(res);
        Ok(())
    }

    /// Collective: assemble `alpha dR/dq + beta dR/dqdot + gamma dR/dqddot`
    /// into `mat`, and the residual into `res` when given. All ranks must
    /// agree on whether `res` is given.
    pub fn assemble_jacobian<M: AssemblyMatrix>(
        &self,
        coeffs: JacobianCoeffs,
        res: Option<&mut DistVec>,
        mat: &mut M,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let vpn = self.vars_per_node;
        if let Some(r) = res.as_deref() {
            self.check_vec(r, vpn)?;
        }
        let (conn, deps, elements, aux, time) = (&self.conn, &self.deps, &self.elements, &self.aux, self.time);
        let (x, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        mat.zero_entries();
        let mut target = JacobianTarget {
            res: vec![0.0; self.halo.num_local() * vpn],
            mat,
        };
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            &mut target,
            |e, ws| {
                ws.gather(conn.element(e), deps, x, q, dq, ddq);
                let (state, r, m) = ws.state_and_outputs();
                elements[e].add_jacobian(time, coeffs, &state, r, m);
                for a in aux_of(aux, e) {
                    a.add_jacobian(time, coeffs, &state, r, m);
                }
                Ok(())
            },
            |e, ws, t: &mut JacobianTarget<'_, M>| {
                let n = ws.num_variables();
                let nodes = conn.element(e);
                scatter_add(nodes, deps, vpn, 1.0, &ws.res[..n], &mut t.res);
                t.mat.add_element_matrix(nodes, &ws.mat[..n * n], deps, orient)
            },
        )?;
        target.mat.finalize(&self.comm, &self.local_bcs)?;
        if let Some(res) = res {
            res.zero_entries();
            self.dist
                .gather_add(&self.comm, &target.res, vpn, res.values_mut())?;
            self.apply_residual_bcs(res);
        }
        Ok(())
    }

    /// Collective: assemble a stiffness, mass or geometric stiffness matrix.
    pub fn assemble_matrix_of_type<M: AssemblyMatrix>(
        &self,
        kind: ElementMatrixType,
        mat: &mut M,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let (conn, deps, elements, aux) = (&self.conn, &self.deps, &self.elements, &self.aux);
        let (x, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        mat.zero_entries();
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            mat,
            |e, ws| {
                ws.gather(conn.element(e), deps, x, q, dq, ddq);
                let (state, _, m) = ws.state_and_outputs();
                elements[e].get_mat_type(kind, &state, m);
                for a in aux_of(aux, e) {
                    a.get_mat_type(kind, &state, m);
                }
                Ok(())
            },
            |e, ws, mat: &mut M| {
                let n = ws.num_variables();
                mat.add_element_matrix(conn.element(e), &ws.mat[..n * n], deps, orient)
            },
        )?;
        mat.finalize(&self.comm, &self.local_bcs)
    }

    /// Collective: `y += scale * J x` (or `J^T x`), element by element,
    /// with constrained entries of `y` zeroed.
    pub fn add_jacobian_vec_product(
        &self,
        scale: f64,
        coeffs: JacobianCoeffs,
        x: &DistVec,
        y: &mut DistVec,
        orient: MatrixOrientation,
    ) -> Result<(), AssemblerError> {
        let vpn = self.vars_per_node;
        self.check_vec(x, vpn)?;
        self.check_vec(y, vpn)?;
        let n_local = self.halo.num_local() * vpn;
        let mut x_local = vec![0.0; n_local];
        self.dist.scatter(&self.comm, x.values(), vpn, &mut x_local)?;

        let (conn, deps, elements, aux, time) = (&self.conn, &self.deps, &self.elements, &self.aux, self.time);
        let (xp, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        let mut y_local = vec![0.0; n_local];
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            &mut y_local,
            |e, ws| {
                let nodes = conn.element(e);
                ws.gather(nodes, deps, xp, q, dq, ddq);
                ws.gather_input(nodes, deps, &x_local);
                let (state, r, m) = ws.state_and_outputs();
                elements[e].add_jacobian(time, coeffs, &state, r, m);
                for a in aux_of(aux, e) {
                    a.add_jacobian(time, coeffs, &state, r, m);
                }
                let n = ws.num_variables();
                for i in 0..n {
                    let row = &ws.mat[i * n..(i + 1) * n];
                    match orient {
                        MatrixOrientation::Normal => {
                            ws.y[i] = row.iter().zip(&ws.x[..n]).map(|(a, b)| a * b).sum();
                        }
                        MatrixOrientation::Transpose => {
                            let xi = ws.x[i];
                            for (yj, a) in ws.y[..n].iter_mut().zip(row) {
                                *yj += a * xi;
                            }
                        }
                    }
                }
                Ok(())
            },
            |e, ws, y: &mut Vec<f64>| {
                scatter_add(conn.element(e), deps, vpn, scale, &ws.y[..ws.num_variables()], y);
                Ok(())
            },
        )?;
        self.dist.gather_add(&self.comm, &y_local, vpn, y.values_mut())?;
        y.apply_bcs(&self.owned_bcs);
        Ok(())
    }

    /// Collective: `(kinetic, potential)` energy summed over every element of
    /// every rank.
    pub fn eval_energies(&self) -> Result<(f64, f64), AssemblerError> {
        let (conn, deps, elements, time) = (&self.conn, &self.deps, &self.elements, self.time);
        let (x, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        let mut totals = [0.0f64; 2];
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            &mut totals,
            |e, ws| {
                ws.gather(conn.element(e), deps, x, q, dq, ddq);
                ws.energies = elements[e].compute_energies(time, &ws.state());
                Ok(())
            },
            |_, ws, totals: &mut [f64; 2]| {
                totals[0] += ws.energies.0;
                totals[1] += ws.energies.1;
                Ok(())
            },
        )?;
        let sum = all_reduce_sum(&self.comm, tags::REDUCE, &totals)?;
        Ok((sum[0], sum[1]))
    }

    /// Collective: initial conditions of every element, inserted into the
    /// owned vectors. Where elements disagree on a node the last writer wins.
    pub fn init_conditions(
        &self,
        vars: &mut DistVec,
        dvars: &mut DistVec,
        ddvars: &mut DistVec,
    ) -> Result<(), AssemblerError> {
        let vpn = self.vars_per_node;
        for v in [&*vars, &*dvars, &*ddvars] {
            self.check_vec(v, vpn)?;
        }
        let (conn, deps, elements) = (&self.conn, &self.deps, &self.elements);
        let (x, q, dq, ddq) = (&self.xpts_local, &self.vars_local, &self.dvars_local, &self.ddvars_local);
        let n_local = self.halo.num_local() * vpn;
        let mut locals = [vec![0.0; n_local], vec![0.0; n_local], vec![0.0; n_local]];
        self.exec.run(
            &self.workspaces,
            conn.num_elements(),
            &mut locals,
            |e, ws| {
                ws.gather(conn.element(e), deps, x, q, dq, ddq);
                let n = ws.num_variables();
                let nn = conn.element(e).len();
                ws.x[..n].fill(0.0);
                ws.y[..n].fill(0.0);
                ws.res[..n].fill(0.0);
                elements[e].get_init_conditions(
                    &ws.xpts[..NODE_DIM * nn],
                    &mut ws.x[..n],
                    &mut ws.y[..n],
                    &mut ws.res[..n],
                );
                Ok(())
            },
            |e, ws, locals: &mut [Vec<f64>; 3]| {
                for (a, &raw) in conn.element(e).iter().enumerate() {
                    if let NodeRef::Independent(l) = NodeRef::from_raw(raw) {
                        for (dst, src) in locals.iter_mut().zip([&ws.x, &ws.y, &ws.res]) {
                            dst[l * vpn..(l + 1) * vpn].copy_from_slice(&src[a * vpn..(a + 1) * vpn]);
                        }
                    }
                }
                Ok(())
            },
        )?;
        for (local, out) in locals.iter().zip([vars, dvars, ddvars]) {
            self.dist
                .gather(&self.comm, local, vpn, out.values_mut(), GatherOp::Insert)?;
        }
        Ok(())
    }

    fn check_design_vars(&self, num_dvs: usize) -> Result<(), AssemblerError> {
        for (e, elem) in self.elements.iter().enumerate() {
            if let Some(&d) = elem.design_var_nums().iter().find(|&&d| d >= num_dvs) {
                return Err(AssemblerError::InvalidOption(format!(
                    "[{}] element {e} uses design variable {d}, only {num_dvs} requested",
                    self.rank()
                )));
            }
        }
        Ok(())
    }

    /// Collective: design variable values, max-reduced across ranks. Entries
    /// no element reports are zero.
    pub fn design_vars(&self, num_dvs: usize) -> Result<Vec<f64>, AssemblerError> {
        self.check_design_vars(num_dvs)?;
        let mut dvs = vec![f64::NEG_INFINITY; num_dvs];
        for elem in &self.elements {
            elem.get_design_vars(&mut dvs);
        }
        let mut dvs = all_reduce_max(&self.comm, tags::REDUCE, &dvs)?;
        dvs.iter_mut()
            .filter(|v| **v == f64::NEG_INFINITY)
            .for_each(|v| *v = 0.0);
        Ok(dvs)
    }

    /// Hand the design variables to every element and auxiliary element.
    pub fn set_design_vars(&mut self, dvs: &[f64]) -> Result<(), AssemblerError> {
        self.check_design_vars(dvs.len())?;
        for elem in &mut self.elements {
            elem.set_design_vars(dvs);
        }
        for (_, a) in &mut self.aux {
            a.set_design_vars(dvs);
        }
        Ok(())
    }

    /// Collective: `(lower, upper)` bounds; the largest lower and the
    /// smallest upper bound reported by any rank.
    pub fn design_var_range(&self, num_dvs: usize) -> Result<(Vec<f64>, Vec<f64>), AssemblerError> {
        self.check_design_vars(num_dvs)?;
        let mut lower = vec![f64::NEG_INFINITY; num_dvs];
        let mut upper = vec![f64::INFINITY; num_dvs];
        for elem in &self.elements {
            elem.get_design_var_range(&mut lower, &mut upper);
        }
        let lower = all_reduce_max(&self.comm, tags::REDUCE, &lower)?;
        let upper = all_reduce_min(&self.comm, tags::REDUCE.offset(1), &upper)?;
        Ok((lower, upper))
    }

    /// Finite-difference check of the Jacobian of local element `index` at
    /// the current state. Only logs and reports.
    pub fn test_element(&self, index: usize, step: f64) -> Result<ElementTestReport, AssemblerError> {
        let elem = self.elements.get(index).ok_or_else(|| {
            AssemblerError::InvalidOption(format!(
                "[{}] no element {index} (have {})",
                self.rank(),
                self.elements.len()
            ))
        })?;
        let mut ws = self.workspaces.slot(0);
        ws.gather(
            self.conn.element(index),
            &self.deps,
            &self.xpts_local,
            &self.vars_local,
            &self.dvars_local,
            &self.ddvars_local,
        );
        Ok(check_element_jacobian(elem.as_ref(), index, self.time, &ws.state(), step))
    }
}
