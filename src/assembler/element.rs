//! The element kernel contract.
//!
//! The assembler never looks inside an element: it gathers the nodal state,
//! calls one of the `add_*` methods and scatters the result. Every method
//! *accumulates* into its output buffers, so auxiliary elements can add their
//! contribution to the same buffers before the scatter.

use serde::{Deserialize, Serialize};

/// Nodal state of one element, `vars_per_node` values per node (3 for `xpts`).
#[derive(Clone, Copy, Debug)]
pub struct ElementState<'a> {
    pub xpts: &'a [f64],
    pub vars: &'a [f64],
    pub dvars: &'a [f64],
    pub ddvars: &'a [f64],
}

/// Coefficients of `alpha * dR/dq + beta * dR/dqdot + gamma * dR/dqddot`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JacobianCoeffs {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl JacobianCoeffs {
    pub const fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    /// Plain stiffness: `alpha = 1`, `beta = gamma = 0`.
    pub const STIFFNESS: Self = Self::new(1.0, 0.0, 0.0);
}

impl Default for JacobianCoeffs {
    fn default() -> Self {
        Self::STIFFNESS
    }
}

/// Matrices an element can produce besides its Jacobian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementMatrixType {
    Stiffness,
    Mass,
    GeometricStiffness,
}

/// A finite-element kernel.
///
/// Element matrices are dense and row-major, `num_variables` square, with
/// variable index `node * num_displacements + dof`.
pub trait Element: Send + Sync {
    fn name(&self) -> &str;

    fn num_nodes(&self) -> usize;

    /// Values per node.
    fn num_displacements(&self) -> usize;

    fn num_variables(&self) -> usize {
        self.num_nodes() * self.num_displacements()
    }

    fn add_residual(&self, time: f64, state: &ElementState<'_>, res: &mut [f64]);

    fn add_jacobian(
        &self,
        time: f64,
        coeffs: JacobianCoeffs,
        state: &ElementState<'_>,
        res: &mut [f64],
        mat: &mut [f64],
    );

    fn get_mat_type(&self, kind: ElementMatrixType, state: &ElementState<'_>, mat: &mut [f64]);

    /// `(kinetic, potential)` energy.
    fn compute_energies(&self, _time: f64, _state: &ElementState<'_>) -> (f64, f64) {
        (0.0, 0.0)
    }

    /// Write initial values; the buffers arrive zeroed.
    fn get_init_conditions(&self, _xpts: &[f64], _vars: &mut [f64], _dvars: &mut [f64], _ddvars: &mut [f64]) {}

    /// Global design variable numbers this element depends on.
    fn design_var_nums(&self) -> &[usize] {
        &[]
    }

    /// Write the element's design variable values into the global array.
    fn get_design_vars(&self, _dvs: &mut [f64]) {}

    /// Read the element's design variables from the global array.
    fn set_design_vars(&mut self, _dvs: &[f64]) {}

    /// Write the element's design variable bounds into the global arrays.
    fn get_design_var_range(&self, _lower: &mut [f64], _upper: &mut [f64]) {}
}
