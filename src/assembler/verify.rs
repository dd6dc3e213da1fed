//! Finite-difference check of element Jacobians.
//!
//! This is a diagnostic: a report is returned and logged, nothing else.

use serde::Serialize;

use crate::assembler::element::{Element, ElementState, JacobianCoeffs};

/// Largest disagreement between the analytic and finite-difference Jacobian.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ElementTestReport {
    pub element: usize,
    pub name: String,
    pub max_abs_err: f64,
    /// `(row, col)` of `max_abs_err`.
    pub max_abs_entry: (usize, usize),
    pub max_rel_err: f64,
    pub max_rel_entry: (usize, usize),
}

impl ElementTestReport {
    pub fn passes(&self, atol: f64, rtol: f64) -> bool {
        self.max_abs_err <= atol || self.max_rel_err <= rtol
    }
}

/// Compare `add_jacobian` (`alpha = 1`, `beta = gamma = 0`) against a central
/// difference of `add_residual` with respect to the element variables.
pub fn check_element_jacobian(
    elem: &dyn Element,
    index: usize,
    time: f64,
    state: &ElementState<'_>,
    step: f64,
) -> ElementTestReport {
    let n = state.vars.len();
    let mut res = vec![0.0; n];
    let mut jac = vec![0.0; n * n];
    elem.add_jacobian(time, JacobianCoeffs::STIFFNESS, state, &mut res, &mut jac);

    let mut report = ElementTestReport {
        element: index,
        name: elem.name().to_owned(),
        max_abs_err: 0.0,
        max_abs_entry: (0, 0),
        max_rel_err: 0.0,
        max_rel_entry: (0, 0),
    };
    let mut q = state.vars.to_vec();
    let (mut rp, mut rm) = (vec![0.0; n], vec![0.0; n]);
    for j in 0..n {
        let q0 = q[j];
        for (h, out) in [(step, &mut rp), (-step, &mut rm)] {
            q[j] = q0 + h;
            out.fill(0.0);
            let s = ElementState { vars: &q, ..*state };
            elem.add_residual(time, &s, out);
        }
        q[j] = q0;
        for i in 0..n {
            let fd = (rp[i] - rm[i]) / (2.0 * step);
            let an = jac[i * n + j];
            let abs = (an - fd).abs();
            if abs > report.max_abs_err {
                report.max_abs_err = abs;
                report.max_abs_entry = (i, j);
            }
            if fd != 0.0 {
                let rel = abs / fd.abs();
                if rel > report.max_rel_err {
                    report.max_rel_err = rel;
                    report.max_rel_entry = (i, j);
                }
            }
        }
    }
    log::info!(
        "element {index} ({}): max abs err {:.3e} at {:?}, max rel err {:.3e} at {:?}",
        report.name,
        report.max_abs_err,
        report.max_abs_entry,
        report.max_rel_err,
        report.max_rel_entry
    );
    report
}
