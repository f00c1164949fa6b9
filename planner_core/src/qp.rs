//! Dense convex QP in standard form, solved with totsu's primal-dual
//! interior-point method.
//!
//! minimize ½·xᵀHx + fᵀx  s.t.  A_in·x ≤ b_in,  A_eq·x = b_eq
//!
//! The per-agent problems are small (tens of control-point variables plus
//! one slack per collision row), so a dense formulation is the right trade.
//! This module is the only place that touches the solver API; the assembly
//! side works in nalgebra types throughout.

use crate::types::{DMat, DVec};
use totsu::predef::QP;
use totsu::prelude::*;

/// One assembled QP, ready to solve.
#[derive(Clone, Debug)]
pub struct QpProblem {
    pub h: DMat,
    pub f: DVec,
    pub a_in: DMat,
    pub b_in: DVec,
    pub a_eq: DMat,
    pub b_eq: DVec,
}

/// Why a solve produced no usable iterate.
#[derive(Clone, Debug)]
pub enum QpError {
    /// The interior-point method reported failure (non-convergence,
    /// degenerate KKT system, …).
    Solver(String),
    /// The reported solution contains NaN or ±∞.
    NonFinite,
}

impl std::fmt::Display for QpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QpError::Solver(msg) => write!(f, "qp solver failed: {msg}"),
            QpError::NonFinite => write!(f, "qp solution is not finite"),
        }
    }
}

fn to_mat(m: &DMat) -> Mat {
    let mut out = Mat::new(m.nrows(), m.ncols());
    for r in 0..m.nrows() {
        for c in 0..m.ncols() {
            let v = m[(r, c)];
            if v != 0.0 {
                out[(r, c)] = v;
            }
        }
    }
    out
}

fn to_vec(v: &DVec) -> Mat {
    let mut out = Mat::new_vec(v.len());
    for r in 0..v.len() {
        if v[r] != 0.0 {
            out[(r, 0)] = v[r];
        }
    }
    out
}

/// Solve the problem; returns the primal iterate or an error. Never panics.
pub fn solve(problem: &QpProblem) -> Result<DVec, QpError> {
    let n = problem.f.len();

    let mat_p = to_mat(&problem.h);
    let vec_q = to_vec(&problem.f);
    let mat_g = to_mat(&problem.a_in);
    let vec_h = to_vec(&problem.b_in);
    let mat_a = to_mat(&problem.a_eq);
    let vec_b = to_vec(&problem.b_eq);

    let param = PDIPMParam::default();
    let rslt = PDIPM::new()
        .solve_qp(
            &param,
            &mut std::io::sink(),
            &mat_p,
            &vec_q,
            &mat_g,
            &vec_h,
            &mat_a,
            &vec_b,
        )
        .map_err(|e| QpError::Solver(e.to_string()))?;

    let x = DVec::from_fn(n, |i, _| rslt[(i, 0)]);
    if x.iter().any(|v| !v.is_finite()) {
        return Err(QpError::NonFinite);
    }
    Ok(x)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// min (x₀−1)² + (x₁−2)²  s.t. x₀ + x₁ ≤ 2, x₁ − x₀ = 1.
    /// The inequality binds: optimum (0.5, 1.5).
    #[test]
    fn projects_onto_halfplane() {
        let problem = QpProblem {
            h: DMat::from_diagonal(&DVec::from_vec(vec![2.0, 2.0])),
            f: DVec::from_vec(vec![-2.0, -4.0]),
            a_in: DMat::from_row_slice(1, 2, &[1.0, 1.0]),
            b_in: DVec::from_vec(vec![2.0]),
            a_eq: DMat::from_row_slice(1, 2, &[-1.0, 1.0]),
            b_eq: DVec::from_vec(vec![1.0]),
        };
        let x = solve(&problem).expect("feasible QP must solve");
        assert_abs_diff_eq!(x[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 1.5, epsilon = 1e-4);
    }

    /// min ‖x‖² s.t. x₀ = 3, x₁ ≤ 1 → (3, 0).
    #[test]
    fn equality_and_inequality_mix() {
        let problem = QpProblem {
            h: DMat::from_diagonal(&DVec::from_vec(vec![2.0, 2.0])),
            f: DVec::zeros(2),
            a_in: DMat::from_row_slice(1, 2, &[0.0, 1.0]),
            b_in: DVec::from_vec(vec![1.0]),
            a_eq: DMat::from_row_slice(1, 2, &[1.0, 0.0]),
            b_eq: DVec::from_vec(vec![3.0]),
        };
        let x = solve(&problem).expect("feasible QP must solve");
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-4);
        assert_abs_diff_eq!(x[1], 0.0, epsilon = 1e-4);
    }
}
