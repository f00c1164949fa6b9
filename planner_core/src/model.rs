//! Closed-loop vehicle response model.
//!
//! # Design choices
//! - Each axis tracks a commanded position setpoint u through the
//!   second-order response ṗ = v, v̇ = (u − p)/τ² − (2ζ/τ)·v: DC gain 1
//!   (a held setpoint is reached exactly), critically damped at ζ = 1.
//! - Horizontal and vertical axes carry separate (ζ, τ) pairs; quadrotor
//!   attitude dynamics make the x/y response visibly slower than z.
//! - The discrete (A, B) pair per axis group is obtained once by zero-order
//!   hold over `ts` using the augmented-matrix exponential, so `advance`
//!   is a pure 2×2 matrix-vector step.

use crate::types::{State3D, Vec3};
use nalgebra::{Matrix2, Matrix3, Vector2};
use serde::{Deserialize, Serialize};

/// Per-axis response parameters of the closed-loop vehicle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ModelParams {
    pub zeta_xy: f64,
    pub tau_xy: f64,
    pub zeta_z: f64,
    pub tau_z: f64,
}

/// Discrete second-order response model for all three axes.
#[derive(Clone, Debug)]
pub struct DoubleIntegrator3D {
    a_xy: Matrix2<f64>,
    b_xy: Vector2<f64>,
    a_z: Matrix2<f64>,
    b_z: Vector2<f64>,
}

impl DoubleIntegrator3D {
    pub fn new(ts: f64, p: &ModelParams) -> Self {
        let (a_xy, b_xy) = discretize(ts, p.zeta_xy, p.tau_xy);
        let (a_z, b_z) = discretize(ts, p.zeta_z, p.tau_z);
        Self {
            a_xy,
            b_xy,
            a_z,
            b_z,
        }
    }

    /// Advance the state one micro-step under position setpoint `u`.
    /// Deterministic and time-invariant.
    pub fn advance(&self, state: &State3D, u: &Vec3) -> State3D {
        let mut pos = Vec3::zeros();
        let mut vel = Vec3::zeros();
        for axis in 0..3 {
            let (a, b) = if axis < 2 {
                (&self.a_xy, &self.b_xy)
            } else {
                (&self.a_z, &self.b_z)
            };
            let x = Vector2::new(state.pos[axis], state.vel[axis]);
            let next = a * x + b * u[axis];
            pos[axis] = next[0];
            vel[axis] = next[1];
        }
        State3D { pos, vel }
    }
}

/// Zero-order-hold discretization of one axis. The input column is folded
/// into an augmented 3×3 system so a single matrix exponential yields both
/// A_d and B_d.
fn discretize(ts: f64, zeta: f64, tau: f64) -> (Matrix2<f64>, Vector2<f64>) {
    let wn2 = 1.0 / (tau * tau);
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0,  1.0,                0.0,
        -wn2, -2.0 * zeta / tau,  wn2,
        0.0,  0.0,                0.0,
    );
    let md = (m * ts).exp();
    (
        Matrix2::new(md[(0, 0)], md[(0, 1)], md[(1, 0)], md[(1, 1)]),
        Vector2::new(md[(0, 2)], md[(1, 2)]),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn model() -> DoubleIntegrator3D {
        DoubleIntegrator3D::new(
            0.005,
            &ModelParams {
                zeta_xy: 0.9,
                tau_xy: 0.3,
                zeta_z: 1.0,
                tau_z: 0.3,
            },
        )
    }

    #[test]
    fn held_setpoint_is_reached() {
        let model = model();
        let target = Vec3::new(1.0, -2.0, 0.5);
        let mut state = State3D::at_rest(Vec3::zeros());
        // 10 s at 5 ms ≫ settling time for τ = 0.3 s
        for _ in 0..2000 {
            state = model.advance(&state, &target);
        }
        assert_abs_diff_eq!(state.pos[0], target[0], epsilon = 1e-6);
        assert_abs_diff_eq!(state.pos[1], target[1], epsilon = 1e-6);
        assert_abs_diff_eq!(state.pos[2], target[2], epsilon = 1e-6);
        assert!(state.vel.norm() < 1e-6);
    }

    #[test]
    fn setpoint_at_current_position_holds_still() {
        let model = model();
        let here = Vec3::new(0.3, 0.3, 1.0);
        let mut state = State3D::at_rest(here);
        for _ in 0..100 {
            state = model.advance(&state, &here);
        }
        assert_abs_diff_eq!((state.pos - here).norm(), 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(state.vel.norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn advance_is_deterministic() {
        let model = model();
        let state = State3D {
            pos: Vec3::new(0.1, 0.2, 0.3),
            vel: Vec3::new(-0.5, 0.4, 0.0),
        };
        let u = Vec3::new(1.0, 1.0, 1.0);
        let a = model.advance(&state, &u);
        let b = model.advance(&state, &u);
        assert_eq!(a.pos, b.pos);
        assert_eq!(a.vel, b.vel);
    }
}
