//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector, Matrix3xX, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Scalar type: f64 throughout, for numerical headroom in the QP.
// ---------------------------------------------------------------------------

/// 3-D point / direction
pub type Vec3 = Vector3<f64>;

/// Predicted horizon: one column of positions per lookahead step
pub type Horizon = Matrix3xX<f64>;

/// Generic dynamic-size matrix (cost blocks, constraint blocks, bases)
pub type DMat = DMatrix<f64>;

/// Generic dynamic-size vector (decision variables, right-hand sides)
pub type DVec = DVector<f64>;

// ---------------------------------------------------------------------------
// Agent state
// ---------------------------------------------------------------------------

/// Position/velocity state of one agent.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct State3D {
    pub pos: Vec3,
    pub vel: Vec3,
}

impl State3D {
    /// State with zero velocity at `pos`.
    pub fn at_rest(pos: Vec3) -> Self {
        Self {
            pos,
            vel: Vec3::zeros(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ellipsoidal footprint
// ---------------------------------------------------------------------------

/// Configuration-level ellipsoid description: q-norm order, minimum
/// separation, and vertical stretch c_z of the anisotropy c = (1, 1, c_z).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EllipseParams {
    pub order: i32,
    pub rmin: f64,
    pub height_scaling: f64,
}

/// Precomputed ellipsoid scaling. Separation between two bodies is the
/// q-norm ‖E⁻¹(p_i − p_j)‖_q with E = diag(1, 1, c_z); the diagonals of
/// E⁻¹ and E⁻² are cached because the avoiders evaluate them per pair
/// per timestep.
#[derive(Clone, Copy, Debug)]
pub struct Ellipse {
    pub order: i32,
    pub rmin: f64,
    /// diagonal of E⁻¹
    pub e1: Vec3,
    /// diagonal of E⁻²
    pub e2: Vec3,
}

impl Ellipse {
    pub fn new(p: &EllipseParams) -> Self {
        let c = Vec3::new(1.0, 1.0, p.height_scaling);
        Self {
            order: p.order,
            rmin: p.rmin,
            e1: c.map(|v| 1.0 / v),
            e2: c.map(|v| 1.0 / (v * v)),
        }
    }

    /// Ellipsoidal q-norm distance between two points. Even `order` keeps
    /// every summand nonnegative, so no absolute values are taken.
    pub fn distance(&self, pi: &Vec3, pj: &Vec3) -> f64 {
        let scaled = self.e1.component_mul(&(pi - pj));
        scaled
            .iter()
            .map(|v| v.powi(self.order))
            .sum::<f64>()
            .powf(1.0 / f64::from(self.order))
    }

    /// Gradient direction of the separation constraint at the linearization
    /// point: (E⁻²(p_i − p_j))^(q−1), component-wise.
    pub fn gradient(&self, pi: &Vec3, pj: &Vec3) -> Vec3 {
        self.e2
            .component_mul(&(pi - pj))
            .map(|v| v.powi(self.order - 1))
    }
}
