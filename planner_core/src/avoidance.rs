//! Pairwise collision constraints: On-Demand linearization and Buffered
//! Voronoi Cells.
//!
//! Both avoiders reduce the non-convex separation requirement d_ij ≥ rmin to
//! half-planes by a first-order expansion about the previous predicted
//! horizons. They differ only in *which* neighbour-timestep pairs they react
//! to:
//! - On-Demand collects pairs already in violation (d < rmin): few rows,
//!   tight trajectories, late maneuvers.
//! - BVC collects every pair inside the dilated radius 3·rmin: more rows,
//!   earlier braking, Voronoi-like partitioning of free space.
//!
//! The constraint output shape is identical, so the QP assembly is agnostic.
//! Each row is later paired with one slack variable scaled by d^{q−1}.

use crate::types::{DMat, DVec, Ellipse, EllipseParams, Horizon};
use serde::{Deserialize, Serialize};

/// Safety dilation of the BVC detection radius relative to rmin.
pub const BVC_DILATION: f64 = 3.0;

/// Which constraint builder a run uses. Selected at construction; every
/// agent in a run uses the same variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionMethod {
    #[serde(rename = "ONDemand")]
    OnDemand,
    #[serde(rename = "BVC")]
    Bvc,
}

/// Linearized collision block for one agent: rows `a·x ≤ b`, where row r is
/// softened by its own slack s_r ≥ 0 scaled by `slack_scale[r]` = d^{q−1}
/// (the full soft row reads `a·x − d^{q−1}·s ≤ b`).
#[derive(Clone, Debug)]
pub struct CollisionConstraint {
    pub a: DMat,
    pub b: DVec,
    pub slack_scale: DVec,
}

impl CollisionConstraint {
    fn empty(num_vars: usize) -> Self {
        Self {
            a: DMat::zeros(0, num_vars),
            b: DVec::zeros(0),
            slack_scale: DVec::zeros(0),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.a.nrows()
    }
}

/// Builds collision blocks against the frozen horizon snapshot. Holds one
/// ellipse per body: commanded agents first, then uncommanded obstacles
/// (which may carry a different order / rmin / vertical stretch).
#[derive(Clone, Debug)]
pub struct Avoider {
    method: CollisionMethod,
    ellipses: Vec<Ellipse>,
}

impl Avoider {
    pub fn new(method: CollisionMethod, params: &[EllipseParams]) -> Self {
        Self {
            method,
            ellipses: params.iter().map(Ellipse::new).collect(),
        }
    }

    pub fn method(&self) -> CollisionMethod {
        self.method
    }

    pub fn ellipse(&self, body: usize) -> &Ellipse {
        &self.ellipses[body]
    }

    /// Minimum ellipsoidal distance from agent `i` to any other body over
    /// the whole previous horizon. The neighbour's footprint governs each
    /// pair. Infinite when there is no neighbour.
    pub fn min_neighbour_distance(&self, i: usize, horizons: &[Horizon]) -> f64 {
        let k_hor = horizons[i].ncols();
        let mut min_dist = f64::INFINITY;
        for k in 0..k_hor {
            let pi = horizons[i].column(k).into_owned();
            for (j, other) in horizons.iter().enumerate() {
                if j == i {
                    continue;
                }
                let pj = other.column(k).into_owned();
                let d = self.ellipses[j].distance(&pi, &pj);
                if d < min_dist {
                    min_dist = d;
                }
            }
        }
        min_dist
    }

    /// Emit the linearized half-plane block for agent `i`.
    ///
    /// One row per (neighbour, timestep) pair inside the active detection
    /// radius, never more: row = −gᵀ·Φ_pos[3k..3k+3], rhs = −d^{q−1}(rmin − d)
    /// − gᵀ·p_i(k), with g the separation gradient at the previous iterate.
    pub fn constraint_rows(
        &self,
        i: usize,
        horizons: &[Horizon],
        phi_pos: &DMat,
    ) -> CollisionConstraint {
        let num_vars = phi_pos.ncols();
        let k_hor = horizons[i].ncols();

        // k outer, j inner: contiguous Φ_pos row blocks per timestep
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for k in 0..k_hor {
            let pi = horizons[i].column(k).into_owned();
            for j in 0..horizons.len() {
                if j == i {
                    continue;
                }
                let pj = horizons[j].column(k).into_owned();
                let ellipse = &self.ellipses[j];
                let radius = match self.method {
                    CollisionMethod::OnDemand => ellipse.rmin,
                    CollisionMethod::Bvc => BVC_DILATION * ellipse.rmin,
                };
                if ellipse.distance(&pi, &pj) < radius {
                    pairs.push((k, j));
                }
            }
        }

        if pairs.is_empty() {
            return CollisionConstraint::empty(num_vars);
        }

        let mut a = DMat::zeros(pairs.len(), num_vars);
        let mut b = DVec::zeros(pairs.len());
        let mut slack_scale = DVec::zeros(pairs.len());

        for (row, &(k, j)) in pairs.iter().enumerate() {
            let pi = horizons[i].column(k).into_owned();
            let pj = horizons[j].column(k).into_owned();
            let ellipse = &self.ellipses[j];

            let d = ellipse.distance(&pi, &pj);
            let grad = ellipse.gradient(&pi, &pj);
            let d_pow = d.powi(ellipse.order - 1);

            for col in 0..num_vars {
                let mut acc = 0.0;
                for axis in 0..3 {
                    acc += grad[axis] * phi_pos[(3 * k + axis, col)];
                }
                a[(row, col)] = -acc;
            }
            b[row] = -d_pow * (ellipse.rmin - d) - grad.dot(&pi);
            slack_scale[row] = d_pow;
        }

        CollisionConstraint { a, b, slack_scale }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
