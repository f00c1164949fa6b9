//! Per-agent receding-horizon solve: cost assembly, QP call, extraction.
//!
//! # One solve, step by step
//! 1. Pick the flight mode from the minimum neighbour distance along the
//!    previous horizon (free / obstacle-present / repulsion).
//! 2. Build the collision block from the active avoider and widen the
//!    decision vector with one slack per collision row.
//! 3. Assemble H, f, A_eq, A_in around the precomputed Bézier basis.
//! 4. Solve; on success sample the new horizon (Φ_pos) and the executed
//!    setpoint window (Φ_input). On failure keep the previous horizon and
//!    hold position — the QP is soft in its collision rows, so failures are
//!    numerical, not structural.

use crate::avoidance::{Avoider, BVC_DILATION};
use crate::bezier::BezierBasis;
use crate::qp::{self, QpProblem};
use crate::types::{DMat, DVec, Horizon, State3D, Vec3};
use nalgebra::Matrix3xX;
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Cost weights of the per-agent QP.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TuningParams {
    /// Goal-tracking weight per flight mode
    pub s_free: f64,
    pub s_obs: f64,
    pub s_repel: f64,
    /// Curve-energy scale per flight mode
    pub spd_f: f64,
    pub spd_o: f64,
    pub spd_r: f64,
    /// Linear and quadratic slack penalties of the soft collision rows
    pub lin_coll: f64,
    pub quad_coll: f64,
    /// Weight on ∫‖p̈‖²dt inside the energy Gram
    pub acc_cost: f64,
}

/// Hard per-step bounds on the planned curve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PhysicalLimits {
    pub pmin: Vec3,
    pub pmax: Vec3,
    pub amin: Vec3,
    pub amax: Vec3,
}

/// Receding-horizon timing plus tuning.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MpcParams {
    /// Replan period / horizon step, seconds
    pub h: f64,
    /// Dynamics micro-step, seconds
    pub ts: f64,
    /// Horizon length in steps of `h`
    pub k_hor: usize,
    pub tuning: TuningParams,
    pub limits: PhysicalLimits,
}

/// Goal-tracking aggressiveness, selected per agent per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightMode {
    /// No neighbour inside the proactive radius
    Free,
    /// A neighbour inside 3·rmin: track softer, smooth harder
    Obstacle,
    /// A neighbour inside rmin along the previous horizon
    Repel,
}

/// Pick the mode from the minimum ellipsoidal neighbour distance.
pub fn flight_mode(avoider: &Avoider, agent: usize, horizons: &[Horizon]) -> FlightMode {
    let dmin = avoider.min_neighbour_distance(agent, horizons);
    let rmin = avoider.ellipse(agent).rmin;
    if dmin < rmin {
        FlightMode::Repel
    } else if dmin < BVC_DILATION * rmin {
        FlightMode::Obstacle
    } else {
        FlightMode::Free
    }
}

// ---------------------------------------------------------------------------
// Solve
// ---------------------------------------------------------------------------

/// Output of one per-agent solve.
#[derive(Clone, Debug)]
pub struct AgentSolution {
    /// 3 × k_hor predicted positions
    pub horizon: Horizon,
    /// 3 × (h/ts) position setpoints executed until the next replan
    pub inputs: Matrix3xX<f64>,
    /// False when the QP failed and the fallback was taken
    pub solved: bool,
}

/// Solve agent `i` against the frozen horizon snapshot.
pub fn solve_agent(
    i: usize,
    state: &State3D,
    goal: &Vec3,
    horizons: &[Horizon],
    basis: &BezierBasis,
    avoider: &Avoider,
    mpc: &MpcParams,
) -> AgentSolution {
    let problem = assemble(i, state, goal, horizons, basis, avoider, mpc);

    match qp::solve(&problem) {
        Ok(x) => {
            let n_x = basis.params.num_vars();
            let cp = x.rows(0, n_x).into_owned();
            let stacked_pos = &basis.phi_pos * &cp;
            let stacked_input = &basis.phi_input * &cp;
            AgentSolution {
                horizon: unstack(&stacked_pos, basis.k_hor),
                inputs: unstack(&stacked_input, basis.input_steps),
                solved: true,
            }
        }
        Err(e) => {
            warn!(agent = i, error = %e, "qp fallback: keeping previous horizon, holding position");
            hold_solution(state, &horizons[i], basis.input_steps)
        }
    }
}

/// Fallback: previous horizon unchanged, setpoints pinned to the current
/// position (the closed-loop model brakes toward a held setpoint).
fn hold_solution(state: &State3D, previous: &Horizon, input_steps: usize) -> AgentSolution {
    AgentSolution {
        horizon: previous.clone(),
        inputs: Matrix3xX::from_fn(input_steps, |r, _| state.pos[r]),
        solved: false,
    }
}

fn unstack(stacked: &DVec, cols: usize) -> Matrix3xX<f64> {
    Matrix3xX::from_fn(cols, |r, c| stacked[3 * c + r])
}

fn assemble(
    i: usize,
    state: &State3D,
    goal: &Vec3,
    horizons: &[Horizon],
    basis: &BezierBasis,
    avoider: &Avoider,
    mpc: &MpcParams,
) -> QpProblem {
    let tune = &mpc.tuning;
    let (s, spd) = match flight_mode(avoider, i, horizons) {
        FlightMode::Free => (tune.s_free, tune.spd_f),
        FlightMode::Obstacle => (tune.s_obs, tune.spd_o),
        FlightMode::Repel => (tune.s_repel, tune.spd_r),
    };

    let collision = avoider.constraint_rows(i, horizons, &basis.phi_pos);
    let n_x = basis.params.num_vars();
    let n_c = collision.num_rows();
    let n = n_x + n_c;
    let k = basis.k_hor;

    // ----- cost -----------------------------------------------------------
    let phi_t = basis.phi_pos.transpose();
    let mut h = DMat::zeros(n, n);
    let mut f = DVec::zeros(n);

    let quad_cp = (&phi_t * &basis.phi_pos) * (2.0 * s) + &basis.q_energy * (2.0 * spd);
    for r in 0..n_x {
        for c in 0..n_x {
            h[(r, c)] = quad_cp[(r, c)];
        }
    }

    let goal_tiled = DVec::from_fn(3 * k, |r, _| goal[r % 3]);
    let lin_cp = (&phi_t * &goal_tiled) * (-2.0 * s);
    for r in 0..n_x {
        f[r] = lin_cp[r];
    }

    for r in 0..n_c {
        h[(n_x + r, n_x + r)] = 2.0 * tune.quad_coll;
        f[n_x + r] = tune.lin_coll;
    }

    // ----- equalities: initial state + inter-segment continuity -----------
    let n_cont = basis.a_cont.nrows();
    let mut a_eq = DMat::zeros(6 + n_cont, n);
    let mut b_eq = DVec::zeros(6 + n_cont);
    for c in 0..n_x {
        for r in 0..6 {
            a_eq[(r, c)] = basis.a_init[(r, c)];
        }
        for r in 0..n_cont {
            a_eq[(6 + r, c)] = basis.a_cont[(r, c)];
        }
    }
    for axis in 0..3 {
        b_eq[axis] = state.pos[axis];
        b_eq[3 + axis] = state.vel[axis];
    }

    // ----- inequalities: boxes, then soft collision rows, then s ≥ 0 ------
    let rows = 12 * k + 2 * n_c;
    let mut a_in = DMat::zeros(rows, n);
    let mut b_in = DVec::zeros(rows);
    let limits = &mpc.limits;

    for sample in 0..3 * k {
        let axis = sample % 3;
        for c in 0..n_x {
            let pos = basis.phi_pos[(sample, c)];
            let acc = basis.phi_acc[(sample, c)];
            a_in[(sample, c)] = pos;
            a_in[(3 * k + sample, c)] = -pos;
            a_in[(6 * k + sample, c)] = acc;
            a_in[(9 * k + sample, c)] = -acc;
        }
        b_in[sample] = limits.pmax[axis];
        b_in[3 * k + sample] = -limits.pmin[axis];
        b_in[6 * k + sample] = limits.amax[axis];
        b_in[9 * k + sample] = -limits.amin[axis];
    }

    let coll_base = 12 * k;
    for r in 0..n_c {
        for c in 0..n_x {
            a_in[(coll_base + r, c)] = collision.a[(r, c)];
        }
        a_in[(coll_base + r, n_x + r)] = -collision.slack_scale[r];
        b_in[coll_base + r] = collision.b[r];
        // s ≥ 0
        a_in[(coll_base + n_c + r, n_x + r)] = -1.0;
    }

    QpProblem {
        h,
        f,
        a_in,
        b_in,
        a_eq,
        b_eq,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avoidance::CollisionMethod;
    use crate::bezier::BezierParams;
    use crate::types::EllipseParams;
    use approx::assert_abs_diff_eq;

    const K_HOR: usize = 8;

    fn test_basis(acc_cost: f64) -> BezierBasis {
        let params = BezierParams {
            d: 5,
            num_segments: 2,
            dim: 3,
            deg_poly: 2,
            t_segment: 1.0,
        };
        let mut w = vec![0.0; 6];
        w[2] = acc_cost;
        BezierBasis::new(params, K_HOR, 0.2, 0.005, &w)
    }

    fn test_mpc() -> MpcParams {
        MpcParams {
            h: 0.2,
            ts: 0.005,
            k_hor: K_HOR,
            tuning: TuningParams {
                s_free: 100.0,
                s_obs: 100.0,
                s_repel: 1000.0,
                spd_f: 3.0,
                spd_o: 1.0,
                spd_r: 10.0,
                lin_coll: 1.0e5,
                quad_coll: 5.0e3,
                acc_cost: 0.5,
            },
            limits: PhysicalLimits {
                pmin: Vec3::new(-5.0, -5.0, 0.0),
                pmax: Vec3::new(5.0, 5.0, 2.5),
                amin: Vec3::new(-5.0, -5.0, -5.0),
                amax: Vec3::new(5.0, 5.0, 5.0),
            },
        }
    }

    fn tiled(pos: [f64; 3]) -> Horizon {
        Horizon::from_fn(K_HOR, |r, _| pos[r])
    }

    fn spherical(n: usize, rmin: f64) -> Vec<EllipseParams> {
        vec![
            EllipseParams {
                order: 2,
                rmin,
                height_scaling: 1.0,
            };
            n
        ]
    }

    #[test]
    fn coincident_start_and_goal_stays_put() {
        let basis = test_basis(0.5);
        let avoider = Avoider::new(CollisionMethod::OnDemand, &spherical(1, 0.5));
        let here = Vec3::new(0.3, -0.2, 1.0);
        let horizons = vec![Horizon::from_fn(K_HOR, |r, _| here[r])];
        let sol = solve_agent(
            0,
            &State3D::at_rest(here),
            &here,
            &horizons,
            &basis,
            &avoider,
            &test_mpc(),
        );
        assert!(sol.solved);
        for c in 0..K_HOR {
            assert_abs_diff_eq!((sol.horizon.column(c) - here).norm(), 0.0, epsilon = 1e-3);
        }
        for c in 0..basis.input_steps {
            assert_abs_diff_eq!((sol.inputs.column(c) - here).norm(), 0.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn free_flight_moves_toward_the_goal() {
        let basis = test_basis(0.5);
        let avoider = Avoider::new(CollisionMethod::OnDemand, &spherical(1, 0.5));
        let start = Vec3::new(0.0, 0.0, 1.0);
        let goal = Vec3::new(1.0, 0.0, 1.0);
        let horizons = vec![tiled([0.0, 0.0, 1.0])];
        let sol = solve_agent(
            0,
            &State3D::at_rest(start),
            &goal,
            &horizons,
            &basis,
            &avoider,
            &test_mpc(),
        );
        assert!(sol.solved);
        let end = sol.horizon.column(K_HOR - 1).into_owned();
        assert!(
            (end - goal).norm() < 0.25,
            "horizon should close most of the 1 m gap, ended at {end:?}"
        );
        // the very first sample is pinned to the initial state
        assert_abs_diff_eq!((sol.horizon.column(0) - start).norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn horizon_respects_the_position_box() {
        let basis = test_basis(0.5);
        let avoider = Avoider::new(CollisionMethod::OnDemand, &spherical(1, 0.5));
        let start = Vec3::new(4.5, 0.0, 1.0);
        // goal outside the workspace: the box must clip the plan
        let goal = Vec3::new(8.0, 0.0, 1.0);
        let horizons = vec![tiled([4.5, 0.0, 1.0])];
        let mpc = test_mpc();
        let sol = solve_agent(
            0,
            &State3D::at_rest(start),
            &goal,
            &horizons,
            &basis,
            &avoider,
            &mpc,
        );
        assert!(sol.solved);
        for c in 0..K_HOR {
            assert!(sol.horizon[(0, c)] <= mpc.limits.pmax[0] + 1e-4);
        }
    }

    #[test]
    fn flight_mode_thresholds() {
        let avoider = Avoider::new(CollisionMethod::OnDemand, &spherical(2, 0.5));
        let far = vec![tiled([0.0, 0.0, 1.0]), tiled([4.0, 0.0, 1.0])];
        assert_eq!(flight_mode(&avoider, 0, &far), FlightMode::Free);
        let near = vec![tiled([0.0, 0.0, 1.0]), tiled([1.0, 0.0, 1.0])];
        assert_eq!(flight_mode(&avoider, 0, &near), FlightMode::Obstacle);
        let overlapping = vec![tiled([0.0, 0.0, 1.0]), tiled([0.3, 0.0, 1.0])];
        assert_eq!(flight_mode(&avoider, 0, &overlapping), FlightMode::Repel);
    }
}
