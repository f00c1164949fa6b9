//! Replan-tick orchestrator.
//!
//! Owns the Bézier basis, the avoider, the per-agent goal assignments and
//! the published predicted horizons. One `plan` call runs every commanded
//! agent's QP against the *previous* tick's horizon snapshot (no intra-tick
//! feedback), then commits all results at once — which keeps a tick
//! deterministic and lets the per-agent solves fan out across worker
//! threads.

use crate::avoidance::{Avoider, CollisionMethod};
use crate::bezier::{BezierBasis, BezierParams};
use crate::solver::{solve_agent, MpcParams};
use crate::types::{EllipseParams, Horizon, State3D, Vec3};
use nalgebra::Matrix3xX;
use rayon::prelude::*;
use tracing::debug;

// ---------------------------------------------------------------------------
// Goal motion
// ---------------------------------------------------------------------------

/// How the goal points move. Evaluated in closed form from each goal's base
/// point, so a goal's trajectory is deterministic and swap-safe: reassigning
/// a base point reassigns the whole moving goal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GoalMotion {
    Static,
    /// Constant drift
    Translation { velocity: Vec3 },
    /// Uniform rotation in the x-y plane, starting at the base point
    Circular { radius: f64, omega: f64 },
}

impl GoalMotion {
    /// Goal position at time `t` for a goal whose base point is `base`.
    pub fn position(&self, base: &Vec3, t: f64) -> Vec3 {
        match *self {
            GoalMotion::Static => *base,
            GoalMotion::Translation { velocity } => base + velocity * t,
            GoalMotion::Circular { radius, omega } => {
                let phase = omega * t;
                base + Vec3::new(radius * (phase.cos() - 1.0), radius * phase.sin(), 0.0)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Everything needed to construct a [`Generator`].
#[derive(Clone, Debug)]
pub struct GeneratorParams {
    pub bezier: BezierParams,
    pub mpc: MpcParams,
    /// One footprint per body: commanded agents first, then obstacles
    pub ellipses: Vec<EllipseParams>,
    /// Start positions of all bodies
    pub po: Vec<Vec3>,
    /// Goal base points of the commanded agents
    pub pf: Vec<Vec3>,
    pub collision_method: CollisionMethod,
    pub goal_motion: GoalMotion,
}

/// Per-tick trajectory generator for the whole team.
pub struct Generator {
    basis: BezierBasis,
    avoider: Avoider,
    mpc: MpcParams,
    n_cmd: usize,
    goal_motion: GoalMotion,
    /// Assigned goal base point per commanded agent
    goal_bases: Vec<Vec3>,
    /// Goal positions refreshed at the last tick
    current_goals: Vec<Vec3>,
    /// Predicted horizons of all bodies; obstacles stay tiled at their start
    horizons: Vec<Horizon>,
}

impl Generator {
    pub fn new(p: GeneratorParams) -> Self {
        let mut energy_weights = vec![0.0; p.bezier.d + 1];
        energy_weights[2] = p.mpc.tuning.acc_cost;
        let basis = BezierBasis::new(p.bezier, p.mpc.k_hor, p.mpc.h, p.mpc.ts, &energy_weights);
        let avoider = Avoider::new(p.collision_method, &p.ellipses);

        let k_hor = p.mpc.k_hor;
        let horizons = p
            .po
            .iter()
            .map(|start| Horizon::from_fn(k_hor, |r, _| start[r]))
            .collect();

        Self {
            basis,
            avoider,
            mpc: p.mpc,
            n_cmd: p.pf.len(),
            goal_motion: p.goal_motion,
            current_goals: p.pf.clone(),
            goal_bases: p.pf,
            horizons,
        }
    }

    pub fn num_commanded(&self) -> usize {
        self.n_cmd
    }

    /// Executed setpoint columns per replan window.
    pub fn input_steps(&self) -> usize {
        self.basis.input_steps
    }

    /// Reassign agent `i`'s goal base point. Takes effect on the next
    /// `plan` call; no horizon or state is invalidated.
    pub fn set_goal_point(&mut self, i: usize, base: Vec3) {
        self.goal_bases[i] = base;
    }

    /// Frozen horizon snapshot from the last tick, all bodies.
    pub fn predicted_horizons(&self) -> &[Horizon] {
        &self.horizons
    }

    /// Goal positions as refreshed by the last `plan` call.
    pub fn next_goals(&self) -> &[Vec3] {
        &self.current_goals
    }

    /// Run one replan tick at time `t`: refresh goals, solve every commanded
    /// agent against the frozen snapshot, publish the new horizons, and
    /// return each agent's executed setpoint window (3 × h/ts).
    pub fn plan(&mut self, states: &[State3D], t: f64) -> Vec<Matrix3xX<f64>> {
        for i in 0..self.n_cmd {
            self.current_goals[i] = self.goal_motion.position(&self.goal_bases[i], t);
        }

        let basis = &self.basis;
        let avoider = &self.avoider;
        let mpc = &self.mpc;
        let horizons = &self.horizons;
        let goals = &self.current_goals;

        let solutions: Vec<_> = (0..self.n_cmd)
            .into_par_iter()
            .map(|i| solve_agent(i, &states[i], &goals[i], horizons, basis, avoider, mpc))
            .collect();

        let failures = solutions.iter().filter(|s| !s.solved).count();
        if failures > 0 {
            debug!(failures, "replan tick completed with fallbacks");
        }

        let mut inputs = Vec::with_capacity(self.n_cmd);
        for (i, sol) in solutions.into_iter().enumerate() {
            if sol.solved {
                self.horizons[i] = sol.horizon;
            }
            inputs.push(sol.inputs);
        }
        inputs
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
