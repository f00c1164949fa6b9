//! Simulation loop: replan ticks at period `h`, dynamics micro-steps at
//! `ts`, process noise, task reallocation, and post-run audits.
//!
//! The simulator owns the states, the trajectory records and the
//! reallocation manager; the generator owns solvers and horizons. All
//! randomness flows through one seeded ChaCha8 stream, so a run is fully
//! reproducible from (config, seed).

use crate::config::{Config, TestKind};
use crate::output::{self, TrajectoryData};
use anyhow::{bail, Context, Result};
use nalgebra::Matrix3xX;
use planner_core::generator::Generator;
use planner_core::model::DoubleIntegrator3D;
use planner_core::reallocation::ReallocationManager;
use planner_core::types::{Ellipse, State3D, Vec3};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use std::time::Instant;
use tracing::{debug, info};

/// Attempts per point before random placement gives up.
const MAX_PLACEMENT_ATTEMPTS: usize = 2000;

/// One pair that dipped under the audit separation.
#[derive(Clone, Debug)]
pub struct CollisionViolation {
    pub agent_i: usize,
    pub agent_j: usize,
    pub min_distance: f64,
    /// Time of the closest approach, seconds
    pub time: f64,
}

/// One agent that ended away from its assigned goal.
#[derive(Clone, Debug)]
pub struct GoalMiss {
    pub agent: usize,
    pub distance: f64,
}

pub struct Simulator {
    config: Config,
    generator: Generator,
    model: DoubleIntegrator3D,
    reallocation: Option<ReallocationManager>,
    rng: ChaCha8Rng,
    noise_pos: Normal<f64>,
    noise_vel: Normal<f64>,
    states: Vec<State3D>,
    /// Immutable goal base points; the assignment permutes over these
    original_goals: Vec<Vec3>,
    assignment: Vec<usize>,
    po: Vec<Vec3>,
    pf: Vec<Vec3>,
    trajectories: Vec<Matrix3xX<f64>>,
    goal_trajectories: Vec<Matrix3xX<f64>>,
}

impl Simulator {
    pub fn new(config: Config, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let (po, pf): (Vec<Vec3>, Vec<Vec3>) = match config.test {
            TestKind::Default => (
                config.po.iter().map(|p| Vec3::from_row_slice(p)).collect(),
                config.pf.iter().map(|p| Vec3::from_row_slice(p)).collect(),
            ),
            TestKind::Random => {
                let margin = Vec3::from_element(0.3);
                let pmin = config.pmin() + margin;
                let pmax = config.pmax() - margin;
                let separation = config.rmin + 0.2;
                (
                    scatter_points(&mut rng, config.n, &pmin, &pmax, separation)
                        .context("placing start positions")?,
                    scatter_points(&mut rng, config.ncmd, &pmin, &pmax, separation)
                        .context("placing goal positions")?,
                )
            }
        };

        let noise_pos = Normal::new(0.0, config.std_position)
            .context("position noise distribution")?;
        let noise_vel = Normal::new(0.0, config.std_velocity)
            .context("velocity noise distribution")?;

        let generator = Generator::new(config.generator_params(po.clone(), pf.clone()));
        let model = DoubleIntegrator3D::new(config.ts, &config.model_params());

        let reallocation = match config.reallocation_config() {
            Some(realloc_config) => {
                info!(
                    period = realloc_config.period,
                    "task reallocation enabled"
                );
                Some(
                    ReallocationManager::new(realloc_config, config.ncmd)
                        .context("opening the reallocation log")?,
                )
            }
            None => {
                info!("task reallocation disabled");
                None
            }
        };

        let mut states: Vec<State3D> = po[..config.ncmd]
            .iter()
            .map(|p| State3D::at_rest(*p))
            .collect();
        for state in &mut states {
            *state = add_noise(&mut rng, &noise_pos, &noise_vel, *state);
        }

        Ok(Self {
            assignment: (0..config.ncmd).collect(),
            original_goals: pf.clone(),
            generator,
            model,
            reallocation,
            rng,
            noise_pos,
            noise_vel,
            states,
            po,
            pf,
            trajectories: Vec::new(),
            goal_trajectories: Vec::new(),
            config,
        })
    }

    /// Run for `simulation_duration` seconds.
    pub fn run(&mut self) -> Result<()> {
        let duration = f64::from(self.config.simulation_duration);
        let ts = self.config.ts;
        let k_total = (duration / ts).floor() as usize;
        let m = (self.config.h / ts).round() as usize;
        let ncmd = self.config.ncmd;

        self.trajectories = vec![Matrix3xX::zeros(k_total); ncmd];
        self.goal_trajectories = vec![Matrix3xX::zeros(k_total); ncmd];

        let mut inputs: Vec<Matrix3xX<f64>> = Vec::new();
        let mut count = m;

        for k in 0..k_total {
            let t = k as f64 * ts;

            if count == m {
                if let Some(manager) = &mut self.reallocation {
                    if manager.should_reallocate(t) {
                        let positions: Vec<Vec3> =
                            self.states.iter().map(|s| s.pos).collect();
                        let changes = manager.update_assignment(
                            t,
                            &positions,
                            self.generator.predicted_horizons(),
                            &self.original_goals,
                            ts,
                            &mut self.assignment,
                        )?;
                        for change in &changes {
                            self.generator.set_goal_point(
                                change.agent,
                                self.original_goals[change.new_goal],
                            );
                        }
                    }
                }

                let t0 = Instant::now();
                inputs = self.generator.plan(&self.states, t);
                let elapsed = t0.elapsed().as_secs_f64();
                debug!(
                    time = t,
                    replan_hz = 1.0 / elapsed.max(1e-9),
                    "replan tick"
                );
                count = 0;
            }

            let goals = self.generator.next_goals().to_vec();
            for i in 0..ncmd {
                let u = inputs[i].column(count).into_owned();
                let advanced = self.model.advance(&self.states[i], &u);
                self.states[i] =
                    add_noise(&mut self.rng, &self.noise_pos, &self.noise_vel, advanced);
                self.trajectories[i].set_column(k, &self.states[i].pos);
                self.goal_trajectories[i].set_column(k, &goals[i]);
            }
            count += 1;
        }

        if let Some(manager) = &self.reallocation {
            info!(events = manager.event_count(), "reallocation events");
        }
        Ok(())
    }

    /// Pairwise ellipsoidal separation audit over the recorded trajectories.
    pub fn collision_audit(&self) -> Vec<CollisionViolation> {
        let ellipse = Ellipse::new(&self.config.audit_ellipse());
        let mut violations = Vec::new();
        let ncmd = self.config.ncmd;

        for i in 0..ncmd {
            for j in (i + 1)..ncmd {
                let mut min_distance = f64::INFINITY;
                let mut at_step = 0;
                for k in 0..self.trajectories[i].ncols() {
                    let pi = self.trajectories[i].column(k).into_owned();
                    let pj = self.trajectories[j].column(k).into_owned();
                    let d = ellipse.distance(&pi, &pj);
                    if d < min_distance {
                        min_distance = d;
                        at_step = k;
                    }
                }
                if min_distance < ellipse.rmin {
                    violations.push(CollisionViolation {
                        agent_i: i,
                        agent_j: j,
                        min_distance,
                        time: at_step as f64 * self.config.ts,
                    });
                }
            }
        }
        violations
    }

    /// Final distance of every agent to its *assigned* goal.
    pub fn goal_audit(&self) -> Vec<GoalMiss> {
        let goals = self.generator.next_goals();
        let mut misses = Vec::new();
        for (i, state) in self.states.iter().enumerate() {
            let distance = (state.pos - goals[i]).norm();
            if distance > self.config.goal_tolerance {
                misses.push(GoalMiss { agent: i, distance });
            }
        }
        misses
    }

    /// Print both audits to stdout; never fails the run.
    pub fn report_audits(&self) {
        let violations = self.collision_audit();
        if violations.is_empty() {
            println!("No collisions found!");
        } else {
            for v in &violations {
                println!(
                    "Collision constraint violation: vehicles {} and {} got {:.4} m apart at t = {:.2} s",
                    v.agent_i, v.agent_j, v.min_distance, v.time
                );
            }
        }

        let misses = self.goal_audit();
        if misses.is_empty() {
            println!("All vehicles reached their goals!");
        } else {
            for miss in &misses {
                println!(
                    "Vehicle {} did not reach its goal, off by {:.3} m",
                    miss.agent, miss.distance
                );
            }
        }
    }

    /// Write the trajectory file to every configured path.
    pub fn save_trajectories(&self) -> Result<()> {
        let data = self.trajectory_data();
        for path in &self.config.output_trajectories_paths {
            output::save_trajectories(&data, path)?;
            info!(path = %path.display(), "trajectories written");
        }
        Ok(())
    }

    /// Write the goal file to every configured path.
    pub fn save_goals(&self) -> Result<()> {
        for path in &self.config.output_goals_paths {
            output::save_goals(&self.goal_trajectories, path)?;
            info!(path = %path.display(), "goals written");
        }
        Ok(())
    }

    pub fn trajectory_data(&self) -> TrajectoryData {
        TrajectoryData {
            n: self.config.n,
            n_cmd: self.config.ncmd,
            pmin: self.config.pmin(),
            pmax: self.config.pmax(),
            po: self.po.clone(),
            pf: self.pf.clone(),
            trajectories: self.trajectories.clone(),
        }
    }

    pub fn states(&self) -> &[State3D] {
        &self.states
    }

    pub fn assignment(&self) -> &[usize] {
        &self.assignment
    }

    pub fn reallocation_count(&self) -> u32 {
        self.reallocation
            .as_ref()
            .map(|m| m.event_count())
            .unwrap_or(0)
    }

    pub fn trajectories(&self) -> &[Matrix3xX<f64>] {
        &self.trajectories
    }
}

fn add_noise(
    rng: &mut ChaCha8Rng,
    noise_pos: &Normal<f64>,
    noise_vel: &Normal<f64>,
    state: State3D,
) -> State3D {
    let mut out = state;
    for axis in 0..3 {
        out.pos[axis] += noise_pos.sample(rng);
        out.vel[axis] += noise_vel.sample(rng);
    }
    out
}

/// Rejection-sample `count` points inside [pmin, pmax] at pairwise Euclidean
/// separation of at least `separation`. Attempts are capped so a workspace
/// that is too tight fails loudly instead of spinning forever.
fn scatter_points(
    rng: &mut ChaCha8Rng,
    count: usize,
    pmin: &Vec3,
    pmax: &Vec3,
    separation: f64,
) -> Result<Vec<Vec3>> {
    let mut points: Vec<Vec3> = Vec::with_capacity(count);
    let span = pmax - pmin;

    for index in 0..count {
        let mut placed = false;
        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let candidate = Vec3::from_fn(|axis, _| pmin[axis] + span[axis] * rng.gen::<f64>());
            if points
                .iter()
                .all(|p| (p - candidate).norm() > separation)
            {
                points.push(candidate);
                placed = true;
                break;
            }
        }
        if !placed {
            bail!(
                "could not place point {index} of {count} at separation {separation} \
                 within the workspace after {MAX_PLACEMENT_ATTEMPTS} attempts"
            );
        }
    }
    Ok(points)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scatter_respects_separation() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pmin = Vec3::new(-2.0, -2.0, 0.5);
        let pmax = Vec3::new(2.0, 2.0, 2.0);
        let points = scatter_points(&mut rng, 12, &pmin, &pmax, 0.5).expect("fits");
        assert_eq!(points.len(), 12);
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                assert!((points[i] - points[j]).norm() > 0.5);
            }
            for axis in 0..3 {
                assert!(points[i][axis] >= pmin[axis] && points[i][axis] <= pmax[axis]);
            }
        }
    }

    #[test]
    fn impossible_scatter_fails_instead_of_spinning() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let pmin = Vec3::new(0.0, 0.0, 0.0);
        let pmax = Vec3::new(0.4, 0.4, 0.4);
        // a 0.4 m cube cannot hold 50 points 0.3 m apart
        let result = scatter_points(&mut rng, 50, &pmin, &pmax, 0.3);
        assert!(result.is_err());
    }

    #[test]
    fn scatter_is_deterministic_per_seed() {
        let pmin = Vec3::new(-1.0, -1.0, 0.0);
        let pmax = Vec3::new(1.0, 1.0, 1.0);
        let a = scatter_points(&mut ChaCha8Rng::seed_from_u64(3), 5, &pmin, &pmax, 0.2)
            .expect("fits");
        let b = scatter_points(&mut ChaCha8Rng::seed_from_u64(3), 5, &pmin, &pmax, 0.2)
            .expect("fits");
        assert_eq!(a, b);
    }
}
