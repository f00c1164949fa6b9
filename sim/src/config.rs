//! Configuration document: the JSON schema consumed at startup.
//!
//! Field names follow the document keys exactly (including the historical
//! `_use_predictive`); optional keys carry the same defaults the original
//! configs relied on. Startup is the only place a bad document can fail,
//! and it fails loudly via `anyhow` — nothing downstream re-validates.

use anyhow::{ensure, Context, Result};
use planner_core::bezier::BezierParams;
use planner_core::generator::{GeneratorParams, GoalMotion};
use planner_core::model::ModelParams;
use planner_core::reallocation::{ReallocationConfig, ReallocationMode};
use planner_core::solver::{MpcParams, PhysicalLimits, TuningParams};
use planner_core::types::{EllipseParams, Vec3};
use planner_core::CollisionMethod;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Which QP backend runs the per-agent solves. `"qpoases"` is accepted as a
/// legacy alias from older configuration files and maps to the same
/// interior-point backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum SolverKind {
    #[serde(rename = "pdipm", alias = "qpoases")]
    Pdipm,
}

/// Start/goal placement mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// Positions are read from `po` / `pf`
    Default,
    /// Positions are rejection-sampled inside the workspace
    Random,
}

/// Goal motion profile selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionKind {
    Static,
    Translation,
    Circular,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Total bodies; the first `Ncmd` are commanded, the rest are static
    /// obstacles
    #[serde(rename = "N")]
    pub n: usize,
    #[serde(rename = "Ncmd")]
    pub ncmd: usize,
    /// Start positions, one 3-vector per body (required for `test: default`)
    #[serde(default)]
    pub po: Vec<[f64; 3]>,
    /// Goal positions of the commanded agents
    #[serde(default)]
    pub pf: Vec<[f64; 3]>,

    pub solver: SolverKind,
    #[serde(default = "default_collision_method")]
    pub collision_method: CollisionMethod,

    // Bézier curve
    pub d: usize,
    pub num_segments: usize,
    pub dim: usize,
    pub deg_poly: usize,
    pub t_segment: f64,

    // Vehicle response model
    pub zeta_xy: f64,
    pub tau_xy: f64,
    pub zeta_z: f64,
    pub tau_z: f64,

    // MPC timing
    pub h: f64,
    pub ts: f64,
    pub k_hor: usize,

    // MPC weights
    pub s_free: f64,
    pub s_obs: f64,
    pub s_repel: f64,
    pub spd_f: f64,
    pub spd_o: f64,
    pub spd_r: f64,
    pub lin_coll: f64,
    pub quad_coll: f64,
    pub acc_cost: f64,

    // Physical limits
    pub pmin: [f64; 3],
    pub pmax: [f64; 3],
    pub amin: [f64; 3],
    pub amax: [f64; 3],

    // Collision geometry: commanded agents, then uncommanded obstacles
    pub order: i32,
    pub rmin: f64,
    pub height_scaling: f64,
    pub order_obs: i32,
    pub rmin_obs: f64,
    pub height_scaling_obs: f64,

    // Process noise
    pub std_position: f64,
    pub std_velocity: f64,

    pub test: TestKind,

    // Goal motion
    #[serde(default = "default_motion_type")]
    pub motion_type: MotionKind,
    #[serde(default = "default_goal_circular_radius")]
    pub goal_circular_radius: f64,
    #[serde(default = "default_goal_circular_omega")]
    pub goal_circular_omega: f64,
    #[serde(default = "default_goal_translation_velocity")]
    pub goal_translation_velocity: f64,

    // Task reallocation
    #[serde(default)]
    pub reallocation_enabled: bool,
    #[serde(default = "default_reallocation_period")]
    pub reallocation_period: f64,
    #[serde(rename = "_use_predictive", default)]
    pub use_predictive: bool,
    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon: f64,
    /// When true the first reallocation event may fire at t = 0; otherwise
    /// the first opportunity is t = reallocation_period
    #[serde(default)]
    pub reallocation_start_immediately: bool,
    #[serde(default = "default_reallocation_log_path")]
    pub reallocation_log_path: PathBuf,

    // Post-run audits
    #[serde(default = "default_collision_check_rmin")]
    pub collision_check_rmin: f64,
    #[serde(default = "default_collision_check_order")]
    pub collision_check_order: i32,
    #[serde(default = "default_collision_check_height_scaling")]
    pub collision_check_height_scaling: f64,
    #[serde(default = "default_goal_tolerance")]
    pub goal_tolerance: f64,

    // Duration and outputs
    #[serde(default = "default_simulation_duration")]
    pub simulation_duration: u32,
    #[serde(default = "default_trajectories_paths")]
    pub output_trajectories_paths: Vec<PathBuf>,
    #[serde(default = "default_goals_paths")]
    pub output_goals_paths: Vec<PathBuf>,
}

fn default_collision_method() -> CollisionMethod {
    CollisionMethod::OnDemand
}
fn default_motion_type() -> MotionKind {
    MotionKind::Circular
}
fn default_goal_circular_radius() -> f64 {
    2.0
}
fn default_goal_circular_omega() -> f64 {
    0.5
}
fn default_goal_translation_velocity() -> f64 {
    0.5
}
fn default_reallocation_period() -> f64 {
    2.0
}
fn default_prediction_horizon() -> f64 {
    1.0
}
fn default_reallocation_log_path() -> PathBuf {
    PathBuf::from("reallocation_log.csv")
}
fn default_collision_check_rmin() -> f64 {
    0.15
}
fn default_collision_check_order() -> i32 {
    2
}
fn default_collision_check_height_scaling() -> f64 {
    3.0
}
fn default_goal_tolerance() -> f64 {
    0.1
}
fn default_simulation_duration() -> u32 {
    75
}
fn default_trajectories_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("results/trajectories.txt")]
}
fn default_goals_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("results/goals.txt")]
}

impl Config {
    /// Load and validate a configuration document.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.dim == 3, "dim must be 3, got {}", self.dim);
        ensure!(
            self.ncmd >= 1 && self.ncmd <= self.n,
            "Ncmd must satisfy 1 <= Ncmd <= N ({} vs {})",
            self.ncmd,
            self.n
        );
        ensure!(self.d >= 2, "curve degree d must be at least 2");
        ensure!(
            self.deg_poly < self.d,
            "deg_poly ({}) must be below the curve degree ({})",
            self.deg_poly,
            self.d
        );
        ensure!(self.num_segments >= 1, "num_segments must be at least 1");
        ensure!(self.t_segment > 0.0, "t_segment must be positive");
        ensure!(self.h > 0.0 && self.ts > 0.0, "h and ts must be positive");

        let ratio = self.h / self.ts;
        ensure!(
            ratio >= 1.0 && (ratio - ratio.round()).abs() < 1e-9,
            "h must be an integer multiple of ts (h = {}, ts = {})",
            self.h,
            self.ts
        );

        let horizon_span = (self.k_hor.saturating_sub(1)) as f64 * self.h;
        let curve_span = self.num_segments as f64 * self.t_segment;
        ensure!(
            horizon_span <= curve_span + 1e-9,
            "prediction horizon ({horizon_span} s) exceeds the curve span ({curve_span} s)"
        );

        for (name, order) in [("order", self.order), ("order_obs", self.order_obs)] {
            ensure!(
                order >= 2 && order % 2 == 0,
                "{name} must be an even integer >= 2, got {order}"
            );
        }
        ensure!(self.rmin > 0.0 && self.rmin_obs > 0.0, "rmin must be positive");
        ensure!(
            self.std_position >= 0.0 && self.std_velocity >= 0.0,
            "noise standard deviations must be nonnegative"
        );
        ensure!(
            self.reallocation_period > 0.0,
            "reallocation_period must be positive"
        );
        ensure!(
            self.simulation_duration >= 1,
            "simulation_duration must be at least 1 s"
        );

        if self.test == TestKind::Default {
            ensure!(
                self.po.len() == self.n,
                "po must list {} start positions, got {}",
                self.n,
                self.po.len()
            );
            ensure!(
                self.pf.len() == self.ncmd,
                "pf must list {} goal positions, got {}",
                self.ncmd,
                self.pf.len()
            );
        }
        Ok(())
    }

    pub fn pmin(&self) -> Vec3 {
        Vec3::from_row_slice(&self.pmin)
    }

    pub fn pmax(&self) -> Vec3 {
        Vec3::from_row_slice(&self.pmax)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams {
            zeta_xy: self.zeta_xy,
            tau_xy: self.tau_xy,
            zeta_z: self.zeta_z,
            tau_z: self.tau_z,
        }
    }

    pub fn mpc_params(&self) -> MpcParams {
        MpcParams {
            h: self.h,
            ts: self.ts,
            k_hor: self.k_hor,
            tuning: TuningParams {
                s_free: self.s_free,
                s_obs: self.s_obs,
                s_repel: self.s_repel,
                spd_f: self.spd_f,
                spd_o: self.spd_o,
                spd_r: self.spd_r,
                lin_coll: self.lin_coll,
                quad_coll: self.quad_coll,
                acc_cost: self.acc_cost,
            },
            limits: PhysicalLimits {
                pmin: self.pmin(),
                pmax: self.pmax(),
                amin: Vec3::from_row_slice(&self.amin),
                amax: Vec3::from_row_slice(&self.amax),
            },
        }
    }

    /// One footprint per body: commanded agents first, then obstacles.
    pub fn ellipse_params(&self) -> Vec<EllipseParams> {
        let commanded = EllipseParams {
            order: self.order,
            rmin: self.rmin,
            height_scaling: self.height_scaling,
        };
        let obstacle = EllipseParams {
            order: self.order_obs,
            rmin: self.rmin_obs,
            height_scaling: self.height_scaling_obs,
        };
        let mut ellipses = vec![commanded; self.ncmd];
        ellipses.resize(self.n, obstacle);
        ellipses
    }

    /// Geometry used by the post-run collision audit.
    pub fn audit_ellipse(&self) -> EllipseParams {
        EllipseParams {
            order: self.collision_check_order,
            rmin: self.collision_check_rmin,
            height_scaling: self.collision_check_height_scaling,
        }
    }

    pub fn goal_motion(&self) -> GoalMotion {
        match self.motion_type {
            MotionKind::Static => GoalMotion::Static,
            MotionKind::Translation => GoalMotion::Translation {
                velocity: Vec3::new(self.goal_translation_velocity, 0.0, 0.0),
            },
            MotionKind::Circular => GoalMotion::Circular {
                radius: self.goal_circular_radius,
                omega: self.goal_circular_omega,
            },
        }
    }

    /// `None` when reallocation is disabled.
    pub fn reallocation_config(&self) -> Option<ReallocationConfig> {
        if !self.reallocation_enabled {
            return None;
        }
        let mode = if self.use_predictive {
            ReallocationMode::Predictive {
                lookahead: self.prediction_horizon,
            }
        } else {
            ReallocationMode::Reactive
        };
        Some(ReallocationConfig {
            period: self.reallocation_period,
            mode,
            start_immediately: self.reallocation_start_immediately,
            log_path: self.reallocation_log_path.clone(),
        })
    }

    /// Generator construction parameters for the resolved start/goal sets.
    pub fn generator_params(&self, po: Vec<Vec3>, pf: Vec<Vec3>) -> GeneratorParams {
        GeneratorParams {
            bezier: BezierParams {
                d: self.d,
                num_segments: self.num_segments,
                dim: self.dim,
                deg_poly: self.deg_poly,
                t_segment: self.t_segment,
            },
            mpc: self.mpc_params(),
            ellipses: self.ellipse_params(),
            po,
            pf,
            collision_method: self.collision_method,
            goal_motion: self.goal_motion(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
