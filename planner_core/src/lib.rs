//! `planner_core` — Distributed MPC trajectory generation for agent teams.
//!
//! # Module layout
//! - [`types`]        — Fundamental types (states, ellipsoids, matrix aliases)
//! - [`model`]        — Closed-loop vehicle response (discrete second-order)
//! - [`bezier`]       — Piecewise Bézier basis: sampling, continuity, energy
//! - [`qp`]           — Dense convex QP in standard form (interior-point)
//! - [`avoidance`]    — On-Demand / BVC linearized collision constraints
//! - [`solver`]       — Per-agent cost assembly, solve, fallback
//! - [`generator`]    — Replan-tick orchestrator, goal motion, publication
//! - [`assignment`]   — Hungarian solver on dense cost matrices
//! - [`reallocation`] — Periodic optimal goal re-assignment + CSV log

pub mod assignment;
pub mod avoidance;
pub mod bezier;
pub mod generator;
pub mod model;
pub mod qp;
pub mod reallocation;
pub mod solver;
pub mod types;

pub use avoidance::{Avoider, CollisionMethod};
pub use bezier::{BezierBasis, BezierParams};
pub use generator::{Generator, GeneratorParams, GoalMotion};
pub use model::{DoubleIntegrator3D, ModelParams};
pub use reallocation::{ReallocationConfig, ReallocationManager, ReallocationMode};
pub use solver::{MpcParams, PhysicalLimits, TuningParams};
pub use types::{Ellipse, EllipseParams, Horizon, State3D, Vec3};
