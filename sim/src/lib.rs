//! `sim` — Simulation harness around `planner_core`.
//!
//! # Module layout
//! - [`config`]    — JSON configuration document (serde model + validation)
//! - [`simulator`] — Tick loop, process noise, reallocation, audits
//! - [`output`]    — Trajectory / goal result files (text matrices)

pub mod config;
pub mod output;
pub mod simulator;

pub use config::Config;
pub use simulator::Simulator;
