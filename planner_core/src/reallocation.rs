//! Task reallocation: periodic re-solve of the agent↔goal matching.
//!
//! Every `period` seconds the manager rebuilds a dense cost matrix, either
//! reactive (current positions) or predictive (horizon-sampled positions),
//! solves it with the Hungarian algorithm, and commits the result only when
//! the permutation actually changed. Commits are logged to an append-only
//! CSV and flushed immediately, so an interrupted run still leaves an
//! analyzable trail. Between commits the manager is a pure function of its
//! inputs: solving twice at the same time with the same data yields the same
//! assignment.

use crate::assignment;
use crate::types::{DMat, Horizon, Vec3};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

/// Where the cost matrix samples each agent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReallocationMode {
    /// Distance from the agent's current position
    Reactive,
    /// Distance from the predicted position `lookahead` seconds ahead,
    /// clamped to the end of the horizon
    Predictive { lookahead: f64 },
}

impl ReallocationMode {
    fn label(&self) -> &'static str {
        match self {
            ReallocationMode::Reactive => "reactive",
            ReallocationMode::Predictive { .. } => "predictive",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReallocationConfig {
    /// Seconds between reallocation events
    pub period: f64,
    pub mode: ReallocationMode,
    /// When true the first event fires at t = 0, otherwise at t = period
    pub start_immediately: bool,
    pub log_path: PathBuf,
}

/// One changed agent within a committed reallocation event.
#[derive(Clone, Debug)]
pub struct AssignmentChange {
    pub agent: usize,
    pub old_goal: usize,
    pub new_goal: usize,
    /// Distance from the agent's current position to its new goal
    pub distance: f64,
}

/// Periodic optimal re-assignment of goals to agents.
pub struct ReallocationManager {
    config: ReallocationConfig,
    last_time: f64,
    event_count: u32,
    committed: Vec<usize>,
    log: BufWriter<File>,
}

impl ReallocationManager {
    /// Open the CSV log and start from the identity assignment.
    pub fn new(config: ReallocationConfig, n_cmd: usize) -> std::io::Result<Self> {
        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut log = BufWriter::new(File::create(&config.log_path)?);
        writeln!(
            log,
            "timestamp,reallocation_id,agent_id,old_goal,new_goal,distance,method"
        )?;
        log.flush()?;
        let last_time = if config.start_immediately {
            -config.period
        } else {
            0.0
        };
        Ok(Self {
            config,
            last_time,
            event_count: 0,
            committed: (0..n_cmd).collect(),
            log,
        })
    }

    pub fn should_reallocate(&self, t: f64) -> bool {
        t - self.last_time >= self.config.period
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    /// Build the mode's cost matrix over the commanded agents.
    fn cost_matrix(&self, positions: &[Vec3], horizons: &[Horizon], goals: &[Vec3], ts: f64) -> DMat {
        let n = positions.len();
        match self.config.mode {
            ReallocationMode::Reactive => {
                DMat::from_fn(n, n, |i, j| (positions[i] - goals[j]).norm())
            }
            ReallocationMode::Predictive { lookahead } => {
                let step = (lookahead / ts).round() as usize;
                DMat::from_fn(n, n, |i, j| {
                    let last = horizons[i].ncols() - 1;
                    let sampled = horizons[i].column(step.min(last)).into_owned();
                    (sampled - goals[j]).norm()
                })
            }
        }
    }

    /// Re-solve the matching at time `t`. When the optimum differs from the
    /// committed assignment, write `assignment`, log every change, and
    /// return them; otherwise return an empty list. Callers gate on
    /// [`should_reallocate`] — calling early is a no-op.
    pub fn update_assignment(
        &mut self,
        t: f64,
        positions: &[Vec3],
        horizons: &[Horizon],
        goals: &[Vec3],
        ts: f64,
        assignment: &mut Vec<usize>,
    ) -> std::io::Result<Vec<AssignmentChange>> {
        if !self.should_reallocate(t) {
            return Ok(Vec::new());
        }

        let cost = self.cost_matrix(positions, horizons, goals, ts);
        let proposed = assignment::solve(&cost);

        if proposed == self.committed {
            return Ok(Vec::new());
        }

        self.event_count += 1;
        info!(
            time = t,
            event = self.event_count,
            total_cost = assignment::total_cost(&cost, &proposed),
            method = self.config.mode.label(),
            "reallocation committed"
        );

        let mut changes = Vec::new();
        for i in 0..proposed.len() {
            let (old_goal, new_goal) = (self.committed[i], proposed[i]);
            if old_goal != new_goal {
                let distance = (positions[i] - goals[new_goal]).norm();
                writeln!(
                    self.log,
                    "{t},{},{i},{old_goal},{new_goal},{distance},{}",
                    self.event_count,
                    self.config.mode.label()
                )?;
                changes.push(AssignmentChange {
                    agent: i,
                    old_goal,
                    new_goal,
                    distance,
                });
            }
        }
        self.log.flush()?;

        self.committed = proposed.clone();
        *assignment = proposed;
        self.last_time = t;
        Ok(changes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
