//! End-to-end run of the two-agent antipodal swap: with reallocation
//! enabled, one event at t ≈ T_r swaps the targets and both agents settle
//! near their own start; with reallocation disabled the assignment stays
//! the identity for the whole run.
#![recursion_limit = "256"]

use sim::{Config, Simulator};
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("antipodal_{name}_{}", std::process::id()))
}

/// Small horizon, coarse micro-step, zero noise: deterministic and quick.
fn swap_config(reallocation: bool) -> Config {
    let tag = if reallocation { "on" } else { "off" };
    let doc = serde_json::json!({
        "N": 2, "Ncmd": 2,
        "po": [[0.0, 0.0, 1.0], [4.0, 0.0, 1.0]],
        "pf": [[4.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        "solver": "qpoases",
        "collision_method": "ONDemand",
        "d": 5, "num_segments": 2, "dim": 3, "deg_poly": 2, "t_segment": 0.6,
        "zeta_xy": 0.6502, "tau_xy": 0.3815, "zeta_z": 0.9103, "tau_z": 0.3,
        "h": 0.2, "ts": 0.01, "k_hor": 6,
        "s_free": 100.0, "s_obs": 100.0, "s_repel": 1000.0,
        "spd_f": 3.0, "spd_o": 1.0, "spd_r": 10.0,
        "lin_coll": 100000.0, "quad_coll": 5000.0, "acc_cost": 0.5,
        "pmin": [-5.0, -5.0, 0.0], "pmax": [5.0, 5.0, 2.5],
        "amin": [-2.0, -2.0, -2.0], "amax": [2.0, 2.0, 2.0],
        "order": 2, "rmin": 0.3, "height_scaling": 2.0,
        "order_obs": 2, "rmin_obs": 0.3, "height_scaling_obs": 2.0,
        "std_position": 0.0, "std_velocity": 0.0,
        "test": "default",
        "motion_type": "static",
        "reallocation_enabled": reallocation,
        "reallocation_period": 1.0,
        "_use_predictive": false,
        "reallocation_log_path": temp_path(&format!("log_{tag}.csv")),
        "collision_check_rmin": 0.1,
        "goal_tolerance": 0.15,
        "simulation_duration": 4,
        "output_trajectories_paths": [temp_path(&format!("traj_{tag}.txt"))],
        "output_goals_paths": [temp_path(&format!("goals_{tag}.txt"))],
    });
    let config: Config = serde_json::from_value(doc).expect("test config parses");
    config.validate().expect("test config is valid");
    config
}

#[test]
fn reallocation_swaps_targets_and_agents_stay_home() {
    let config = swap_config(true);
    let starts = [config.po[0], config.po[1]];
    let mut simulator = Simulator::new(config, 42).expect("construct");
    simulator.run().expect("run");

    // exactly one committed event, swapping both agents
    assert_eq!(simulator.reallocation_count(), 1);
    assert_eq!(simulator.assignment().to_vec(), vec![1, 0]);

    let log = std::fs::read_to_string(temp_path("log_on.csv")).expect("log written");
    let mut lines = log.lines();
    assert_eq!(
        lines.next(),
        Some("timestamp,reallocation_id,agent_id,old_goal,new_goal,distance,method")
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.ends_with(",reactive")));

    // after the swap each agent's goal is its own start: near-zero net travel
    for (i, start) in starts.iter().enumerate() {
        let p = simulator.states()[i].pos;
        let dist = ((p[0] - start[0]).powi(2)
            + (p[1] - start[1]).powi(2)
            + (p[2] - start[2]).powi(2))
        .sqrt();
        assert!(
            dist < 0.5,
            "agent {i} ended {dist:.3} m from its start after the swap"
        );
    }

    // hard invariants: workspace box and collision audit
    for trajectory in simulator.trajectories() {
        for c in 0..trajectory.ncols() {
            assert!(trajectory[(0, c)] >= -5.0 - 1e-6 && trajectory[(0, c)] <= 5.0 + 1e-6);
            assert!(trajectory[(2, c)] >= -1e-6 && trajectory[(2, c)] <= 2.5 + 1e-6);
        }
    }
    assert!(simulator.collision_audit().is_empty());

    // result files round-trip to the in-memory arrays exactly
    simulator.save_trajectories().expect("save trajectories");
    simulator.save_goals().expect("save goals");
    let reloaded = sim::output::load_trajectories(&temp_path("traj_on.txt")).expect("reload");
    assert_eq!(reloaded.n, 2);
    assert_eq!(reloaded.n_cmd, 2);
    assert_eq!(reloaded.trajectories, simulator.trajectory_data().trajectories);
}

#[test]
fn disabled_reallocation_keeps_the_identity_assignment() {
    let config = swap_config(false);
    let mut simulator = Simulator::new(config, 42).expect("construct");
    simulator.run().expect("run");

    assert_eq!(simulator.reallocation_count(), 0);
    assert_eq!(simulator.assignment().to_vec(), vec![0, 1]);

    // 4 s at ts = 0.01 → 400 recorded columns per commanded agent
    assert_eq!(simulator.trajectories().len(), 2);
    assert_eq!(simulator.trajectories()[0].ncols(), 400);
}
