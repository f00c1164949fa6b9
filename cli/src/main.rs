//! `dmpc` CLI: run one multi-agent planning simulation from a JSON
//! configuration document, report the audits, write the result files.

use anyhow::Result;
use clap::Parser;
use sim::{Config, Simulator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dmpc", about = "Distributed-MPC multi-agent trajectory planner")]
struct Cli {
    /// Path to the JSON configuration document
    config: PathBuf,
    /// Seed for process noise and random test generation
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    println!("Solving the multi-agent motion planning problem...");
    let config = Config::from_path(&cli.config)?;
    let mut simulator = Simulator::new(config, cli.seed)?;

    let start = std::time::Instant::now();
    simulator.run()?;
    println!(
        "Simulation finished in {:.2} s wall-clock",
        start.elapsed().as_secs_f64()
    );

    // Audit outcomes go to stdout and never affect the exit status.
    simulator.report_audits();
    if simulator.reallocation_count() > 0 {
        println!(
            "Total reallocations performed: {}",
            simulator.reallocation_count()
        );
    }

    println!("Writing solution to text files...");
    simulator.save_trajectories()?;
    simulator.save_goals()?;

    Ok(())
}
