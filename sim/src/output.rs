//! Result files: whitespace text matrices, one matrix row per line.
//!
//! Trajectory file layout:
//! ```text
//! N Ncmd pmin_x pmin_y pmin_z pmax_x pmax_y pmax_z
//! <3 × N   start positions>
//! <3 × Ncmd goal positions>
//! <3 × K   positions over time, Ncmd blocks>
//! ```
//! The goal file holds the Ncmd 3 × K goal-position blocks alone. Values are
//! written with `Display`, whose shortest-round-trip formatting makes
//! re-reading reproduce the in-memory arrays exactly.

use anyhow::{ensure, Context, Result};
use nalgebra::Matrix3xX;
use planner_core::types::Vec3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Everything the trajectory file carries.
#[derive(Clone, Debug)]
pub struct TrajectoryData {
    pub n: usize,
    pub n_cmd: usize,
    pub pmin: Vec3,
    pub pmax: Vec3,
    pub po: Vec<Vec3>,
    pub pf: Vec<Vec3>,
    pub trajectories: Vec<Matrix3xX<f64>>,
}

fn write_point_block(w: &mut impl Write, points: &[Vec3]) -> Result<()> {
    for axis in 0..3 {
        let row: Vec<String> = points.iter().map(|p| p[axis].to_string()).collect();
        writeln!(w, "{}", row.join(" "))?;
    }
    Ok(())
}

fn write_matrix(w: &mut impl Write, m: &Matrix3xX<f64>) -> Result<()> {
    for axis in 0..3 {
        let row: Vec<String> = (0..m.ncols()).map(|c| m[(axis, c)].to_string()).collect();
        writeln!(w, "{}", row.join(" "))?;
    }
    Ok(())
}

/// Write the trajectory file.
pub fn save_trajectories(data: &TrajectoryData, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );

    writeln!(
        w,
        "{} {} {} {} {} {} {} {}",
        data.n,
        data.n_cmd,
        data.pmin[0],
        data.pmin[1],
        data.pmin[2],
        data.pmax[0],
        data.pmax[1],
        data.pmax[2]
    )?;
    write_point_block(&mut w, &data.po)?;
    write_point_block(&mut w, &data.pf)?;
    for trajectory in &data.trajectories {
        write_matrix(&mut w, trajectory)?;
    }
    w.flush()?;
    Ok(())
}

/// Write the goal file: Ncmd blocks of 3 × K goal positions.
pub fn save_goals(goal_trajectories: &[Matrix3xX<f64>], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    for trajectory in goal_trajectories {
        write_matrix(&mut w, trajectory)?;
    }
    w.flush()?;
    Ok(())
}

fn parse_row(line: &str, expected: usize, what: &str) -> Result<Vec<f64>> {
    let values: Vec<f64> = line
        .split_whitespace()
        .map(|tok| tok.parse::<f64>().with_context(|| format!("bad number in {what}: {tok}")))
        .collect::<Result<_>>()?;
    ensure!(
        values.len() == expected,
        "{what}: expected {expected} values per line, got {}",
        values.len()
    );
    Ok(values)
}

fn read_point_block<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    count: usize,
    what: &str,
) -> Result<Vec<Vec3>> {
    let mut rows = Vec::with_capacity(3);
    for _ in 0..3 {
        let line = lines.next().with_context(|| format!("{what}: file truncated"))?;
        rows.push(parse_row(line, count, what)?);
    }
    Ok((0..count)
        .map(|c| Vec3::new(rows[0][c], rows[1][c], rows[2][c]))
        .collect())
}

/// Read a trajectory file back. Inverse of [`save_trajectories`].
pub fn load_trajectories(path: &Path) -> Result<TrajectoryData> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let mut lines = text.lines();

    let header = parse_row(
        lines.next().context("missing header line")?,
        8,
        "header",
    )?;
    let n = header[0] as usize;
    let n_cmd = header[1] as usize;
    let pmin = Vec3::new(header[2], header[3], header[4]);
    let pmax = Vec3::new(header[5], header[6], header[7]);

    let po = read_point_block(&mut lines, n, "start positions")?;
    let pf = read_point_block(&mut lines, n_cmd, "goal positions")?;

    let mut trajectories = Vec::with_capacity(n_cmd);
    for block in 0..n_cmd {
        let what = format!("trajectory block {block}");
        let first = lines.next().with_context(|| format!("{what}: file truncated"))?;
        let row0 = parse_row(first, first.split_whitespace().count(), &what)?;
        let k = row0.len();
        ensure!(k > 0, "{what}: empty row");
        let row1 = parse_row(
            lines.next().with_context(|| format!("{what}: file truncated"))?,
            k,
            &what,
        )?;
        let row2 = parse_row(
            lines.next().with_context(|| format!("{what}: file truncated"))?,
            k,
            &what,
        )?;
        let rows = [row0, row1, row2];
        trajectories.push(Matrix3xX::from_fn(k, |r, c| rows[r][c]));
    }

    Ok(TrajectoryData {
        n,
        n_cmd,
        pmin,
        pmax,
        po,
        pf,
        trajectories,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
