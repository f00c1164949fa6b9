//! Piecewise Bézier trajectory basis.
//!
//! The decision variables of every per-agent QP are the stacked control
//! points of `num_segments` Bézier curves of degree `d` in ℝ³, laid out
//! segment-major, control-point-major, axis-minor:
//!
//! x = [s₀c₀x, s₀c₀y, s₀c₀z, s₀c₁x, …, s₁c₀x, …]
//!
//! Everything time-dependent about the curve is a *constant* linear map of
//! x, so the basis is precomputed once per run:
//! - Φ_pos / Φ_vel / Φ_acc sample position, velocity and acceleration at the
//!   `k_hor` horizon steps (spacing `h`),
//! - Φ_input samples position at the `h/ts` micro-steps executed before the
//!   next replan,
//! - A_init pins position and velocity at t = 0 to the agent's current state,
//! - A_cont enforces derivative continuity 0..=deg_poly at segment joints,
//! - Q_energy is the exact Gram matrix of Σ_r w_r ∫‖p⁽ʳ⁾(t)‖² dt.

use crate::types::{DMat, DVec};
use serde::{Deserialize, Serialize};

/// Curve shape parameters, straight from the configuration document.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BezierParams {
    /// Polynomial degree of each segment
    pub d: usize,
    pub num_segments: usize,
    /// Spatial dimension; always 3 here
    pub dim: usize,
    /// Highest derivative kept continuous across joints
    pub deg_poly: usize,
    /// Duration of one segment, seconds
    pub t_segment: f64,
}

impl BezierParams {
    /// Number of decision variables for the control points.
    pub fn num_vars(&self) -> usize {
        self.dim * (self.d + 1) * self.num_segments
    }

    /// Total curve duration.
    pub fn span(&self) -> f64 {
        self.num_segments as f64 * self.t_segment
    }
}

/// Precomputed sampling and constraint matrices for one run.
///
/// Construction contract (checked by the configuration layer):
/// `(k_hor − 1)·h ≤ span`, `deg_poly < d`, `d ≥ 2`, `dim == 3`.
#[derive(Clone, Debug)]
pub struct BezierBasis {
    pub params: BezierParams,
    pub k_hor: usize,
    /// Executed micro-steps per replan (h / ts)
    pub input_steps: usize,
    /// 3·k_hor × n_x position samples at t = k·h
    pub phi_pos: DMat,
    /// 3·k_hor × n_x velocity samples
    pub phi_vel: DMat,
    /// 3·k_hor × n_x acceleration samples
    pub phi_acc: DMat,
    /// 3·input_steps × n_x position samples at t = (j+1)·ts
    pub phi_input: DMat,
    /// 6 × n_x: position rows then velocity rows at t = 0
    pub a_init: DMat,
    /// Inter-segment continuity rows (rhs is zero)
    pub a_cont: DMat,
    /// n_x × n_x energy Gram matrix
    pub q_energy: DMat,
}

impl BezierBasis {
    /// Build the basis. `energy_weights[r]` weighs ∫‖p⁽ʳ⁾‖²dt.
    pub fn new(params: BezierParams, k_hor: usize, h: f64, ts: f64, energy_weights: &[f64]) -> Self {
        let n_x = params.num_vars();
        let input_steps = (h / ts).round() as usize;

        let mut phi_pos = DMat::zeros(3 * k_hor, n_x);
        let mut phi_vel = DMat::zeros(3 * k_hor, n_x);
        let mut phi_acc = DMat::zeros(3 * k_hor, n_x);
        for k in 0..k_hor {
            let t = k as f64 * h;
            fill_sample_rows(&mut phi_pos, 3 * k, t, 0, &params);
            fill_sample_rows(&mut phi_vel, 3 * k, t, 1, &params);
            fill_sample_rows(&mut phi_acc, 3 * k, t, 2, &params);
        }

        let mut phi_input = DMat::zeros(3 * input_steps, n_x);
        for j in 0..input_steps {
            let t = (j + 1) as f64 * ts;
            fill_sample_rows(&mut phi_input, 3 * j, t, 0, &params);
        }

        let mut a_init = DMat::zeros(6, n_x);
        fill_sample_rows(&mut a_init, 0, 0.0, 0, &params);
        fill_sample_rows(&mut a_init, 3, 0.0, 1, &params);

        let a_cont = continuity_rows(&params);
        let q_energy = energy_gram(&params, energy_weights);

        Self {
            params,
            k_hor,
            input_steps,
            phi_pos,
            phi_vel,
            phi_acc,
            phi_input,
            a_init,
            a_cont,
            q_energy,
        }
    }

    /// Column of control point `cp` of segment `seg`, axis `axis`.
    pub fn col(&self, seg: usize, cp: usize, axis: usize) -> usize {
        column_index(&self.params, seg, cp, axis)
    }
}

fn column_index(p: &BezierParams, seg: usize, cp: usize, axis: usize) -> usize {
    (seg * (p.d + 1) + cp) * p.dim + axis
}

/// Map global time to (segment, local τ ∈ [0, 1]). Times at or past the end
/// of the curve land on the last segment at τ = 1.
fn locate(p: &BezierParams, t: f64) -> (usize, f64) {
    let t = t.clamp(0.0, p.span());
    let seg = ((t / p.t_segment) as usize).min(p.num_segments - 1);
    let tau = (t - seg as f64 * p.t_segment) / p.t_segment;
    (seg, tau)
}

/// Write the three axis rows of the r-th time derivative at global time `t`
/// into `m`, starting at `row_base`.
fn fill_sample_rows(m: &mut DMat, row_base: usize, t: f64, r: usize, p: &BezierParams) {
    let (seg, tau) = locate(p, t);
    let coeffs = derivative_coeffs(p.d, r, tau, p.t_segment);
    for (cp, &c) in coeffs.iter().enumerate() {
        for axis in 0..p.dim {
            m[(row_base + axis, column_index(p, seg, cp, axis))] = c;
        }
    }
}

fn binomial(n: usize, k: usize) -> f64 {
    if k > n {
        return 0.0;
    }
    let k = k.min(n - k);
    let mut acc = 1.0;
    for i in 0..k {
        acc = acc * (n - i) as f64 / (i + 1) as f64;
    }
    acc
}

fn bernstein(d: usize, i: usize, tau: f64) -> f64 {
    binomial(d, i) * tau.powi(i as i32) * (1.0 - tau).powi((d - i) as i32)
}

/// d! / (d − r)!
fn falling(d: usize, r: usize) -> f64 {
    (0..r).map(|x| (d - x) as f64).product()
}

/// Coefficients of the control points P₀..P_d in the r-th time derivative of
/// a degree-d Bézier segment at local parameter τ:
///
/// p⁽ʳ⁾(τ) = d!/(d−r)!·t_seg⁻ʳ · Σᵢ (ΔʳP)ᵢ Bᵢ^{d−r}(τ),
/// (ΔʳP)ᵢ = Σⱼ (−1)^{r−j} C(r,j) P_{i+j}
fn derivative_coeffs(d: usize, r: usize, tau: f64, t_seg: f64) -> Vec<f64> {
    let mut coeffs = vec![0.0; d + 1];
    if r > d {
        return coeffs;
    }
    let scale = falling(d, r) / t_seg.powi(r as i32);
    for i in 0..=(d - r) {
        let basis = bernstein(d - r, i, tau);
        if basis == 0.0 {
            continue;
        }
        for j in 0..=r {
            let sign = if (r - j) % 2 == 0 { 1.0 } else { -1.0 };
            coeffs[i + j] += scale * sign * binomial(r, j) * basis;
        }
    }
    coeffs
}

/// Equality rows forcing derivatives 0..=deg_poly to match across every
/// interior joint: (p⁽ʳ⁾ of segment ℓ−1 at τ=1) − (p⁽ʳ⁾ of segment ℓ at τ=0).
fn continuity_rows(p: &BezierParams) -> DMat {
    let joints = p.num_segments.saturating_sub(1);
    let rows_per_joint = (p.deg_poly + 1) * p.dim;
    let mut a = DMat::zeros(joints * rows_per_joint, p.num_vars());
    for joint in 1..p.num_segments {
        for r in 0..=p.deg_poly {
            let row_base = (joint - 1) * rows_per_joint + r * p.dim;
            let end = derivative_coeffs(p.d, r, 1.0, p.t_segment);
            let start = derivative_coeffs(p.d, r, 0.0, p.t_segment);
            for cp in 0..=p.d {
                for axis in 0..p.dim {
                    a[(row_base + axis, column_index(p, joint - 1, cp, axis))] += end[cp];
                    a[(row_base + axis, column_index(p, joint, cp, axis))] -= start[cp];
                }
            }
        }
    }
    a
}

/// Gram matrix of the Bernstein basis of degree n:
/// ∫₀¹ Bᵢⁿ Bⱼⁿ dτ = C(n,i)C(n,j) / ((2n+1)·C(2n,i+j))
fn bernstein_gram(n: usize) -> DMat {
    let mut g = DMat::zeros(n + 1, n + 1);
    for i in 0..=n {
        for j in 0..=n {
            g[(i, j)] = binomial(n, i) * binomial(n, j) / ((2 * n + 1) as f64 * binomial(2 * n, i + j));
        }
    }
    g
}

/// Difference operator taking segment control points to the control points of
/// the r-th time derivative (degree d − r), including the d!/(d−r)!·t_seg⁻ʳ
/// scale.
fn diff_operator(d: usize, r: usize, t_seg: f64) -> DMat {
    let scale = falling(d, r) / t_seg.powi(r as i32);
    let mut op = DMat::zeros(d - r + 1, d + 1);
    for i in 0..=(d - r) {
        for j in 0..=r {
            let sign = if (r - j) % 2 == 0 { 1.0 } else { -1.0 };
            op[(i, i + j)] = scale * sign * binomial(r, j);
        }
    }
    op
}

/// Exact energy Gram: Σ_r w_r ∫‖p⁽ʳ⁾(t)‖² dt, block-diagonal over segments
/// and axes (∫dt = t_seg·∫dτ).
fn energy_gram(p: &BezierParams, weights: &[f64]) -> DMat {
    let mut q_seg = DMat::zeros(p.d + 1, p.d + 1);
    for (r, &w) in weights.iter().enumerate() {
        if w == 0.0 || r > p.d {
            continue;
        }
        let op = diff_operator(p.d, r, p.t_segment);
        let gram = bernstein_gram(p.d - r);
        q_seg += (op.transpose() * gram * op) * (w * p.t_segment);
    }

    let mut q = DMat::zeros(p.num_vars(), p.num_vars());
    for seg in 0..p.num_segments {
        for i in 0..=p.d {
            for j in 0..=p.d {
                for axis in 0..p.dim {
                    q[(
                        column_index(p, seg, i, axis),
                        column_index(p, seg, j, axis),
                    )] = q_seg[(i, j)];
                }
            }
        }
    }
    q
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DVec;
    use approx::assert_abs_diff_eq;

    fn params() -> BezierParams {
        BezierParams {
            d: 5,
            num_segments: 3,
            dim: 3,
            deg_poly: 3,
            t_segment: 1.2,
        }
    }

    fn basis() -> BezierBasis {
        let mut w = vec![0.0; 6];
        w[2] = 1.0;
        BezierBasis::new(params(), 16, 0.2, 0.005, &w)
    }

    /// Control points for a constant-velocity straight line from `a` to `b`
    /// over the whole curve span: evenly spaced points on each segment chord.
    fn line_control_points(basis: &BezierBasis, a: [f64; 3], b: [f64; 3]) -> DVec {
        let p = &basis.params;
        let mut x = DVec::zeros(p.num_vars());
        let total = (p.d * p.num_segments) as f64;
        for seg in 0..p.num_segments {
            for cp in 0..=p.d {
                let frac = (seg * p.d + cp) as f64 / total;
                for axis in 0..3 {
                    x[basis.col(seg, cp, axis)] = a[axis] + frac * (b[axis] - a[axis]);
                }
            }
        }
        x
    }

    #[test]
    fn bernstein_partition_of_unity() {
        for &tau in &[0.0, 0.17, 0.5, 0.99, 1.0] {
            let sum: f64 = (0..=5).map(|i| bernstein(5, i, tau)).sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn position_rows_interpolate_a_line() {
        let basis = basis();
        let x = line_control_points(&basis, [0.0, 0.0, 1.0], [3.6, -1.8, 1.0]);
        let sampled = &basis.phi_pos * &x;
        let span = basis.params.span();
        for k in 0..basis.k_hor {
            let t = k as f64 * 0.2;
            let frac = t / span;
            assert_abs_diff_eq!(sampled[3 * k], 3.6 * frac, epsilon = 1e-9);
            assert_abs_diff_eq!(sampled[3 * k + 1], -1.8 * frac, epsilon = 1e-9);
            assert_abs_diff_eq!(sampled[3 * k + 2], 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn velocity_rows_recover_line_slope() {
        let basis = basis();
        let x = line_control_points(&basis, [0.0, 0.0, 1.0], [3.6, 0.0, 1.0]);
        let sampled = &basis.phi_vel * &x;
        let slope = 3.6 / basis.params.span();
        for k in 0..basis.k_hor {
            assert_abs_diff_eq!(sampled[3 * k], slope, epsilon = 1e-9);
            assert_abs_diff_eq!(sampled[3 * k + 1], 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn initial_rows_pin_state_at_zero() {
        let basis = basis();
        let x = line_control_points(&basis, [0.5, -0.5, 1.0], [2.0, 2.0, 1.0]);
        let init = &basis.a_init * &x;
        assert_abs_diff_eq!(init[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(init[1], -0.5, epsilon = 1e-12);
        // velocity rows: constant slope of the line
        let slope_x = 1.5 / basis.params.span();
        assert_abs_diff_eq!(init[3], slope_x, epsilon = 1e-9);
    }

    #[test]
    fn continuity_rows_vanish_on_a_smooth_curve() {
        let basis = basis();
        let x = line_control_points(&basis, [0.0, 0.0, 0.0], [1.0, 2.0, 3.0]);
        let residual = &basis.a_cont * &x;
        for v in residual.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-9);
        }
        let joints = basis.params.num_segments - 1;
        assert_eq!(residual.len(), joints * (basis.params.deg_poly + 1) * 3);
    }

    #[test]
    fn straight_line_has_zero_acceleration_energy() {
        let basis = basis();
        let x = line_control_points(&basis, [0.0, 0.0, 0.0], [4.0, 0.0, 0.0]);
        let energy = (x.transpose() * &basis.q_energy * &x)[(0, 0)];
        assert_abs_diff_eq!(energy, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn curved_control_points_have_positive_energy() {
        let basis = basis();
        let mut x = line_control_points(&basis, [0.0, 0.0, 0.0], [4.0, 0.0, 0.0]);
        // bend one interior control point
        x[basis.col(1, 2, 1)] += 0.8;
        let energy = (x.transpose() * &basis.q_energy * &x)[(0, 0)];
        assert!(energy > 1e-6);
    }

    #[test]
    fn input_rows_cover_one_replan_window() {
        let basis = basis();
        assert_eq!(basis.input_steps, 40);
        assert_eq!(basis.phi_input.nrows(), 3 * 40);
        let x = line_control_points(&basis, [0.0, 0.0, 0.0], [3.6, 0.0, 0.0]);
        let inputs = &basis.phi_input * &x;
        // last sample of the window sits at t = h, matching the horizon's k = 1
        let horizon = &basis.phi_pos * &x;
        assert_abs_diff_eq!(inputs[3 * 39], horizon[3], epsilon = 1e-9);
    }
}
