//! Minimum-cost one-to-one assignment: Hungarian algorithm (Jonker-Volgenant
//! style potentials + shortest augmenting paths, O(n³)) on a dense square
//! cost matrix.

use crate::types::DMat;

/// Solve the assignment problem on a square cost matrix.
/// Returns `assignment[row] = column` minimizing the total cost; the result
/// is always a permutation of `0..n`.
pub fn solve(cost: &DMat) -> Vec<usize> {
    let n = cost.nrows();
    debug_assert_eq!(n, cost.ncols(), "cost matrix must be square");
    if n == 0 {
        return Vec::new();
    }

    // Row and column potentials (1-indexed; index 0 is the virtual source)
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    // p[j] = row assigned to column j (0 = none)
    let mut p = vec![0usize; n + 1];
    // way[j] = previous column on the augmenting path
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if !used[j] {
                    let val = cost[(i0 - 1, j - 1)] - u[i0] - v[j];
                    if val < minv[j] {
                        minv[j] = val;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment along the stored path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// Total cost of an assignment under `cost`.
pub fn total_cost(cost: &DMat, assignment: &[usize]) -> f64 {
    assignment
        .iter()
        .enumerate()
        .map(|(i, &j)| cost[(i, j)])
        .sum()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
