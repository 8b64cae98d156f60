//! Partial rank-IC: rank correlation of residuals after regressing factor
//! and target on a control matrix with an intercept.

use nalgebra::{DMatrix, DVector};

use super::rank::{rank_ic, rank_ic_complete, IcResult, MIN_OBSERVATIONS};

/// Least-squares residuals of `b` on the columns of `design` (SVD solve).
///
/// Singular values below `eps * max(rows, cols) * s_max` are treated as zero,
/// so collinear controls still yield the minimum-norm fit.
pub fn least_squares_residuals(design: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = design.clone().svd(true, true);
    let s_max = svd.singular_values.max();
    let cutoff = f64::EPSILON * design.nrows().max(design.ncols()) as f64 * s_max;
    let beta = svd.solve(b, cutoff).ok()?;
    Some(b - design * beta)
}

/// Rank-IC of `factor` vs `target` controlling for `controls` (one slice per column).
///
/// Rows with any missing value are dropped. With no controls this is
/// [`rank_ic`].
pub fn partial_rank_ic(
    factor: &[Option<f64>],
    target: &[Option<f64>],
    controls: &[&[Option<f64>]],
) -> IcResult {
    if controls.is_empty() {
        return rank_ic(factor, target);
    }

    let valid = |v: &Option<f64>| v.map_or(false, f64::is_finite);
    let rows: Vec<usize> = (0..factor.len().min(target.len()))
        .filter(|&i| {
            valid(&factor[i])
                && valid(&target[i])
                && controls.iter().all(|c| c.get(i).map_or(false, valid))
        })
        .collect();

    let n = rows.len();
    if n < MIN_OBSERVATIONS {
        return IcResult::neutral(n);
    }

    let k = controls.len() + 1;
    let design = DMatrix::from_fn(n, k, |r, c| {
        if c == 0 {
            1.0
        } else {
            controls[c - 1][rows[r]].unwrap_or(0.0)
        }
    });
    let x = DVector::from_iterator(n, rows.iter().map(|&i| factor[i].unwrap_or(0.0)));
    let y = DVector::from_iterator(n, rows.iter().map(|&i| target[i].unwrap_or(0.0)));

    match (
        least_squares_residuals(&design, &x),
        least_squares_residuals(&design, &y),
    ) {
        (Some(x_resid), Some(y_resid)) => {
            rank_ic_complete(x_resid.as_slice(), y_resid.as_slice())
        }
        _ => IcResult::neutral(n),
    }
}
