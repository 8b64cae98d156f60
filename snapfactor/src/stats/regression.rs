//! Ordinary least squares of one target on one factor.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::rank::paired;

const TINY: f64 = 1e-20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegressionResult {
    pub n: usize,
    pub beta: f64,
    pub alpha: f64,
    pub r: f64,
    /// Two-sided p-value of the slope
    pub p: f64,
    /// Standard error of the slope
    pub stderr: f64,
}

impl RegressionResult {
    /// Result used when no slope can be estimated.
    pub fn undefined(n: usize) -> Self {
        Self {
            n,
            beta: 0.0,
            alpha: 0.0,
            r: 0.0,
            p: 1.0,
            stderr: 0.0,
        }
    }
}

/// Regress `y` on `x` over pairs where both are present.
///
/// Fewer than three pairs or a constant `x` gives [`RegressionResult::undefined`].
pub fn linear_regression(x: &[Option<f64>], y: &[Option<f64>]) -> RegressionResult {
    let (xs, ys) = paired(x, y);
    let n = xs.len();
    if n < 3 {
        return RegressionResult::undefined(n);
    }

    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;
    let mut ssxm = 0.0;
    let mut ssym = 0.0;
    let mut ssxym = 0.0;
    for (xi, yi) in xs.iter().zip(ys.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }
    if ssxm <= 0.0 {
        return RegressionResult::undefined(n);
    }

    let r = if ssym > 0.0 {
        (ssxym / (ssxm * ssym).sqrt()).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let beta = ssxym / ssxm;
    let alpha = mean_y - beta * mean_x;

    let df = nf - 2.0;
    let t = r * (df / ((1.0 - r) * (1.0 + r) + TINY)).sqrt();
    let p = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    };
    let stderr = ((1.0 - r * r) * ssym / ssxm / df).max(0.0).sqrt();

    RegressionResult {
        n,
        beta,
        alpha,
        r,
        p,
        stderr,
    }
}
