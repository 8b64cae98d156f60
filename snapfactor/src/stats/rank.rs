//! Spearman rank correlation (rank-IC) and its t-statistic.

use serde::Serialize;

/// Minimum paired observations for a non-neutral rank-IC.
pub const MIN_OBSERVATIONS: usize = 3;

/// Floor on `1 - ic^2` in the t-statistic denominator.
pub const T_STAT_EPSILON: f64 = 1e-8;

/// Rank-IC with its sample size and t-statistic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IcResult {
    pub n: usize,
    pub ic: f64,
    pub t_stat: f64,
}

impl IcResult {
    /// Neutral result for `n` observations.
    pub fn neutral(n: usize) -> Self {
        Self {
            n,
            ic: 0.0,
            t_stat: 0.0,
        }
    }

    /// Result for `ic` over `n` observations with `ic * sqrt((n-2) / (1-ic^2))`.
    pub fn from_ic(ic: f64, n: usize) -> Self {
        Self {
            n,
            ic,
            t_stat: ic_t_stat(ic, n),
        }
    }
}

/// `ic * sqrt((n - 2) / max(eps, 1 - ic^2))`.
pub fn ic_t_stat(ic: f64, n: usize) -> f64 {
    if n < 3 {
        return 0.0;
    }
    let denom = (1.0 - ic * ic).max(T_STAT_EPSILON);
    ic * ((n as f64 - 2.0) / denom).sqrt()
}

/// Pairs where both sides are present and finite.
pub fn paired(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y.iter())
        .filter_map(|(a, b)| match (a, b) {
            (Some(a), Some(b)) if a.is_finite() && b.is_finite() => Some((*a, *b)),
            _ => None,
        })
        .unzip()
}

/// 1-based ranks with ties given their average rank.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // positions i..=j share the average of ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Pearson correlation; `None` for fewer than two points or zero variance.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 2 {
        return None;
    }
    let mean_x = x[..n].iter().sum::<f64>() / n as f64;
    let mean_y = y[..n].iter().sum::<f64>() / n as f64;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mean_x;
        let dy = y[i] - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

/// Spearman correlation of two complete series.
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    pearson(&average_ranks(x), &average_ranks(y))
}

/// Rank-IC between a factor and a target.
///
/// Only pairs with both values present count. Fewer than three pairs, or
/// a constant series, gives a neutral (zero) result.
pub fn rank_ic(factor: &[Option<f64>], target: &[Option<f64>]) -> IcResult {
    let (x, y) = paired(factor, target);
    rank_ic_complete(&x, &y)
}

/// Rank-IC over series already stripped of missing values.
pub fn rank_ic_complete(x: &[f64], y: &[f64]) -> IcResult {
    let n = x.len().min(y.len());
    if n < MIN_OBSERVATIONS {
        return IcResult::neutral(n);
    }
    match spearman(&x[..n], &y[..n]) {
        Some(ic) => IcResult::from_ic(ic, n),
        None => IcResult::neutral(n),
    }
}
