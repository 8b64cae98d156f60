//! Block (cluster) bootstrap of the rank-IC.
//!
//! Whole groups are resampled with replacement so that observations that
//! move together (same capture time and expiry) stay together. The RNG is
//! a `ChaCha8Rng` seeded per call, so results are exactly reproducible.

use std::collections::HashMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use super::rank::spearman;

/// Default number of bootstrap resamples.
pub const DEFAULT_RESAMPLES: usize = 500;

/// Default bootstrap seed.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BootstrapResult {
    pub n: usize,
    pub n_groups: usize,
    pub ic_mean: f64,
    pub ic_std: f64,
    pub t_stat: f64,
}

impl BootstrapResult {
    /// Zero-confidence result.
    pub fn degenerate(n: usize, n_groups: usize) -> Self {
        Self {
            n,
            n_groups,
            ..Default::default()
        }
    }
}

/// Block-bootstrap the rank-IC of `factor` vs `target` over clusters in `groups`.
///
/// Rows missing any of factor, target or group are dropped. Fewer than two
/// distinct groups, or zero resamples, yields a zero-confidence result.
/// A resample whose IC is undefined contributes zero.
pub fn block_bootstrap_ic<G: AsRef<str>>(
    factor: &[Option<f64>],
    target: &[Option<f64>],
    groups: &[Option<G>],
    n_resamples: usize,
    seed: u64,
) -> BootstrapResult {
    // groups in first-appearance order, each holding its (factor, target) pairs
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut clusters: Vec<Vec<(f64, f64)>> = Vec::new();
    let mut n = 0;

    let len = factor.len().min(target.len()).min(groups.len());
    for i in 0..len {
        let (Some(f), Some(t), Some(g)) = (factor[i], target[i], groups[i].as_ref()) else {
            continue;
        };
        if !f.is_finite() || !t.is_finite() {
            continue;
        }
        let slot = *index.entry(g.as_ref()).or_insert_with(|| {
            clusters.push(Vec::new());
            clusters.len() - 1
        });
        clusters[slot].push((f, t));
        n += 1;
    }

    let n_groups = clusters.len();
    if n_groups < 2 || n_resamples == 0 {
        return BootstrapResult::degenerate(n, n_groups);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut samples = Vec::with_capacity(n_resamples);
    let mut xs = Vec::with_capacity(n);
    let mut ys = Vec::with_capacity(n);
    for _ in 0..n_resamples {
        xs.clear();
        ys.clear();
        for _ in 0..n_groups {
            for &(f, t) in &clusters[rng.gen_range(0..n_groups)] {
                xs.push(f);
                ys.push(t);
            }
        }
        samples.push(spearman(&xs, &ys).filter(|ic| ic.is_finite()).unwrap_or(0.0));
    }

    let ic_mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let ic_std = if samples.len() > 1 {
        let var = samples.iter().map(|s| (s - ic_mean).powi(2)).sum::<f64>()
            / (samples.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    let t_stat = if ic_std > 0.0 { ic_mean / ic_std } else { 0.0 };

    BootstrapResult {
        n,
        n_groups,
        ic_mean,
        ic_std,
        t_stat,
    }
}
