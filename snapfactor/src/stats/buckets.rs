//! Quantile buckets and per-bucket rank-IC.

use serde::Serialize;

use super::rank::{rank_ic_complete, IcResult};

/// Default number of quantile buckets (terciles).
pub const DEFAULT_BUCKETS: usize = 3;

/// Rank-IC of one quantile bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStat {
    /// 0-based bucket id, lowest values first
    pub bucket: usize,
    #[serde(flatten)]
    pub ic: IcResult,
}

/// Linearly interpolated quantile of sorted values.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Bucket edges at `0, 1/n, ..., 1` quantiles with duplicate edges dropped.
pub fn quantile_edges(values: &[f64], n_buckets: usize) -> Vec<f64> {
    if values.is_empty() || n_buckets == 0 {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut edges: Vec<f64> = (0..=n_buckets)
        .map(|i| quantile_sorted(&sorted, i as f64 / n_buckets as f64))
        .collect();
    edges.dedup();
    edges
}

/// Bucket id of `value` given ascending `edges`.
///
/// Buckets are right-closed `(e[i], e[i+1]]`, the first one also holding
/// the lowest edge. A single edge (all values tied) is one bucket.
pub fn assign_bucket(value: f64, edges: &[f64]) -> Option<usize> {
    match edges {
        [] => None,
        [only] => (value == *only).then_some(0),
        [lowest, ..] => {
            if value < *lowest {
                return None;
            }
            edges[1..].iter().position(|edge| value <= *edge)
        }
    }
}

/// Split rows into quantile buckets of `bucket_values` and report the
/// rank-IC of `factor` vs `target` inside each.
///
/// Rows missing the bucket value, factor or target are dropped before the
/// quantiles are taken. Ties that collapse edges yield fewer buckets.
pub fn bucketed_stats(
    bucket_values: &[Option<f64>],
    factor: &[Option<f64>],
    target: &[Option<f64>],
    n_buckets: usize,
) -> Vec<BucketStat> {
    let rows: Vec<(f64, f64, f64)> = bucket_values
        .iter()
        .zip(factor.iter())
        .zip(target.iter())
        .filter_map(|((b, f), t)| match (b, f, t) {
            (Some(b), Some(f), Some(t)) if b.is_finite() && f.is_finite() && t.is_finite() => {
                Some((*b, *f, *t))
            }
            _ => None,
        })
        .collect();
    if rows.is_empty() {
        return Vec::new();
    }

    let keys: Vec<f64> = rows.iter().map(|(b, _, _)| *b).collect();
    let edges = quantile_edges(&keys, n_buckets);
    let n_effective = edges.len().saturating_sub(1).max(1);

    let mut xs: Vec<Vec<f64>> = vec![Vec::new(); n_effective];
    let mut ys: Vec<Vec<f64>> = vec![Vec::new(); n_effective];
    for (b, f, t) in &rows {
        if let Some(id) = assign_bucket(*b, &edges) {
            xs[id].push(*f);
            ys[id].push(*t);
        }
    }

    xs.iter()
        .zip(ys.iter())
        .enumerate()
        .filter(|(_, (x, _))| !x.is_empty())
        .map(|(bucket, (x, y))| BucketStat {
            bucket,
            ic: rank_ic_complete(x, y),
        })
        .collect()
}
