//! Statistics table over one sample table.
//!
//! Rows, in order:
//! - every factor against `iv_change`, group `all`, with partial IC,
//!   block bootstrap and regression columns
//! - `factor_b` split at the median entry spread (`spread_low`, `spread_high`)
//! - `factor_b` per quantile bucket of moneyness, spread and open interest

use serde::Serialize;
use tracing::debug;

use crate::sample::{median, ObservationRow};
use crate::stats::{IcResult, StatisticalInferenceEngine};

pub const TARGET: &str = "iv_change";
pub const GROUP_ALL: &str = "all";

/// One line of the statistics table.
///
/// Columns that do not apply to a row's group are left empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsRow {
    pub factor: String,
    pub target: String,
    pub group: String,
    pub n: usize,
    pub rank_ic: f64,
    pub rank_ic_t_stat: f64,
    pub partial_ic: Option<f64>,
    pub partial_ic_t_stat: Option<f64>,
    pub bootstrap_ic_mean: Option<f64>,
    pub bootstrap_ic_std: Option<f64>,
    pub bootstrap_t_stat: Option<f64>,
    pub bootstrap_groups: Option<usize>,
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    pub r: Option<f64>,
    pub p: Option<f64>,
    pub stderr: Option<f64>,
}

impl StatisticsRow {
    /// Row carrying only the rank-IC columns.
    fn rank_only(factor: &str, group: String, ic: IcResult) -> Self {
        Self {
            factor: factor.to_string(),
            target: TARGET.to_string(),
            group,
            n: ic.n,
            rank_ic: ic.ic,
            rank_ic_t_stat: ic.t_stat,
            partial_ic: None,
            partial_ic_t_stat: None,
            bootstrap_ic_mean: None,
            bootstrap_ic_std: None,
            bootstrap_t_stat: None,
            bootstrap_groups: None,
            beta: None,
            alpha: None,
            r: None,
            p: None,
            stderr: None,
        }
    }
}

fn column(rows: &[ObservationRow], f: impl Fn(&ObservationRow) -> Option<f64>) -> Vec<Option<f64>> {
    rows.iter().map(f).collect()
}

/// Build the statistics table; empty input gives an empty table.
pub fn build_stats_table(
    rows: &[ObservationRow],
    engine: &StatisticalInferenceEngine,
) -> Vec<StatisticsRow> {
    if rows.is_empty() {
        return Vec::new();
    }

    let target = column(rows, |r| r.iv_change);
    let factor_b = column(rows, |r| r.factor_b);
    let factors = [
        ("factor_a", column(rows, |r| r.factor_a)),
        ("factor_b", factor_b.clone()),
        ("baseline_iv_level", column(rows, |r| r.baseline_iv_level)),
        ("baseline_iv_change_lag1", column(rows, |r| r.baseline_iv_change_lag1)),
    ];

    let moneyness = column(rows, |r| r.moneyness);
    let spread = column(rows, |r| r.entry_spread_f64());
    let open_interest = column(rows, |r| r.entry_open_interest_f64());
    let controls = [moneyness.as_slice(), spread.as_slice(), open_interest.as_slice()];
    let groups: Vec<Option<String>> = rows.iter().map(|r| Some(r.group_label())).collect();

    let mut table = Vec::new();
    for (name, factor) in &factors {
        let ic = engine.rank_ic(factor, &target);
        let partial = engine.partial_rank_ic(factor, &target, &controls);
        let boot = engine.block_bootstrap_ic(factor, &target, &groups);
        let reg = engine.linear_regression(factor, &target);
        debug!(
            "{}: n={} ic={:.4} partial={:.4} bootstrap_t={:.3}",
            name, ic.n, ic.ic, partial.ic, boot.t_stat
        );
        table.push(StatisticsRow {
            partial_ic: Some(partial.ic),
            partial_ic_t_stat: Some(partial.t_stat),
            bootstrap_ic_mean: Some(boot.ic_mean),
            bootstrap_ic_std: Some(boot.ic_std),
            bootstrap_t_stat: Some(boot.t_stat),
            bootstrap_groups: Some(boot.n_groups),
            beta: Some(reg.beta),
            alpha: Some(reg.alpha),
            r: Some(reg.r),
            p: Some(reg.p),
            stderr: Some(reg.stderr),
            ..StatisticsRow::rank_only(name, GROUP_ALL.to_string(), ic)
        });
    }

    let present_spreads: Vec<f64> = spread.iter().flatten().copied().collect();
    if let Some(mid) = median(&present_spreads) {
        for (label, low) in [("spread_low", true), ("spread_high", false)] {
            let idx: Vec<usize> = (0..rows.len())
                .filter(|&i| spread[i].map_or(false, |s| (s <= mid) == low))
                .collect();
            let f: Vec<Option<f64>> = idx.iter().map(|&i| factor_b[i]).collect();
            let t: Vec<Option<f64>> = idx.iter().map(|&i| target[i]).collect();
            table.push(StatisticsRow::rank_only(
                "factor_b",
                label.to_string(),
                engine.rank_ic(&f, &t),
            ));
        }
    }

    for (label, values) in [
        ("moneyness", &moneyness),
        ("spread", &spread),
        ("open_interest", &open_interest),
    ] {
        for bucket in engine.bucketed_stats(values, &factor_b, &target) {
            table.push(StatisticsRow::rank_only(
                "factor_b",
                format!("{}_bucket_{}", label, bucket.bucket),
                bucket.ic,
            ));
        }
    }

    table
}
