//! Statistical inference engine.
//!
//! Bundles the rank-IC family, regression, buckets and the triple-gate
//! signal behind one configured handle. Everything here is a pure function
//! of its column inputs.

use serde::{Deserialize, Serialize};

use crate::signal::{triple_gate_signal, GateInputs, GateSignal, TripleGateConfig};

use super::bootstrap::{block_bootstrap_ic, BootstrapResult, DEFAULT_RESAMPLES, DEFAULT_SEED};
use super::buckets::{bucketed_stats, BucketStat, DEFAULT_BUCKETS};
use super::partial::partial_rank_ic;
use super::rank::{rank_ic, IcResult};
use super::regression::{linear_regression, RegressionResult};

/// Statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Block bootstrap resamples.
    pub bootstrap_resamples: usize,
    /// Block bootstrap seed.
    pub bootstrap_seed: u64,
    /// Quantile buckets per conditioning column.
    pub n_buckets: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            bootstrap_resamples: DEFAULT_RESAMPLES,
            bootstrap_seed: DEFAULT_SEED,
            n_buckets: DEFAULT_BUCKETS,
        }
    }
}

/// Configured statistics over sample-table columns.
pub struct StatisticalInferenceEngine {
    config: StatsConfig,
    gate: TripleGateConfig,
}

impl StatisticalInferenceEngine {
    pub fn new(config: StatsConfig, gate: TripleGateConfig) -> Self {
        Self { config, gate }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn rank_ic(&self, factor: &[Option<f64>], target: &[Option<f64>]) -> IcResult {
        rank_ic(factor, target)
    }

    pub fn partial_rank_ic(
        &self,
        factor: &[Option<f64>],
        target: &[Option<f64>],
        controls: &[&[Option<f64>]],
    ) -> IcResult {
        partial_rank_ic(factor, target, controls)
    }

    /// Block bootstrap with the configured resample count and seed.
    pub fn block_bootstrap_ic<G: AsRef<str>>(
        &self,
        factor: &[Option<f64>],
        target: &[Option<f64>],
        groups: &[Option<G>],
    ) -> BootstrapResult {
        block_bootstrap_ic(
            factor,
            target,
            groups,
            self.config.bootstrap_resamples,
            self.config.bootstrap_seed,
        )
    }

    pub fn linear_regression(&self, x: &[Option<f64>], y: &[Option<f64>]) -> RegressionResult {
        linear_regression(x, y)
    }

    /// Per-bucket rank-IC with the configured bucket count.
    pub fn bucketed_stats(
        &self,
        bucket_values: &[Option<f64>],
        factor: &[Option<f64>],
        target: &[Option<f64>],
    ) -> Vec<BucketStat> {
        bucketed_stats(bucket_values, factor, target, self.config.n_buckets)
    }

    pub fn triple_gate_signal(&self, inputs: &GateInputs) -> GateSignal {
        triple_gate_signal(inputs, &self.gate)
    }
}

impl Default for StatisticalInferenceEngine {
    fn default() -> Self {
        Self::new(StatsConfig::default(), TripleGateConfig::default())
    }
}
