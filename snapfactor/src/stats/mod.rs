//! Statistical inference module.
//!
//! Provides:
//! - Spearman rank-IC with t-statistics
//! - Partial rank-IC against control variables
//! - Block bootstrap over clustered observations
//! - OLS regression and quantile-bucketed rank-IC

pub mod bootstrap;
pub mod buckets;
pub mod engine;
pub mod partial;
pub mod rank;
pub mod regression;

pub use bootstrap::{block_bootstrap_ic, BootstrapResult};
pub use buckets::{bucketed_stats, quantile_edges, BucketStat};
pub use engine::{StatisticalInferenceEngine, StatsConfig};
pub use partial::partial_rank_ic;
pub use rank::{rank_ic, IcResult};
pub use regression::{linear_regression, RegressionResult};
