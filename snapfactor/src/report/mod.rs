//! Study output module.
//!
//! Provides:
//! - The factor statistics table (overall, spread split, quantile buckets)
//! - CSV writers for sample and statistics tables, JSON for coverage

pub mod stats_table;
pub mod writer;

pub use stats_table::{build_stats_table, StatisticsRow};
pub use writer::{ReportError, ReportResult, ReportWriter, StudyOutputs};
