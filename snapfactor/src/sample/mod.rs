//! Sample table module.
//!
//! Provides:
//! - Paired entry/exit joins into observation rows
//! - The tradability predicate
//! - Rolling IV convergence factors (median and MAD normalised)
//! - Coverage counters for every skipped run, partition and row

pub mod builder;
pub mod coverage;
pub mod factors;
pub mod liquidity;
pub mod table;

pub use builder::{PartitionRows, SampleConfig, SampleTableBuilder};
pub use coverage::{CoverageReport, SkipReason};
pub use factors::{convergence_factor_a, convergence_factor_b, median, FACTOR_EPSILON};
pub use liquidity::is_tradable;
pub use table::{ObservationRow, SampleTable};
