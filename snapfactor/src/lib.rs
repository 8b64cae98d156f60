pub mod config;
pub mod data;
pub mod matching;
pub mod recompute;
pub mod report;
pub mod sample;
pub mod signal;
pub mod stats;

// Re-export commonly used types
pub use config::{ConfigError, ResearchConfig};
pub use data::{Capture, ChainRow, ChecksumStore, Manifest, OptionType, SnapshotStore, StoreError};
pub use matching::{match_entry, match_exit, resolve_price, SubstitutionPolicy};
pub use recompute::{recompute_paired, MatchStatus, PairedCheckRow};
pub use report::{build_stats_table, ReportWriter, StatisticsRow};
pub use sample::{CoverageReport, ObservationRow, SampleConfig, SampleTable, SampleTableBuilder};
pub use signal::{triple_gate_signal, GateInputs, GateSignal, TripleGateConfig};
pub use stats::{IcResult, StatisticalInferenceEngine, StatsConfig};
