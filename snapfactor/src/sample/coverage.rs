//! Skip reasons and coverage counters for sample table builds.
//!
//! Every run, partition, or row that does not make it into the table is
//! counted here under a reason.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Why a run or a (run, expiry) partition contributed no rows.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Manifest failed verification or validation
    ManifestRejected(String),
    /// Run has no exit capture yet
    PendingExit,
    /// Manifest names no capture for this expiry
    MissingCaptureRef { side: &'static str },
    /// Capture checksum failed
    Integrity(String),
    /// Capture failed schema validation
    InvalidCapture(String),
    /// Capture could not be read
    Io(String),
    /// Capture holds no rows for the partition's expiry
    EmptyPartition { side: &'static str },
    /// No contract id present in both captures
    EmptyJoin { mismatched: usize, unmatched: usize },
}

impl SkipReason {
    /// Stable counter key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestRejected(_) => "manifest_rejected",
            Self::PendingExit => "pending_exit",
            Self::MissingCaptureRef { .. } => "missing_capture_ref",
            Self::Integrity(_) => "integrity",
            Self::InvalidCapture(_) => "invalid_capture",
            Self::Io(_) => "io",
            Self::EmptyPartition { .. } => "empty_partition",
            Self::EmptyJoin { .. } => "empty_join",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ManifestRejected(msg) => write!(f, "manifest rejected: {}", msg),
            Self::PendingExit => f.write_str("no exit capture yet"),
            Self::MissingCaptureRef { side } => write!(f, "no {} capture for expiry", side),
            Self::Integrity(msg) => write!(f, "integrity failure: {}", msg),
            Self::InvalidCapture(msg) => write!(f, "invalid capture: {}", msg),
            Self::Io(msg) => write!(f, "unreadable capture: {}", msg),
            Self::EmptyPartition { side } => write!(f, "{} capture has no rows for expiry", side),
            Self::EmptyJoin {
                mismatched,
                unmatched,
            } => write!(
                f,
                "no contracts in both captures ({} with mismatched expiry/strike, {} in one capture only)",
                mismatched, unmatched
            ),
        }
    }
}

/// Counts of what a build used and what it excluded, and why.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub runs_seen: usize,
    pub runs_used: usize,
    pub partitions_seen: usize,
    pub partitions_used: usize,
    pub rows: usize,
    pub rows_tradable: usize,
    /// Joined rows dropped because expiry or strike disagreed
    pub rows_mismatched: usize,
    /// Contracts present in only one of the two captures
    pub rows_unmatched: usize,
    /// Rows kept without a usable entry or exit price (never tradable)
    pub rows_missing_price: usize,
    pub run_skips: BTreeMap<String, usize>,
    pub partition_skips: BTreeMap<String, usize>,
}

impl CoverageReport {
    pub fn record_run_skip(&mut self, reason: &SkipReason) {
        *self.run_skips.entry(reason.kind().to_string()).or_insert(0) += 1;
    }

    pub fn record_partition_skip(&mut self, reason: &SkipReason) {
        if let SkipReason::EmptyJoin {
            mismatched,
            unmatched,
        } = reason
        {
            self.rows_mismatched += mismatched;
            self.rows_unmatched += unmatched;
        }
        *self
            .partition_skips
            .entry(reason.kind().to_string())
            .or_insert(0) += 1;
    }

    pub fn runs_skipped(&self) -> usize {
        self.run_skips.values().sum()
    }

    pub fn partitions_skipped(&self) -> usize {
        self.partition_skips.values().sum()
    }
}
