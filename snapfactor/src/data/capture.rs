//! Capture sessions: entry and exit capture orchestration.
//!
//! A session fetches a fresh chain from a [`SnapshotSource`], writes one
//! capture per expiry partition into the run directory, and maintains the
//! run manifest:
//! - `capture_entry` picks the expiries and the at-the-money call, then writes the manifest
//! - `capture_exit` re-verifies the manifest and appends the exit captures
//!
//! The fetch layer itself lives outside this crate; retries are the
//! source's concern.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::{timestamp_tag, SnapshotStore, StoreError, StoreResult};
use super::types::{
    format_timestamp, parse_timestamp, Capture, CaptureRef, Manifest, ManifestOrigin, SnapshotRefs,
};
use crate::matching::{pick_expiries, select_contract, PRICING_RULE};

/// Number of expiry partitions captured per run.
pub const DEFAULT_EXPIRY_COUNT: usize = 3;

/// Label of entry captures in file names.
pub const ENTRY_LABEL: &str = "entry";

/// Label of exit captures in file names.
pub const EXIT_LABEL: &str = "exit";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("No data for {0}")]
    NoData(String),
}

/// Provider of fresh option chain captures.
pub trait SnapshotSource {
    /// Fetch the current chain for `ticker` across all listed expiries.
    fn fetch_instrument_snapshot(&self, ticker: &str) -> Result<Capture, FetchError>;

    /// Human-readable source name recorded in manifests.
    fn data_source(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No future expiries listed for {0}")]
    NoExpiries(String),

    #[error("No call contracts to select for {0}")]
    NoContract(String),

    #[error("Manifest not found for run {0}")]
    ManifestNotFound(String),

    #[error("No {label} captures written for run {run_id}")]
    NothingWritten { run_id: String, label: &'static str },
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Capture orchestration over one store and one source.
pub struct CaptureSession<'a, S: SnapshotSource> {
    store: &'a SnapshotStore,
    source: S,
    expiry_count: usize,
}

impl<'a, S: SnapshotSource> CaptureSession<'a, S> {
    pub fn new(store: &'a SnapshotStore, source: S) -> Self {
        Self {
            store,
            source,
            expiry_count: DEFAULT_EXPIRY_COUNT,
        }
    }

    pub fn with_expiry_count(mut self, count: usize) -> Self {
        self.expiry_count = count.max(1);
        self
    }

    /// Capture the entry side of a new run and write its manifest.
    ///
    /// Without an explicit `run_id` the run is named `<TICKER>_<YYYYmmdd_HHMMSS>`
    /// after the capture time.
    pub fn capture_entry(&self, ticker: &str, run_id: Option<&str>) -> CaptureResult<Manifest> {
        let capture = self.source.fetch_instrument_snapshot(ticker)?;
        let run_id = match run_id {
            Some(id) => id.to_string(),
            None => format!("{}_{}", ticker.to_uppercase(), timestamp_tag(&capture.timestamp)),
        };

        let expiries = pick_expiries(&capture.timestamp, &capture.expiries(), self.expiry_count);
        let primary = *expiries
            .first()
            .ok_or_else(|| CaptureError::NoExpiries(ticker.to_string()))?;
        let contract_key = select_contract(&capture.restricted_to(primary))
            .ok_or_else(|| CaptureError::NoContract(format!("{} {}", ticker, primary)))?;

        let refs = self.write_partitions(&capture, &expiries, ENTRY_LABEL, &run_id)?;
        if refs.is_empty() {
            return Err(CaptureError::NothingWritten {
                run_id,
                label: ENTRY_LABEL,
            });
        }

        let mut extra = serde_json::Map::new();
        extra.insert(
            "exit_target_rule".to_string(),
            Value::String("entry_plus_5_trading_days".to_string()),
        );

        let manifest = Manifest {
            run_id: run_id.clone(),
            instrument: capture.instrument.to_uppercase(),
            created_at: capture.timestamp,
            data_source: self.source.data_source().to_string(),
            pricing_rule: PRICING_RULE.to_string(),
            contract_key,
            snapshots: SnapshotRefs {
                entry: refs,
                exit: Vec::new(),
            },
            expiries,
            timezone: Some("UTC".to_string()),
            mode: Some("offline_snapshot".to_string()),
            extra,
            origin: ManifestOrigin::RunDirectory,
        };
        self.store.write_manifest(&manifest, Some(&run_id))?;

        info!(
            "Entry captured for run {}: {} {} @ {} ({} expiries)",
            run_id,
            manifest.contract_key.contract_id,
            manifest.contract_key.expiry,
            manifest.contract_key.strike,
            manifest.snapshots.entry.len()
        );
        Ok(manifest)
    }

    /// Capture the exit side of an existing run and update its manifest.
    pub fn capture_exit(&self, run_id: &str) -> CaptureResult<Manifest> {
        let manifest_path = self.store.manifest_path(Some(run_id));
        if !manifest_path.exists() {
            return Err(CaptureError::ManifestNotFound(run_id.to_string()));
        }
        let mut manifest = self.store.load_verified_manifest(
            &manifest_path,
            ManifestOrigin::RunDirectory,
            Some(run_id),
        )?;

        let capture = self.source.fetch_instrument_snapshot(&manifest.instrument)?;
        if capture.find(&manifest.contract_key.contract_id).is_none() {
            warn!(
                "Run {}: contract {} not quoted in exit capture",
                run_id, manifest.contract_key.contract_id
            );
        }

        let partitions = manifest.expiry_partitions();
        let refs = self.write_partitions(&capture, &partitions, EXIT_LABEL, run_id)?;
        if refs.is_empty() {
            return Err(CaptureError::NothingWritten {
                run_id: run_id.to_string(),
                label: EXIT_LABEL,
            });
        }

        manifest.snapshots.exit = refs;
        manifest.extra.insert(
            "exit_captured_at".to_string(),
            Value::String(format_timestamp(&capture.timestamp)),
        );
        self.store.write_manifest(&manifest, Some(run_id))?;

        info!(
            "Exit captured for run {} ({} expiries)",
            run_id,
            manifest.snapshots.exit.len()
        );
        Ok(manifest)
    }

    fn write_partitions(
        &self,
        capture: &Capture,
        expiries: &[NaiveDate],
        label: &str,
        run_id: &str,
    ) -> CaptureResult<Vec<CaptureRef>> {
        let mut refs = Vec::with_capacity(expiries.len());
        for &expiry in expiries {
            let partition = capture.restricted_to(expiry);
            if partition.is_empty() {
                warn!("Run {}: no {} rows for expiry {}", run_id, label, expiry);
                continue;
            }
            let path = self.store.write_capture(&partition, label, Some(run_id))?;
            debug!("Run {}: wrote {}", run_id, path.display());
            refs.push(self.store.capture_ref(&path, Some(expiry))?);
        }
        Ok(refs)
    }
}

/// Runs whose manifest has no exit capture yet, sorted by run id.
///
/// Manifests that fail verification are logged and left out.
pub fn list_pending_exits(store: &SnapshotStore) -> StoreResult<Vec<String>> {
    let mut pending = Vec::new();
    for (run_id, path) in store.list_run_manifests()? {
        match store.load_verified_manifest(&path, ManifestOrigin::RunDirectory, Some(&run_id)) {
            Ok(manifest) if !manifest.has_exit() => pending.push(run_id),
            Ok(_) => {}
            Err(e) => warn!("Skipping run {}: {}", run_id, e),
        }
    }
    Ok(pending)
}

/// Capture time of the exit side, if the manifest recorded one.
pub fn exit_captured_at(manifest: &Manifest) -> Option<DateTime<Utc>> {
    manifest
        .extra
        .get("exit_captured_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
}
