//! Sample table construction from paired entry/exit captures.
//!
//! For every verified manifest with both entry and exit captures, each
//! expiry partition is joined on contract id into observation rows. A
//! failing partition is skipped and counted; the batch never aborts for
//! one bad run.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::coverage::{CoverageReport, SkipReason};
use super::factors::{convergence_factor_a, convergence_factor_b, lag1, DEFAULT_FACTOR_WINDOW};
use super::liquidity::is_tradable;
use super::table::{ObservationRow, SampleTable};
use crate::data::{
    Capture, CaptureRef, ChainRow, Manifest, ManifestOrigin, SnapshotStore, StoreError, StoreResult,
};
use crate::matching::{resolve_price, PriceSource, ResolvedPrice};

/// Liquidity thresholds and factor window for sample construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Minimum resolved option price at entry and exit.
    pub min_tradable_price: f64,
    /// Maximum spread / price ratio at entry and exit.
    pub max_spread_ratio: f64,
    /// Minimum open interest, when reported.
    pub min_open_interest: i64,
    /// Trailing window for the convergence factors.
    pub factor_window: usize,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            min_tradable_price: 0.01,
            max_spread_ratio: 0.5,
            min_open_interest: 1,
            factor_window: DEFAULT_FACTOR_WINDOW,
        }
    }
}

/// Rows from one (run, expiry) partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionRows {
    pub rows: Vec<ObservationRow>,
    /// Joined rows dropped because expiry or strike disagreed
    pub mismatched: usize,
    /// Contracts found in only one of the two captures
    pub unmatched: usize,
}

/// Builds the sample table from every run in a snapshot store.
pub struct SampleTableBuilder<'a> {
    store: &'a SnapshotStore,
    config: SampleConfig,
}

impl<'a> SampleTableBuilder<'a> {
    pub fn new(store: &'a SnapshotStore, config: SampleConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SampleConfig {
        &self.config
    }

    /// Build the table across all run manifests plus the legacy manifest.
    ///
    /// Only a failure to enumerate the run directory is an error.
    pub fn build(&self) -> StoreResult<SampleTable> {
        let mut coverage = CoverageReport::default();
        let mut manifests = Vec::new();

        for (run_id, path) in self.store.list_run_manifests()? {
            coverage.runs_seen += 1;
            match self.load_manifest(&path, ManifestOrigin::RunDirectory, Some(&run_id)) {
                Ok(manifest) => manifests.push(manifest),
                Err(reason) => {
                    warn!("Skipping run {}: {}", run_id, reason);
                    coverage.record_run_skip(&reason);
                }
            }
        }

        let legacy = self.store.manifest_path(None);
        if legacy.exists() {
            coverage.runs_seen += 1;
            match self.load_manifest(&legacy, ManifestOrigin::Legacy, None) {
                Ok(manifest) => manifests.push(manifest),
                Err(reason) => {
                    warn!("Skipping legacy manifest: {}", reason);
                    coverage.record_run_skip(&reason);
                }
            }
        }

        let rows = self.build_from_manifests(&manifests, &mut coverage);
        Ok(SampleTable { rows, coverage })
    }

    /// Build rows from already-loaded manifests, recording skips in `coverage`.
    pub fn build_from_manifests(
        &self,
        manifests: &[Manifest],
        coverage: &mut CoverageReport,
    ) -> Vec<ObservationRow> {
        let mut rows = Vec::new();

        for manifest in manifests {
            if !manifest.has_entry() || !manifest.has_exit() {
                debug!("Run {} has no exit capture yet", manifest.run_id);
                coverage.record_run_skip(&SkipReason::PendingExit);
                continue;
            }

            let mut run_rows = 0;
            for expiry in manifest.expiry_partitions() {
                coverage.partitions_seen += 1;
                match self.build_partition(manifest, expiry) {
                    Ok(partition) => {
                        coverage.partitions_used += 1;
                        coverage.rows_mismatched += partition.mismatched;
                        coverage.rows_unmatched += partition.unmatched;
                        run_rows += partition.rows.len();
                        rows.extend(partition.rows);
                    }
                    Err(reason) => {
                        warn!("Skipping run {} expiry {}: {}", manifest.run_id, expiry, reason);
                        coverage.record_partition_skip(&reason);
                    }
                }
            }
            if run_rows > 0 {
                coverage.runs_used += 1;
            }
        }

        rows.sort_by_key(|r| r.entry_timestamp);
        self.apply_factors(&mut rows);

        coverage.rows = rows.len();
        coverage.rows_tradable = rows.iter().filter(|r| r.is_tradable).count();
        coverage.rows_missing_price = rows
            .iter()
            .filter(|r| r.entry_price.is_none() || r.exit_price.is_none())
            .count();
        info!(
            "Sample table: {} rows ({} tradable) from {}/{} runs, {} partitions skipped",
            coverage.rows,
            coverage.rows_tradable,
            coverage.runs_used,
            coverage.runs_seen,
            coverage.partitions_skipped()
        );
        rows
    }

    fn load_manifest(
        &self,
        path: &Path,
        origin: ManifestOrigin,
        run_id: Option<&str>,
    ) -> Result<Manifest, SkipReason> {
        self.store
            .load_verified_manifest(path, origin, run_id)
            .map_err(|e| SkipReason::ManifestRejected(e.to_string()))
    }

    /// Join the entry and exit captures of one expiry partition.
    pub fn build_partition(
        &self,
        manifest: &Manifest,
        expiry: NaiveDate,
    ) -> Result<PartitionRows, SkipReason> {
        let entry_ref = manifest
            .entry_ref_for(expiry)
            .ok_or(SkipReason::MissingCaptureRef { side: "entry" })?;
        let exit_ref = manifest
            .exit_ref_for(expiry)
            .ok_or(SkipReason::MissingCaptureRef { side: "exit" })?;

        let entry = self.load_capture(manifest, entry_ref)?;
        let exit = self.load_capture(manifest, exit_ref)?;

        let entry_rows = entry.rows_for_expiry(Some(expiry));
        if entry_rows.is_empty() {
            return Err(SkipReason::EmptyPartition { side: "entry" });
        }
        let exit_rows = exit.rows_for_expiry(Some(expiry));
        if exit_rows.is_empty() {
            return Err(SkipReason::EmptyPartition { side: "exit" });
        }

        let exit_by_id: HashMap<&str, &ChainRow> = exit_rows
            .iter()
            .map(|r| (r.contract_id.as_str(), *r))
            .collect();

        let mut partition = PartitionRows::default();
        let mut paired = 0;
        for entry_row in &entry_rows {
            let Some(exit_row) = exit_by_id.get(entry_row.contract_id.as_str()) else {
                continue;
            };
            paired += 1;
            if entry_row.expiry != exit_row.expiry || entry_row.strike != exit_row.strike {
                partition.mismatched += 1;
                continue;
            }
            partition
                .rows
                .push(self.observation(manifest, &entry, &exit, entry_row, exit_row));
        }

        partition.unmatched = (entry_rows.len() - paired) + (exit_rows.len() - paired);
        if partition.unmatched > 0 {
            debug!(
                "Run {} expiry {}: {} contracts in one capture only",
                manifest.run_id, expiry, partition.unmatched
            );
        }

        if partition.rows.is_empty() {
            return Err(SkipReason::EmptyJoin {
                mismatched: partition.mismatched,
                unmatched: partition.unmatched,
            });
        }
        Ok(partition)
    }

    fn load_capture(&self, manifest: &Manifest, capture_ref: &CaptureRef) -> Result<Capture, SkipReason> {
        let path = self.store.capture_path_for(manifest, &capture_ref.filename);
        self.store
            .load_verified_capture(&path, Some(&capture_ref.checksum))
            .map_err(|e| match e {
                StoreError::Integrity(err) => SkipReason::Integrity(err.to_string()),
                StoreError::Validation(err) => SkipReason::InvalidCapture(err.to_string()),
                StoreError::Json(err) => SkipReason::InvalidCapture(err.to_string()),
                StoreError::Io(err) => SkipReason::Io(format!("{}: {}", path.display(), err)),
            })
    }

    fn observation(
        &self,
        manifest: &Manifest,
        entry: &Capture,
        exit: &Capture,
        entry_row: &ChainRow,
        exit_row: &ChainRow,
    ) -> ObservationRow {
        let entry_price = resolve_price(entry_row).ok();
        let exit_price = resolve_price(exit_row).ok();
        let iv_change = match (entry_row.iv, exit_row.iv) {
            (Some(a), Some(b)) => Some(b - a),
            _ => None,
        };
        let moneyness = match (entry_row.strike.to_f64(), entry.reference_price.to_f64()) {
            (Some(strike), Some(spot)) if spot > 0.0 => Some(strike / spot),
            _ => None,
        };

        let mut row = ObservationRow {
            run_id: manifest.run_id.clone(),
            instrument: manifest.instrument.clone(),
            contract_id: entry_row.contract_id.clone(),
            expiry: entry_row.expiry,
            strike: entry_row.strike,
            side: entry_row.side,
            entry_timestamp: entry.timestamp,
            exit_timestamp: exit.timestamp,
            entry_spot: entry.reference_price,
            exit_spot: exit.reference_price,
            spot_change: exit.reference_price - entry.reference_price,
            moneyness,
            entry_iv: entry_row.iv,
            exit_iv: exit_row.iv,
            iv_change,
            entry_bid: entry_row.bid,
            entry_ask: entry_row.ask,
            entry_last: entry_row.last,
            exit_bid: exit_row.bid,
            exit_ask: exit_row.ask,
            exit_last: exit_row.last,
            entry_price: entry_price.map(|p| p.price),
            entry_price_source: price_source(entry_price),
            exit_price: exit_price.map(|p| p.price),
            exit_price_source: price_source(exit_price),
            entry_spread: entry_row.spread(),
            exit_spread: exit_row.spread(),
            entry_open_interest: entry_row.open_interest,
            exit_open_interest: exit_row.open_interest,
            data_source: manifest.data_source.clone(),
            pricing_rule: manifest.pricing_rule.clone(),
            is_tradable: false,
            factor_a: None,
            factor_b: None,
            baseline_iv_level: entry_row.iv,
            baseline_iv_change_lag1: None,
        };
        row.is_tradable = is_tradable(&row, &self.config);
        row
    }

    fn apply_factors(&self, rows: &mut [ObservationRow]) {
        let ivs: Vec<Option<f64>> = rows.iter().map(|r| r.entry_iv).collect();
        let changes: Vec<Option<f64>> = rows.iter().map(|r| r.iv_change).collect();
        let factor_a = convergence_factor_a(&ivs, self.config.factor_window);
        let factor_b = convergence_factor_b(&ivs, self.config.factor_window);
        let lagged = lag1(&changes);

        for (i, row) in rows.iter_mut().enumerate() {
            row.factor_a = factor_a[i];
            row.factor_b = factor_b[i];
            row.baseline_iv_level = row.entry_iv;
            row.baseline_iv_change_lag1 = lagged[i];
        }
    }
}

fn price_source(resolved: Option<ResolvedPrice>) -> PriceSource {
    resolved.map_or(PriceSource::Missing, |p| p.source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{parse_timestamp, ContractKey, OptionType, SnapshotRefs};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 17).unwrap()
    }

    fn row(
        id: &str,
        strike: Decimal,
        quotes: (Option<Decimal>, Option<Decimal>, Option<Decimal>),
        iv: f64,
    ) -> ChainRow {
        ChainRow {
            contract_id: id.to_string(),
            expiry: expiry(),
            strike,
            side: OptionType::Call,
            bid: quotes.0,
            ask: quotes.1,
            last: quotes.2,
            iv: Some(iv),
            open_interest: Some(100),
        }
    }

    fn write_run(
        store: &SnapshotStore,
        run_id: &str,
        entry_ts: &str,
        entry_rows: Vec<ChainRow>,
        exit_rows: Option<Vec<ChainRow>>,
    ) -> Manifest {
        let entry = Capture::new("NVDA", parse_timestamp(entry_ts).unwrap(), dec!(100), entry_rows);
        let entry_path = store.write_capture(&entry, "entry", Some(run_id)).unwrap();
        let mut refs = SnapshotRefs {
            entry: vec![store.capture_ref(&entry_path, Some(expiry())).unwrap()],
            exit: vec![],
        };
        if let Some(exit_rows) = exit_rows {
            let exit = Capture::new(
                "NVDA",
                parse_timestamp("2025-01-17 14:30:00").unwrap(),
                dec!(103),
                exit_rows,
            );
            let exit_path = store.write_capture(&exit, "exit", Some(run_id)).unwrap();
            refs.exit = vec![store.capture_ref(&exit_path, Some(expiry())).unwrap()];
        }
        let manifest = Manifest {
            run_id: run_id.to_string(),
            instrument: "NVDA".to_string(),
            created_at: parse_timestamp(entry_ts).unwrap(),
            data_source: "test".to_string(),
            pricing_rule: "mid_else_last".to_string(),
            contract_key: ContractKey {
                side: OptionType::Call,
                expiry: expiry(),
                strike: dec!(100),
                contract_id: "NVDA250117C00100000".to_string(),
            },
            snapshots: refs,
            expiries: vec![expiry()],
            timezone: None,
            mode: None,
            extra: Default::default(),
            origin: ManifestOrigin::RunDirectory,
        };
        store.write_manifest(&manifest, Some(run_id)).unwrap();
        manifest
    }

    #[test]
    fn test_paired_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        write_run(
            &store,
            "r1",
            "2025-01-10 14:30:00",
            vec![
                row("NVDA250117C00100000", dec!(100), (Some(dec!(1.00)), Some(dec!(1.20)), Some(dec!(1.1))), 0.50),
                row("NVDA250117C00105000", dec!(105), (Some(dec!(0.40)), Some(dec!(0.50)), None), 0.55),
                row("ENTRY_ONLY", dec!(110), (Some(dec!(0.1)), Some(dec!(0.2)), None), 0.6),
            ],
            Some(vec![
                row("NVDA250117C00100000", dec!(100), (Some(dec!(0)), Some(dec!(0)), Some(dec!(0.95))), 0.48),
                // strike disagrees with entry: discarded
                row("NVDA250117C00105000", dec!(106), (Some(dec!(0.30)), Some(dec!(0.40)), None), 0.52),
            ]),
        );

        let builder = SampleTableBuilder::new(&store, SampleConfig::default());
        let table = builder.build().unwrap();

        assert_eq!(table.len(), 1);
        let obs = &table.rows[0];
        assert_eq!(obs.entry_price, Some(dec!(1.10)));
        assert_eq!(obs.entry_price_source, PriceSource::Mid);
        assert_eq!(obs.exit_price, Some(dec!(0.95)));
        assert_eq!(obs.exit_price_source, PriceSource::Last);
        assert_eq!(obs.spot_change, dec!(3));
        assert_eq!(obs.moneyness, Some(1.0));
        assert!((obs.iv_change.unwrap() + 0.02).abs() < 1e-12);
        // exit ask is zero
        assert!(!obs.is_tradable);

        assert_eq!(table.coverage.rows_mismatched, 1);
        assert_eq!(table.coverage.rows_unmatched, 1);
        assert_eq!(table.coverage.rows_missing_price, 0);
        assert_eq!(table.coverage.runs_used, 1);
        assert_eq!(table.coverage.rows_tradable, 0);
    }

    #[test]
    fn test_bad_runs_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let good = vec![row("A", dec!(100), (Some(dec!(1.0)), Some(dec!(1.2)), None), 0.5)];

        write_run(&store, "good", "2025-01-10 14:30:00", good.clone(), Some(good.clone()));
        write_run(&store, "pending", "2025-01-10 15:30:00", good.clone(), None);
        let tampered = write_run(&store, "tampered", "2025-01-10 16:30:00", good.clone(), Some(good.clone()));
        let disjoint = vec![row("B", dec!(100), (Some(dec!(1.0)), Some(dec!(1.2)), None), 0.5)];
        write_run(&store, "disjoint", "2025-01-10 17:30:00", good.clone(), Some(disjoint));
        std::fs::create_dir_all(store.run_dir("partial")).unwrap();

        let exit_file = &tampered.snapshots.exit[0].filename;
        let path = store.resolve_capture_path(exit_file, Some("tampered"));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(b' ');
        std::fs::write(&path, bytes).unwrap();

        let table = SampleTableBuilder::new(&store, SampleConfig::default())
            .build()
            .unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].run_id, "good");
        assert!(table.rows[0].is_tradable);
        let coverage = &table.coverage;
        assert_eq!(coverage.runs_seen, 4);
        assert_eq!(coverage.runs_used, 1);
        assert_eq!(coverage.run_skips["pending_exit"], 1);
        assert_eq!(coverage.partition_skips["integrity"], 1);
        assert_eq!(coverage.partition_skips["empty_join"], 1);
        assert_eq!(coverage.rows_unmatched, 2);
    }

    #[test]
    fn test_rows_sorted_with_factors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let quotes = (Some(dec!(1.0)), Some(dec!(1.2)), None);

        for (run_id, ts, iv) in [
            ("c", "2025-01-12 14:30:00", 0.6),
            ("a", "2025-01-10 14:30:00", 0.4),
            ("b", "2025-01-11 14:30:00", 0.5),
        ] {
            let rows = vec![row("A", dec!(100), quotes, iv)];
            let mut exit_rows = rows.clone();
            exit_rows[0].iv = Some(iv + 0.01);
            write_run(&store, run_id, ts, rows, Some(exit_rows));
        }

        let table = SampleTableBuilder::new(&store, SampleConfig::default())
            .build()
            .unwrap();
        let runs: Vec<&str> = table.rows.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(runs, vec!["a", "b", "c"]);

        assert_eq!(table.rows[0].baseline_iv_change_lag1, None);
        assert!((table.rows[1].baseline_iv_change_lag1.unwrap() - 0.01).abs() < 1e-9);
        assert!(table.rows[0].factor_a.unwrap().abs() < 1e-9);
        // window [0.4, 0.5, 0.6]: median 0.5, MAD 0.1
        assert!((table.rows[2].factor_b.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_integrity_failure_skips_only_its_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let near = expiry();
        let far = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap();
        let quotes = (Some(dec!(1.0)), Some(dec!(1.2)), None);

        let mut refs = SnapshotRefs::default();
        for exp in [near, far] {
            let mut rows = vec![
                row("A", dec!(100), quotes, 0.5),
                row("B", dec!(105), quotes, 0.6),
            ];
            for r in rows.iter_mut() {
                r.expiry = exp;
                r.contract_id = format!("{}_{}", r.contract_id, exp.format("%y%m%d"));
            }
            let entry = Capture::new(
                "NVDA",
                parse_timestamp("2025-01-10 14:30:00").unwrap(),
                dec!(100),
                rows.clone(),
            );
            let exit = Capture::new(
                "NVDA",
                parse_timestamp("2025-01-15 14:30:00").unwrap(),
                dec!(102),
                rows,
            );
            let entry_path = store.write_capture(&entry, "entry", Some("multi")).unwrap();
            let exit_path = store.write_capture(&exit, "exit", Some("multi")).unwrap();
            refs.entry.push(store.capture_ref(&entry_path, Some(exp)).unwrap());
            refs.exit.push(store.capture_ref(&exit_path, Some(exp)).unwrap());
        }
        let manifest = Manifest {
            run_id: "multi".to_string(),
            instrument: "NVDA".to_string(),
            created_at: parse_timestamp("2025-01-10 14:30:00").unwrap(),
            data_source: "test".to_string(),
            pricing_rule: "mid_else_last".to_string(),
            contract_key: ContractKey {
                side: OptionType::Call,
                expiry: near,
                strike: dec!(100),
                contract_id: "A".to_string(),
            },
            snapshots: refs,
            expiries: vec![near, far],
            timezone: None,
            mode: None,
            extra: Default::default(),
            origin: ManifestOrigin::RunDirectory,
        };
        store.write_manifest(&manifest, Some("multi")).unwrap();

        // corrupt the far expiry's exit capture after its checksum was recorded
        let far_exit = manifest.exit_ref_for(far).unwrap();
        let path = store.resolve_capture_path(&far_exit.filename, Some("multi"));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(b' ');
        std::fs::write(&path, bytes).unwrap();

        let table = SampleTableBuilder::new(&store, SampleConfig::default())
            .build()
            .unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.rows.iter().all(|r| r.expiry == near));
        let coverage = &table.coverage;
        assert_eq!(coverage.runs_seen, 1);
        assert_eq!(coverage.runs_used, 1);
        assert_eq!(coverage.partitions_seen, 2);
        assert_eq!(coverage.partitions_used, 1);
        assert_eq!(coverage.partition_skips["integrity"], 1);
        assert_eq!(coverage.partitions_skipped(), 1);
    }

    #[test]
    fn test_missing_price_rows_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let quotes = (Some(dec!(1.0)), Some(dec!(1.2)), None);
        let entry_rows = vec![
            row("A", dec!(100), quotes, 0.5),
            row("B", dec!(105), quotes, 0.6),
        ];
        let exit_rows = vec![
            row("A", dec!(100), quotes, 0.5),
            row("B", dec!(105), (None, None, None), 0.6),
        ];
        write_run(&store, "r1", "2025-01-10 14:30:00", entry_rows, Some(exit_rows));

        let table = SampleTableBuilder::new(&store, SampleConfig::default())
            .build()
            .unwrap();

        assert_eq!(table.len(), 2);
        let quoteless = table.rows.iter().find(|r| r.contract_id == "B").unwrap();
        assert_eq!(quoteless.exit_price_source, PriceSource::Missing);
        assert!(!quoteless.is_tradable);
        assert_eq!(table.coverage.rows_missing_price, 1);
        assert_eq!(table.coverage.rows_tradable, 1);
        assert_eq!(table.coverage.rows_unmatched, 0);
    }
}
