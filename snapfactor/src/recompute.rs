//! Paired-capture recomputation of a covered call.
//!
//! Re-derives the P&L of one run (100 shares long, one call short) from
//! the stored entry and exit captures. Every check failure becomes a
//! `Fail` row with its reason; nothing is returned as an error.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::data::types::format_timestamp;
use crate::data::{Capture, CaptureRef, Manifest, ManifestOrigin, OptionType, SnapshotStore, StoreError};
use crate::matching::{
    match_entry, match_exit, resolve_price, ContractNotFoundError, MissingPriceError, PriceSource,
    SubstitutionPolicy,
};

/// Shares held against one short call.
pub const SHARES: i64 = 100;

/// Outcome of a recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchStatus {
    /// Exact contract found at both ends
    Ok,
    /// Exit used a nearest-strike substitute
    Relaxed,
    Fail,
}

#[derive(Error, Debug)]
pub enum RecomputeError {
    #[error("No manifest found for {0}")]
    ManifestNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Manifest has no {0} capture")]
    MissingCapture(&'static str),

    #[error("{0}")]
    ContractNotFound(#[from] ContractNotFoundError),

    #[error("{0}")]
    MissingPrice(#[from] MissingPriceError),

    #[error("IV missing at {0}")]
    MissingIv(&'static str),
}

/// One recomputation result, written as a CSV row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairedCheckRow {
    pub match_status: MatchStatus,
    pub failure_reason: String,
    pub strict_match: bool,
    pub substituted_strike: bool,
    pub run_id: Option<String>,
    pub instrument: Option<String>,
    pub entry_timestamp: Option<String>,
    pub exit_timestamp: Option<String>,
    pub entry_spot: Option<Decimal>,
    pub exit_spot: Option<Decimal>,
    pub expiry: Option<String>,
    pub strike: Option<Decimal>,
    pub side: Option<OptionType>,
    pub contract_id_manifest: Option<String>,
    pub contract_id_entry: Option<String>,
    pub contract_id_exit: Option<String>,
    pub entry_bid: Option<Decimal>,
    pub entry_ask: Option<Decimal>,
    pub entry_last: Option<Decimal>,
    pub exit_bid: Option<Decimal>,
    pub exit_ask: Option<Decimal>,
    pub exit_last: Option<Decimal>,
    pub premium_open: Option<Decimal>,
    pub premium_close: Option<Decimal>,
    pub entry_price_source: Option<PriceSource>,
    pub exit_price_source: Option<PriceSource>,
    pub entry_iv: Option<f64>,
    pub exit_iv: Option<f64>,
    pub stock_pnl: Option<Decimal>,
    pub option_pnl: Option<Decimal>,
    pub total_pnl: Option<Decimal>,
    pub shares: i64,
    pub original_strike: Option<Decimal>,
    pub substitute_strike: Option<Decimal>,
    pub strike_distance: Option<Decimal>,
    pub substitute_contract_id: Option<String>,
    pub pricing_rule: Option<String>,
    pub data_source: Option<String>,
}

impl PairedCheckRow {
    fn pending(run_id: Option<&str>) -> Self {
        Self {
            match_status: MatchStatus::Fail,
            failure_reason: String::new(),
            strict_match: false,
            substituted_strike: false,
            run_id: run_id.map(str::to_string),
            instrument: None,
            entry_timestamp: None,
            exit_timestamp: None,
            entry_spot: None,
            exit_spot: None,
            expiry: None,
            strike: None,
            side: None,
            contract_id_manifest: None,
            contract_id_entry: None,
            contract_id_exit: None,
            entry_bid: None,
            entry_ask: None,
            entry_last: None,
            exit_bid: None,
            exit_ask: None,
            exit_last: None,
            premium_open: None,
            premium_close: None,
            entry_price_source: None,
            exit_price_source: None,
            entry_iv: None,
            exit_iv: None,
            stock_pnl: None,
            option_pnl: None,
            total_pnl: None,
            shares: SHARES,
            original_strike: None,
            substitute_strike: None,
            strike_distance: None,
            substitute_contract_id: None,
            pricing_rule: None,
            data_source: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.match_status != MatchStatus::Fail
    }
}

/// Recompute one run's covered call from its stored captures.
///
/// `run_id` selects `runs/<run_id>/`; without one, or when that run has
/// no manifest, the legacy root manifest is used.
pub fn recompute_paired(
    store: &SnapshotStore,
    run_id: Option<&str>,
    policy: SubstitutionPolicy,
) -> PairedCheckRow {
    let mut row = PairedCheckRow::pending(run_id);
    match fill_row(store, run_id, policy, &mut row) {
        Ok(()) => {
            info!(
                "Recomputed run {}: {:?}, total P&L {}",
                row.run_id.as_deref().unwrap_or("?"),
                row.match_status,
                row.total_pnl.unwrap_or_default()
            );
        }
        Err(e) => {
            warn!("Recompute failed: {}", e);
            row.match_status = MatchStatus::Fail;
            row.failure_reason = e.to_string();
            row.strict_match = false;
            row.substituted_strike = false;
        }
    }
    row
}

fn locate_manifest(store: &SnapshotStore, run_id: Option<&str>) -> Result<Manifest, RecomputeError> {
    if let Some(id) = run_id {
        let path = store.manifest_path(Some(id));
        if path.exists() {
            return Ok(store.load_verified_manifest(&path, ManifestOrigin::RunDirectory, Some(id))?);
        }
    }
    let legacy = store.manifest_path(None);
    if legacy.exists() {
        return Ok(store.load_verified_manifest(&legacy, ManifestOrigin::Legacy, None)?);
    }
    Err(RecomputeError::ManifestNotFound(
        run_id.unwrap_or("legacy store").to_string(),
    ))
}

fn load_side(
    store: &SnapshotStore,
    manifest: &Manifest,
    capture_ref: Option<&CaptureRef>,
    side: &'static str,
) -> Result<Capture, RecomputeError> {
    let capture_ref = capture_ref.ok_or(RecomputeError::MissingCapture(side))?;
    let path = store.capture_path_for(manifest, &capture_ref.filename);
    Ok(store.load_verified_capture(&path, Some(&capture_ref.checksum))?)
}

fn fill_row(
    store: &SnapshotStore,
    run_id: Option<&str>,
    policy: SubstitutionPolicy,
    row: &mut PairedCheckRow,
) -> Result<(), RecomputeError> {
    let manifest = locate_manifest(store, run_id)?;
    row.run_id = Some(manifest.run_id.clone());
    row.instrument = Some(manifest.instrument.clone());
    row.pricing_rule = Some(manifest.pricing_rule.clone());
    row.data_source = Some(manifest.data_source.clone());

    if !manifest.has_entry() {
        return Err(RecomputeError::MissingCapture("entry"));
    }
    if !manifest.has_exit() {
        return Err(RecomputeError::MissingCapture("exit"));
    }

    let key = &manifest.contract_key;
    row.expiry = Some(key.expiry.to_string());
    row.strike = Some(key.strike);
    row.side = Some(key.side);
    row.contract_id_manifest = Some(key.contract_id.clone());

    let entry = load_side(store, &manifest, manifest.entry_ref_for(key.expiry), "entry")?;
    let exit = load_side(store, &manifest, manifest.exit_ref_for(key.expiry), "exit")?;
    row.entry_timestamp = Some(format_timestamp(&entry.timestamp));
    row.exit_timestamp = Some(format_timestamp(&exit.timestamp));
    row.entry_spot = Some(entry.reference_price);
    row.exit_spot = Some(exit.reference_price);

    let entry_match = match_entry(&entry.chain, key)?;
    let exit_match = match_exit(&exit.chain, key, policy)?;
    let (open_row, close_row) = (entry_match.row, exit_match.row);

    row.contract_id_entry = Some(open_row.contract_id.clone());
    row.contract_id_exit = Some(close_row.contract_id.clone());
    row.entry_bid = open_row.bid;
    row.entry_ask = open_row.ask;
    row.entry_last = open_row.last;
    row.exit_bid = close_row.bid;
    row.exit_ask = close_row.ask;
    row.exit_last = close_row.last;

    let open = resolve_price(open_row)?;
    let close = resolve_price(close_row)?;
    row.premium_open = Some(open.price);
    row.premium_close = Some(close.price);
    row.entry_price_source = Some(open.source);
    row.exit_price_source = Some(close.source);

    row.entry_iv = Some(open_row.iv.ok_or(RecomputeError::MissingIv("entry"))?);
    row.exit_iv = Some(close_row.iv.ok_or(RecomputeError::MissingIv("exit"))?);

    let shares = Decimal::from(SHARES);
    let stock_pnl = (exit.reference_price - entry.reference_price) * shares;
    let option_pnl = (open.price - close.price) * shares;
    row.stock_pnl = Some(stock_pnl);
    row.option_pnl = Some(option_pnl);
    row.total_pnl = Some(stock_pnl + option_pnl);

    if let Some(sub) = &exit_match.substitution {
        row.original_strike = Some(sub.original_strike);
        row.substitute_strike = Some(sub.substitute_strike);
        row.strike_distance = Some(sub.strike_distance);
        row.substitute_contract_id = Some(sub.substitute_contract_id.clone());
    }
    row.substituted_strike = exit_match.substituted();
    row.strict_match = !row.substituted_strike;
    row.match_status = if row.substituted_strike {
        MatchStatus::Relaxed
    } else {
        MatchStatus::Ok
    };
    Ok(())
}
