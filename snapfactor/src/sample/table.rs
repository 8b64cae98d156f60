//! Observation rows and the sample table they form.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use super::coverage::CoverageReport;
use crate::data::types::format_timestamp;
use crate::data::OptionType;
use crate::matching::PriceSource;

/// One contract observed in both the entry and the exit capture of a run.
///
/// Column order here is the column order of the CSV output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRow {
    pub run_id: String,
    pub instrument: String,
    pub contract_id: String,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub side: OptionType,
    #[serde(serialize_with = "serialize_timestamp")]
    pub entry_timestamp: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub exit_timestamp: DateTime<Utc>,
    pub entry_spot: Decimal,
    pub exit_spot: Decimal,
    pub spot_change: Decimal,
    pub moneyness: Option<f64>,
    pub entry_iv: Option<f64>,
    pub exit_iv: Option<f64>,
    pub iv_change: Option<f64>,
    pub entry_bid: Option<Decimal>,
    pub entry_ask: Option<Decimal>,
    pub entry_last: Option<Decimal>,
    pub exit_bid: Option<Decimal>,
    pub exit_ask: Option<Decimal>,
    pub exit_last: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub entry_price_source: PriceSource,
    pub exit_price: Option<Decimal>,
    pub exit_price_source: PriceSource,
    pub entry_spread: Option<Decimal>,
    pub exit_spread: Option<Decimal>,
    pub entry_open_interest: Option<i64>,
    pub exit_open_interest: Option<i64>,
    pub data_source: String,
    pub pricing_rule: String,
    pub is_tradable: bool,
    pub factor_a: Option<f64>,
    pub factor_b: Option<f64>,
    pub baseline_iv_level: Option<f64>,
    pub baseline_iv_change_lag1: Option<f64>,
}

fn serialize_timestamp<S: serde::Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

impl ObservationRow {
    /// Cluster label for the block bootstrap: `<entry_timestamp>|<expiry>`.
    pub fn group_label(&self) -> String {
        format!("{}|{}", format_timestamp(&self.entry_timestamp), self.expiry)
    }

    pub fn entry_spread_f64(&self) -> Option<f64> {
        self.entry_spread.and_then(|s| s.to_f64())
    }

    pub fn entry_open_interest_f64(&self) -> Option<f64> {
        self.entry_open_interest.map(|oi| oi as f64)
    }
}

/// Sample table plus the coverage counters of the build that produced it.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub rows: Vec<ObservationRow>,
    pub coverage: CoverageReport,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows passing the liquidity predicate.
    pub fn tradable_rows(&self) -> Vec<ObservationRow> {
        self.rows.iter().filter(|r| r.is_tradable).cloned().collect()
    }
}
