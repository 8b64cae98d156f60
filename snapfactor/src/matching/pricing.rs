//! Mid-else-last price rule, applied identically at entry and exit.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::ChainRow;

/// Name of the pricing rule recorded in manifests.
pub const PRICING_RULE: &str = "mid_else_last";

/// Which quote a resolved price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Mid,
    Last,
    /// No usable quote; only appears in tables, never in a resolved price
    Missing,
}

impl PriceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mid => "mid",
            Self::Last => "last",
            Self::Missing => "missing",
        }
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("No usable price for {contract_id}: bid/ask/last missing or non-positive")]
pub struct MissingPriceError {
    pub contract_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPrice {
    pub price: Decimal,
    pub source: PriceSource,
}

impl ResolvedPrice {
    pub fn mid_used(&self) -> bool {
        self.source == PriceSource::Mid
    }
}

/// Midpoint when bid and ask are both positive, else last if positive.
pub fn resolve_price(row: &ChainRow) -> Result<ResolvedPrice, MissingPriceError> {
    if let (Some(bid), Some(ask)) = (row.bid, row.ask) {
        if bid > Decimal::ZERO && ask > Decimal::ZERO {
            return Ok(ResolvedPrice {
                price: (bid + ask) / Decimal::TWO,
                source: PriceSource::Mid,
            });
        }
    }
    match row.last {
        Some(last) if last > Decimal::ZERO => Ok(ResolvedPrice {
            price: last,
            source: PriceSource::Last,
        }),
        _ => Err(MissingPriceError {
            contract_id: row.contract_id.clone(),
        }),
    }
}
