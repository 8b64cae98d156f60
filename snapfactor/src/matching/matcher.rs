//! Contract re-matching across captures.
//!
//! The contract chosen at entry is looked up again in a later capture:
//! - exact match on (side, expiry, strike, contract id)
//! - optionally, the nearest strike among rows with the same side and expiry
//!
//! Substitution is only ever allowed on the exit side; [`match_entry`] is
//! always strict.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::{ChainRow, ContractKey};

/// Whether a missing contract may be replaced by the nearest strike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubstitutionPolicy {
    /// Exact match only.
    #[default]
    Strict,
    /// Fall back to the nearest strike with the same side and expiry.
    NearestStrike,
}

impl SubstitutionPolicy {
    pub fn allows_substitution(&self) -> bool {
        matches!(self, Self::NearestStrike)
    }
}

/// Why a contract could not be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No exact row and substitution disallowed
    NoExactMatch,
    /// No row with the same side and expiry exists at all
    NoSameExpiry,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoExactMatch => f.write_str("no exact match"),
            Self::NoSameExpiry => f.write_str("no contract with the same side and expiry"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Contract {contract_id} ({side} {expiry} @ {strike}) not found: {reason}")]
pub struct ContractNotFoundError {
    pub contract_id: String,
    pub side: &'static str,
    pub expiry: NaiveDate,
    pub strike: Decimal,
    pub reason: NotFoundReason,
}

impl ContractNotFoundError {
    fn new(key: &ContractKey, reason: NotFoundReason) -> Self {
        Self {
            contract_id: key.contract_id.clone(),
            side: key.side.as_str(),
            expiry: key.expiry,
            strike: key.strike,
            reason,
        }
    }
}

/// Record of a nearest-strike substitution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substitution {
    pub original_strike: Decimal,
    pub substitute_strike: Decimal,
    pub strike_distance: Decimal,
    pub substitute_contract_id: String,
}

/// A matched row, with the substitution record if one was needed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractMatch<'a> {
    pub row: &'a ChainRow,
    pub substitution: Option<Substitution>,
}

impl ContractMatch<'_> {
    pub fn substituted(&self) -> bool {
        self.substitution.is_some()
    }
}

/// Locate `key` in `rows` under `policy`.
pub fn match_contract<'a>(
    rows: &'a [ChainRow],
    key: &ContractKey,
    policy: SubstitutionPolicy,
) -> Result<ContractMatch<'a>, ContractNotFoundError> {
    let exact = rows.iter().find(|r| {
        r.side == key.side
            && r.expiry == key.expiry
            && r.strike == key.strike
            && r.contract_id == key.contract_id
    });
    if let Some(row) = exact {
        return Ok(ContractMatch {
            row,
            substitution: None,
        });
    }

    if !policy.allows_substitution() {
        return Err(ContractNotFoundError::new(key, NotFoundReason::NoExactMatch));
    }

    // Strictly-less keeps the first row in file order on ties.
    let mut best: Option<(&ChainRow, Decimal)> = None;
    for row in rows.iter().filter(|r| r.side == key.side && r.expiry == key.expiry) {
        let distance = (row.strike - key.strike).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((row, distance));
        }
    }

    let (row, distance) =
        best.ok_or_else(|| ContractNotFoundError::new(key, NotFoundReason::NoSameExpiry))?;
    Ok(ContractMatch {
        row,
        substitution: Some(Substitution {
            original_strike: key.strike,
            substitute_strike: row.strike,
            strike_distance: distance,
            substitute_contract_id: row.contract_id.clone(),
        }),
    })
}

/// Entry-side lookup. Entry defines ground truth, so it never substitutes.
pub fn match_entry<'a>(
    rows: &'a [ChainRow],
    key: &ContractKey,
) -> Result<ContractMatch<'a>, ContractNotFoundError> {
    match_contract(rows, key, SubstitutionPolicy::Strict)
}

/// Exit-side lookup under the caller's policy.
pub fn match_exit<'a>(
    rows: &'a [ChainRow],
    key: &ContractKey,
    policy: SubstitutionPolicy,
) -> Result<ContractMatch<'a>, ContractNotFoundError> {
    match_contract(rows, key, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::OptionType;
    use rust_decimal_macros::dec;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 17).unwrap()
    }

    fn row(contract_id: &str, side: OptionType, strike: Decimal) -> ChainRow {
        ChainRow {
            contract_id: contract_id.to_string(),
            expiry: expiry(),
            strike,
            side,
            bid: Some(dec!(1.00)),
            ask: Some(dec!(1.20)),
            last: None,
            iv: Some(0.4),
            open_interest: Some(50),
        }
    }

    fn key() -> ContractKey {
        ContractKey {
            side: OptionType::Call,
            expiry: expiry(),
            strike: dec!(100),
            contract_id: "NVDA250117C00100000".to_string(),
        }
    }

    #[test]
    fn test_exact_match_not_substituted() {
        let rows = vec![
            row("NVDA250117C00095000", OptionType::Call, dec!(95)),
            row("NVDA250117C00100000", OptionType::Call, dec!(100)),
        ];
        let m = match_contract(&rows, &key(), SubstitutionPolicy::NearestStrike).unwrap();
        assert!(!m.substituted());
        assert_eq!(m.row, &rows[1]);
    }

    #[test]
    fn test_nearest_strike_substitution() {
        let rows = vec![
            row("NVDA250117P00100000", OptionType::Put, dec!(100)),
            row("NVDA250117C00110000", OptionType::Call, dec!(110)),
            row("NVDA250117C00105000", OptionType::Call, dec!(105)),
        ];
        let m = match_exit(&rows, &key(), SubstitutionPolicy::NearestStrike).unwrap();
        let sub = m.substitution.clone().unwrap();
        assert_eq!(m.row.strike, dec!(105));
        assert_eq!(sub.original_strike, dec!(100));
        assert_eq!(sub.substitute_strike, dec!(105));
        assert_eq!(sub.strike_distance, dec!(5));
        assert_eq!(sub.substitute_contract_id, "NVDA250117C00105000");
    }

    #[test]
    fn test_tie_broken_by_file_order() {
        let rows = vec![
            row("B", OptionType::Call, dec!(102.5)),
            row("A", OptionType::Call, dec!(97.5)),
        ];
        let m = match_exit(&rows, &key(), SubstitutionPolicy::NearestStrike).unwrap();
        assert_eq!(m.row.contract_id, "B");
    }

    #[test]
    fn test_entry_never_substitutes() {
        let rows = vec![row("NVDA250117C00105000", OptionType::Call, dec!(105))];
        let err = match_entry(&rows, &key()).unwrap_err();
        assert_eq!(err.reason, NotFoundReason::NoExactMatch);
    }

    #[test]
    fn test_same_expiry_absence_not_recoverable() {
        let mut other = row("NVDA250124C00100000", OptionType::Call, dec!(100));
        other.expiry = NaiveDate::from_ymd_opt(2025, 1, 24).unwrap();
        let rows = vec![other, row("P", OptionType::Put, dec!(100))];
        let err = match_exit(&rows, &key(), SubstitutionPolicy::NearestStrike).unwrap_err();
        assert_eq!(err.reason, NotFoundReason::NoSameExpiry);
        assert!(err.to_string().contains("same side and expiry"));
    }
}
