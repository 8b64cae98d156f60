//! Entry contract and expiry selection.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::data::{Capture, ChainRow, ContractKey, OptionType};

/// Target days to expiry for entry selection.
pub const TARGET_DTE: f64 = 30.0;

/// Preferred DTE band (inclusive).
pub const DTE_BAND: (f64, f64) = (20.0, 40.0);

/// Fractional days from `as_of` to the start of `expiry` (UTC).
pub fn days_to_expiry(as_of: &DateTime<Utc>, expiry: NaiveDate) -> f64 {
    let expiry_start = expiry.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    match expiry_start {
        Some(start) => (start - *as_of).num_seconds() as f64 / 86_400.0,
        None => f64::NAN,
    }
}

/// Choose up to `count` expiries for a capture run.
///
/// Expiries inside the 20-40 DTE band come first, nearest to 30 DTE; the
/// remainder is filled with the nearest future expiries.
pub fn pick_expiries(as_of: &DateTime<Utc>, expiries: &[NaiveDate], count: usize) -> Vec<NaiveDate> {
    let with_dte: Vec<(NaiveDate, f64)> = expiries
        .iter()
        .map(|&e| (e, days_to_expiry(as_of, e)))
        .collect();

    let mut in_band: Vec<(NaiveDate, f64)> = with_dte
        .iter()
        .copied()
        .filter(|(_, dte)| *dte >= DTE_BAND.0 && *dte <= DTE_BAND.1)
        .collect();
    in_band.sort_by(|a, b| (a.1 - TARGET_DTE).abs().total_cmp(&(b.1 - TARGET_DTE).abs()));

    let mut selected: Vec<NaiveDate> = in_band.iter().take(count).map(|(e, _)| *e).collect();

    if selected.len() < count {
        let mut future: Vec<(NaiveDate, f64)> =
            with_dte.into_iter().filter(|(_, dte)| *dte > 0.0).collect();
        future.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (expiry, _) in future {
            if selected.len() >= count {
                break;
            }
            if !selected.contains(&expiry) {
                selected.push(expiry);
            }
        }
    }
    selected
}

/// At-the-money call of the nearest expiry in `capture`.
///
/// Minimises `|strike - reference_price|`; the first row in file order wins
/// ties. Returns `None` when the capture holds no calls.
pub fn select_contract(capture: &Capture) -> Option<ContractKey> {
    let nearest = capture
        .chain
        .iter()
        .filter(|r| r.side == OptionType::Call)
        .map(|r| r.expiry)
        .min()?;

    let mut best: Option<(&ChainRow, Decimal)> = None;
    for row in capture
        .chain
        .iter()
        .filter(|r| r.side == OptionType::Call && r.expiry == nearest)
    {
        let distance = (row.strike - capture.reference_price).abs();
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((row, distance));
        }
    }
    best.map(|(row, _)| ContractKey::from_row(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::parse_timestamp;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn call(id: &str, expiry: NaiveDate, strike: Decimal) -> ChainRow {
        ChainRow {
            contract_id: id.to_string(),
            expiry,
            strike,
            side: OptionType::Call,
            bid: None,
            ask: None,
            last: None,
            iv: None,
            open_interest: None,
        }
    }

    #[test]
    fn test_pick_expiries_prefers_band() {
        let as_of = parse_timestamp("2025-01-01 00:00:00").unwrap();
        let expiries = vec![
            date(2024, 12, 27),
            date(2025, 1, 3),
            date(2025, 1, 24),
            date(2025, 1, 31),
            date(2025, 2, 7),
        ];
        // DTE: -5, 2, 23, 30, 37
        let picked = pick_expiries(&as_of, &expiries, 3);
        assert_eq!(picked, vec![date(2025, 1, 31), date(2025, 1, 24), date(2025, 2, 7)]);

        let picked = pick_expiries(&as_of, &expiries[..3], 3);
        assert_eq!(picked, vec![date(2025, 1, 24), date(2025, 1, 3)]);
    }

    #[test]
    fn test_select_contract_atm_nearest_expiry() {
        let near = date(2025, 1, 17);
        let far = date(2025, 2, 21);
        let mut put = call("P", near, dec!(100));
        put.side = OptionType::Put;
        let capture = Capture::new(
            "NVDA",
            parse_timestamp("2025-01-10 14:30:00").unwrap(),
            dec!(101),
            vec![
                put,
                call("FAR100", far, dec!(100)),
                call("C095", near, dec!(95)),
                call("C100", near, dec!(100)),
                call("C102", near, dec!(102)),
            ],
        );
        let key = select_contract(&capture).unwrap();
        assert_eq!(key.contract_id, "C100");
        assert_eq!(key.expiry, near);
        assert_eq!(key.side, OptionType::Call);
    }

    #[test]
    fn test_select_contract_no_calls() {
        let capture = Capture::new(
            "NVDA",
            parse_timestamp("2025-01-10 14:30:00").unwrap(),
            dec!(101),
            vec![],
        );
        assert!(select_contract(&capture).is_none());
    }
}
