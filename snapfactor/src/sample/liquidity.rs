//! Tradability predicate for observation rows.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::builder::SampleConfig;
use super::table::ObservationRow;

fn positive(value: Option<Decimal>) -> bool {
    value.map_or(false, |v| v > Decimal::ZERO)
}

fn spread_ratio(spread: Option<Decimal>, price: Decimal) -> Option<f64> {
    if price <= Decimal::ZERO {
        return None;
    }
    spread.and_then(|s| (s / price).to_f64())
}

/// Whether an observation is usable for inference.
///
/// Requires, at both entry and exit:
/// - a resolved price of at least `min_tradable_price`
/// - a spread-to-price ratio within `max_spread_ratio`, when a spread exists
/// - strictly positive bid and ask
/// - open interest of at least `min_open_interest`, when reported
pub fn is_tradable(row: &ObservationRow, config: &SampleConfig) -> bool {
    let sides = [
        (row.entry_price, row.entry_spread, row.entry_bid, row.entry_ask, row.entry_open_interest),
        (row.exit_price, row.exit_spread, row.exit_bid, row.exit_ask, row.exit_open_interest),
    ];

    sides.iter().all(|&(price, spread, bid, ask, open_interest)| {
        let Some(price) = price else {
            return false;
        };
        if price.to_f64().map_or(true, |p| p < config.min_tradable_price) {
            return false;
        }
        if spread_ratio(spread, price).map_or(false, |r| r > config.max_spread_ratio) {
            return false;
        }
        if !positive(bid) || !positive(ask) {
            return false;
        }
        open_interest.map_or(true, |oi| oi >= config.min_open_interest)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::table::fixtures::observation;
    use rust_decimal_macros::dec;

    #[test]
    fn test_liquid_row_passes() {
        assert!(is_tradable(&observation("r1", 0.5, 0.01), &SampleConfig::default()));
    }

    #[test]
    fn test_zero_ask_rejected_even_with_last() {
        let mut row = observation("r1", 0.5, 0.01);
        row.exit_ask = Some(dec!(0));
        row.exit_spread = None;
        row.exit_price = Some(dec!(0.95));
        assert!(!is_tradable(&row, &SampleConfig::default()));
    }

    #[test]
    fn test_wide_spread_rejected() {
        let mut row = observation("r1", 0.5, 0.01);
        row.entry_bid = Some(dec!(0.40));
        row.entry_ask = Some(dec!(1.00));
        row.entry_spread = Some(dec!(0.60));
        row.entry_price = Some(dec!(0.70));
        assert!(!is_tradable(&row, &SampleConfig::default()));
    }

    #[test]
    fn test_price_floor_and_open_interest() {
        let mut row = observation("r1", 0.5, 0.01);
        row.exit_open_interest = Some(0);
        assert!(!is_tradable(&row, &SampleConfig::default()));

        row.exit_open_interest = None;
        assert!(is_tradable(&row, &SampleConfig::default()));

        row.entry_price = Some(dec!(0.005));
        assert!(!is_tradable(&row, &SampleConfig::default()));
    }
}
