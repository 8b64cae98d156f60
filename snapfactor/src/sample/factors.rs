//! IV convergence factors over the run-ordered entry IV series.
//!
//! Both versions compare the current IV with the median of a trailing
//! window that ends at the current row (no lookahead):
//! - Version A: `(iv - median) / median`
//! - Version B: `(iv - median) / MAD`, MAD being the median absolute deviation
//!
//! Missing values are ignored inside a window; a window with fewer points
//! than the lookback uses whatever history exists.

/// Guard added to factor denominators.
pub const FACTOR_EPSILON: f64 = 1e-8;

/// Default trailing window length.
pub const DEFAULT_FACTOR_WINDOW: usize = 10;

/// Median of finite values; `None` when there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation from the median.
pub fn median_abs_deviation(values: &[f64]) -> Option<f64> {
    let center = median(values)?;
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - center).abs())
        .collect();
    median(&deviations)
}

fn trailing_window(values: &[Option<f64>], end: usize, window: usize) -> Vec<f64> {
    let start = (end + 1).saturating_sub(window.max(1));
    values[start..=end]
        .iter()
        .filter_map(|v| *v)
        .filter(|v| v.is_finite())
        .collect()
}

/// Rolling median over a trailing window.
///
/// Missing or non-finite points inside the window are dropped and the
/// median is taken over the rest, so one NaN does not blank out the next
/// `window` rows. The value at the row itself still has to be present for
/// a factor to be produced there.
pub fn rolling_median(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| median(&trailing_window(values, i, window)))
        .collect()
}

/// Rolling median absolute deviation over a trailing window.
///
/// Skips missing points the same way as [`rolling_median`].
pub fn rolling_mad(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| median_abs_deviation(&trailing_window(values, i, window)))
        .collect()
}

fn normalized(values: &[Option<f64>], centers: &[Option<f64>], scales: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .zip(centers.iter().zip(scales.iter()))
        .map(|(value, (center, scale))| match (value, center, scale) {
            (Some(v), Some(c), Some(s)) if v.is_finite() => Some((v - c) / (s + FACTOR_EPSILON)),
            _ => None,
        })
        .collect()
}

/// Version A: deviation from the rolling median, relative to that median.
pub fn convergence_factor_a(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let medians = rolling_median(values, window);
    normalized(values, &medians, &medians)
}

/// Version B: deviation from the rolling median in units of rolling MAD.
pub fn convergence_factor_b(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let medians = rolling_median(values, window);
    let mads = rolling_mad(values, window);
    normalized(values, &medians, &mads)
}

/// Previous row's value; the first row has none.
pub fn lag1(values: &[Option<f64>]) -> Vec<Option<f64>> {
    if values.is_empty() {
        return Vec::new();
    }
    std::iter::once(None)
        .chain(values.iter().copied().take(values.len().saturating_sub(1)))
        .collect()
}
