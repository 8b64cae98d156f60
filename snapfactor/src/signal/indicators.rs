//! Price indicators feeding the triple-gate signal.
//!
//! All functions look at the most recent bar of the series and return
//! `None` when the history is too short for the requested window.

use serde::Serialize;

pub const BOLLINGER_WINDOW: usize = 20;
pub const MIDLINE_WINDOW: usize = 10;
pub const ATR_WINDOW: usize = 20;
pub const MA_BREAK_WINDOW: usize = 200;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Direction of a line crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cross {
    Up,
    Down,
}

impl Cross {
    /// +1 for up, -1 for down.
    pub fn sign(&self) -> i8 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
        }
    }

    /// Crossing of `diff` through zero between two consecutive bars.
    fn between(prev_diff: f64, curr_diff: f64) -> Option<Self> {
        if prev_diff <= 0.0 && curr_diff > 0.0 {
            Some(Self::Up)
        } else if prev_diff >= 0.0 && curr_diff < 0.0 {
            Some(Self::Down)
        } else {
            None
        }
    }
}

/// Bollinger position score and bandwidth of the last bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bollinger {
    /// `(close - ma) / (2 * sd)`
    pub position: f64,
    /// `4 * sd / ma`, missing when the mean is zero
    pub bandwidth: Option<f64>,
}

/// MACD crossover of the last bar and the fast EMA slope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdCross {
    pub cross: Option<Cross>,
    pub fast_slope: f64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_pop(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Mean of the trailing `window` values.
fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    Some(mean(&values[values.len() - window..]))
}

/// Exponential moving average with `alpha = 2 / (span + 1)`, seeded with the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

pub fn bollinger(closes: &[f64], window: usize) -> Option<Bollinger> {
    if window == 0 || closes.len() < window {
        return None;
    }
    let tail = &closes[closes.len() - window..];
    let ma = mean(tail);
    let sd = std_pop(tail);
    if !sd.is_finite() || sd == 0.0 {
        return None;
    }
    let last = *closes.last()?;
    Some(Bollinger {
        position: (last - ma) / (2.0 * sd),
        bandwidth: (ma != 0.0).then(|| 4.0 * sd / ma),
    })
}

/// Close crossing its `window`-bar moving average on the last bar.
pub fn midline_break(closes: &[f64], window: usize) -> Option<Cross> {
    if window == 0 || closes.len() < window + 1 {
        return None;
    }
    let n = closes.len();
    let prev_ma = mean(&closes[n - 1 - window..n - 1]);
    let curr_ma = mean(&closes[n - window..]);
    Cross::between(closes[n - 2] - prev_ma, closes[n - 1] - curr_ma)
}

/// Average true range over `window` bars.
///
/// Without usable highs and lows this falls back to the population standard
/// deviation of the last `window` close-to-close returns.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.is_empty() {
        return None;
    }

    if highs.len() != closes.len() || lows.len() != closes.len() {
        let returns: Vec<f64> = closes
            .windows(2)
            .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { f64::NAN })
            .collect();
        if returns.len() < window {
            return None;
        }
        let tail = &returns[returns.len() - window..];
        let sd = std_pop(tail);
        return sd.is_finite().then_some(sd);
    }

    let true_ranges: Vec<f64> = (0..closes.len())
        .map(|i| {
            let range = (highs[i] - lows[i]).abs();
            if i == 0 {
                return range;
            }
            let prev = closes[i - 1];
            range
                .max((highs[i] - prev).abs())
                .max((lows[i] - prev).abs())
        })
        .collect();
    trailing_mean(&true_ranges, window)
}

/// Break strength `(close - ma) / atr` against the `window`-bar average.
pub fn ma_break(closes: &[f64], atr: Option<f64>, window: usize) -> Option<f64> {
    let ma = trailing_mean(closes, window)?;
    let atr = atr.filter(|a| a.is_finite() && *a != 0.0)?;
    Some((closes.last()? - ma) / atr)
}

/// MACD line crossing its signal line on the last bar.
pub fn macd_cross(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdCross> {
    if closes.len() < slow + signal || closes.len() < 2 {
        return None;
    }
    let ema_fast = ema(closes, fast);
    let ema_slow = ema(closes, slow);
    let macd: Vec<f64> = ema_fast.iter().zip(&ema_slow).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd, signal);

    let n = closes.len();
    let prev_diff = macd[n - 2] - signal_line[n - 2];
    let curr_diff = macd[n - 1] - signal_line[n - 1];
    Some(MacdCross {
        cross: Cross::between(prev_diff, curr_diff),
        fast_slope: ema_fast[n - 1] - ema_fast[n - 2],
    })
}
