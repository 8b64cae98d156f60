//! Triple-gate trade signal.
//!
//! A long (short) signal fires only when every active trigger agrees:
//! 1. IV convergence signal at or above its threshold
//! 2. MA-200 break strength beyond `+ma_threshold` (`-ma_threshold`)
//! 3. MACD crossing up (down)
//! 4. Close breaking the band midline upward (downward)
//! 5. Optionally, Bollinger bandwidth at or above its threshold
//!
//! Missing inputs never error; they make the signal neutral.

use serde::{Deserialize, Serialize};

use super::indicators::{
    atr, bollinger, ma_break, macd_cross, midline_break, Cross, ATR_WINDOW, BOLLINGER_WINDOW,
    MACD_FAST, MACD_SIGNAL, MACD_SLOW, MA_BREAK_WINDOW, MIDLINE_WINDOW,
};

/// Triple-gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TripleGateConfig {
    /// Minimum IV convergence signal.
    pub iv_threshold: f64,
    /// Minimum absolute MA-200 break strength, in ATRs.
    pub ma_threshold: f64,
    /// Minimum Bollinger bandwidth when the filter is on.
    pub bandwidth_threshold: f64,
    /// Require the bandwidth filter.
    pub use_bandwidth_filter: bool,
}

impl Default for TripleGateConfig {
    fn default() -> Self {
        Self {
            iv_threshold: 0.15,
            ma_threshold: 1.0,
            bandwidth_threshold: 0.04,
            use_bandwidth_filter: false,
        }
    }
}

/// Inputs to one gate evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GateInputs {
    pub iv_signal: Option<f64>,
    pub ma_break: Option<f64>,
    pub bb_position: Option<f64>,
    pub bb_bandwidth: Option<f64>,
    pub macd_cross: Option<Cross>,
    pub midline_break: Option<Cross>,
}

impl GateInputs {
    /// Compute the price-derived inputs from daily bars (oldest first).
    ///
    /// `highs` and `lows` may be empty, in which case the ATR falls back to
    /// close-to-close volatility.
    pub fn from_price_history(
        iv_signal: Option<f64>,
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
    ) -> Self {
        let bb = bollinger(closes, BOLLINGER_WINDOW);
        let atr = atr(highs, lows, closes, ATR_WINDOW);
        Self {
            iv_signal,
            ma_break: ma_break(closes, atr, MA_BREAK_WINDOW),
            bb_position: bb.map(|b| b.position),
            bb_bandwidth: bb.and_then(|b| b.bandwidth),
            macd_cross: macd_cross(closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL).and_then(|m| m.cross),
            midline_break: midline_break(closes, MIDLINE_WINDOW),
        }
    }
}

/// Direction of a gate signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Long,
    Short,
    #[default]
    Neutral,
}

impl SignalSide {
    /// +1 long, -1 short, 0 neutral.
    pub fn as_i8(&self) -> i8 {
        match self {
            Self::Long => 1,
            Self::Short => -1,
            Self::Neutral => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GateSignal {
    pub flag: bool,
    pub side: SignalSide,
}

impl GateSignal {
    pub fn neutral() -> Self {
        Self::default()
    }

    fn fired(side: SignalSide) -> Self {
        Self { flag: true, side }
    }
}

/// Evaluate the gate for one set of inputs.
pub fn triple_gate_signal(inputs: &GateInputs, config: &TripleGateConfig) -> GateSignal {
    let (Some(iv_signal), Some(ma_break)) = (inputs.iv_signal, inputs.ma_break) else {
        return GateSignal::neutral();
    };
    if !iv_signal.is_finite() || !ma_break.is_finite() || iv_signal < config.iv_threshold {
        return GateSignal::neutral();
    }

    if config.use_bandwidth_filter {
        match inputs.bb_bandwidth {
            Some(bw) if bw >= config.bandwidth_threshold => {}
            _ => return GateSignal::neutral(),
        }
    }

    let agrees = |dir: Cross| inputs.macd_cross == Some(dir) && inputs.midline_break == Some(dir);

    if ma_break >= config.ma_threshold && agrees(Cross::Up) {
        GateSignal::fired(SignalSide::Long)
    } else if ma_break <= -config.ma_threshold && agrees(Cross::Down) {
        GateSignal::fired(SignalSide::Short)
    } else {
        GateSignal::neutral()
    }
}

/// Evaluate the gate over a batch of inputs.
pub fn apply_triple_gate(inputs: &[GateInputs], config: &TripleGateConfig) -> Vec<GateSignal> {
    inputs
        .iter()
        .map(|i| triple_gate_signal(i, config))
        .collect()
}
