//! Trade signal module.
//!
//! Provides:
//! - Bollinger, ATR, MA-200 break and MACD indicators
//! - The triple-gate signal over IV convergence and price confirmations

pub mod gate;
pub mod indicators;

pub use gate::{
    apply_triple_gate, triple_gate_signal, GateInputs, GateSignal, SignalSide, TripleGateConfig,
};
pub use indicators::{Bollinger, Cross, MacdCross};
