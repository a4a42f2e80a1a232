//! PerpLab Core — signal detection, risk overlay and position lifecycle for
//! perpetual futures.
//!
//! Layers, bottom up:
//! - Domain types (candles, funding, signals, positions, trade records)
//! - Indicator library and pattern analysis over candle windows
//! - Strategy detectors behind one `SignalDetector` trait
//! - Risk overlay: regime filter, funding-extreme screening, kill switch,
//!   exposure caps and position sizing
//! - Signal arbitration in detector priority order
//! - Position lifecycle simulation with costs and funding
//! - The event loop shared by replay and live runs

pub mod arbitration;
pub mod detectors;
pub mod domain;
pub mod engine;
pub mod indicators;
pub mod lifecycle;
pub mod overlay;
pub mod patterns;
