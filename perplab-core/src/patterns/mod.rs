//! Pattern analyzer built on the indicator library.
//!
//! Like the indicators, every function here is pure and returns `None`/`false`
//! on windows too short to judge.

pub mod range;
pub mod reversal;
pub mod trend;

pub use range::{
    count_level_tests, detect_box, high_low, is_in_box_range, is_pullback, BoxGrade, BoxParams, BoxRange,
    LevelSide, PullbackParams,
};
pub use reversal::{detect_reversal_pattern, ReversalPattern, ReversalSignal};
pub use trend::{count_consecutive_bars, trend_strength, TrendStrength, MIN_TREND_FRACTION};
