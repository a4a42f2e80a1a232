//! Domain types shared by every layer of the engine.

pub mod candle;
pub mod funding;
pub mod position;
pub mod signal;
pub mod trade;

pub use candle::{closes, resample, validate_series, Candle, CandleError, Timeframe, UnknownTimeframe};
pub use funding::{funding_interval, FundingExtreme, FundingPoint, FundingRateSeries, FUNDING_INTERVAL_HOURS};
pub use position::{CloseReason, ExitFill, Position, PositionId, PositionState};
pub use signal::{Direction, ExitPlan, Regime, StrategyFamily, TradingSignal};
pub use trade::TradeRecord;
