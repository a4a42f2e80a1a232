//! Position lifecycle: the per-bar state machine and the cost model it charges.

pub mod cost;
pub mod simulator;

pub use cost::{funding_over, funding_payment, CostConfig, SlippageModel};
pub use simulator::{open_position, LifecycleEvent, PositionSimulator, StepOutcome};
