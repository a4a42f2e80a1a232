//! Funding overlay scenarios against the public API.

use perplab_core::domain::{Direction, ExitPlan};
use perplab_core::indicators::percentile_rank;
use perplab_core::overlay::{assess_funding, tighten_exit_plan, FundingAction, FundingOverlayConfig, FundingTail};

/// Twenty quiet settlements, 0.001% .. 0.020%.
fn quiet_history() -> Vec<f64> {
    (1..=20).map(|i| i as f64 * 0.00001).collect()
}

#[test]
fn threshold_percentile_below_min_abs_is_allowed() {
    let config = FundingOverlayConfig::default();
    let history = quiet_history();
    // The top of the history ranks (19 + 0.5) / 20 = 0.975, past the 0.95
    // threshold, but 0.02% is under the 0.03% absolute floor.
    let rate = history[19];
    let p = percentile_rank(rate, &history).unwrap();
    assert!(p >= config.high_percentile);

    for direction in [Direction::Long, Direction::Short] {
        let a = assess_funding(&config, direction, Some(rate), &history);
        assert_eq!(a.action, FundingAction::Allow);
        assert_eq!(a.tail, None);
    }
}

#[test]
fn clearing_the_floor_makes_it_extreme() {
    let config = FundingOverlayConfig::default();
    let mut history = quiet_history();
    history.push(0.0005);
    let long = assess_funding(&config, Direction::Long, Some(0.0005), &history);
    assert_eq!(long.tail, Some(FundingTail::High));
    assert_eq!(long.action, FundingAction::Tighten);

    // Favorable for shorts: allowed even though extreme.
    let short = assess_funding(&config, Direction::Short, Some(0.0005), &history);
    assert_eq!(short.tail, Some(FundingTail::High));
    assert_eq!(short.action, FundingAction::Allow);
}

#[test]
fn ties_count_half() {
    let history = [0.0001, 0.0001, 0.0001, 0.0003];
    assert_eq!(percentile_rank(0.0001, &history), Some(1.5 / 4.0));
    assert_eq!(percentile_rank(0.0003, &history), Some(3.5 / 4.0));
    assert_eq!(percentile_rank(0.0001, &[]), None);
}

#[test]
fn tighten_respects_caps() {
    let config = FundingOverlayConfig::default();
    let plan = tighten_exit_plan(ExitPlan::default(), &config);
    assert!((plan.tp1_fraction - 0.4).abs() < 1e-12);
    assert!((plan.trail_atr_multiple - 1.5).abs() < 1e-12);

    // Repeated tightening stops at the cap and the floor.
    let again = tighten_exit_plan(tighten_exit_plan(plan, &config), &config);
    assert!((again.tp1_fraction - 0.5).abs() < 1e-12);
    assert!((again.trail_atr_multiple - 1.5).abs() < 1e-12);
    assert_eq!(again.time_stop_bars, plan.time_stop_bars);
}
