//! Consecutive-loss kill switch, one streak per strategy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    pub max_consecutive_losses: u32,
    pub cooldown_hours: i64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: 3,
            cooldown_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Streak {
    losses: u32,
    cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    config: KillSwitchConfig,
    streaks: BTreeMap<String, Streak>,
}

impl KillSwitch {
    pub fn new(config: KillSwitchConfig) -> Self {
        Self {
            config,
            streaks: BTreeMap::new(),
        }
    }

    /// Feed a closed trade. A loss extends the streak, a win resets it and a
    /// breakeven close leaves it alone. The Nth straight loss arms the
    /// cooldown and starts a fresh count.
    pub fn record_close(&mut self, strategy: &str, pnl: f64, now: DateTime<Utc>) {
        let max = self.config.max_consecutive_losses;
        let cooldown = Duration::hours(self.config.cooldown_hours);
        let streak = self.streaks.entry(strategy.to_string()).or_default();
        if pnl > 0.0 {
            streak.losses = 0;
            return;
        }
        if pnl == 0.0 {
            return;
        }
        streak.losses += 1;
        if max > 0 && streak.losses >= max {
            let until = now + cooldown;
            tracing::warn!(strategy, losses = streak.losses, %until, "kill switch engaged");
            streak.cooldown_until = Some(until);
            streak.losses = 0;
        }
    }

    pub fn is_blocked(&self, strategy: &str, now: DateTime<Utc>) -> bool {
        self.streaks
            .get(strategy)
            .and_then(|s| s.cooldown_until)
            .is_some_and(|until| now < until)
    }

    pub fn consecutive_losses(&self, strategy: &str) -> u32 {
        self.streaks.get(strategy).map_or(0, |s| s.losses)
    }

    /// Clear cooldowns that have run out.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        for (strategy, streak) in &mut self.streaks {
            if streak.cooldown_until.is_some_and(|until| now >= until) {
                tracing::info!(strategy = %strategy, "kill switch cooldown expired");
                streak.cooldown_until = None;
            }
        }
    }
}
