//! ADX — Average Directional Index (Wilder).
//!
//! 1. +DM / -DM from consecutive high/low deltas
//! 2. Wilder-smooth +DM, -DM and TR
//! 3. +DI = 100 · sm(+DM) / sm(TR), -DI likewise
//! 4. DX = 100 · |+DI - -DI| / (+DI + -DI)
//! 5. ADX = Wilder-smoothed DX
//!
//! [`AdxMode::SingleBarDx`] stops after step 4 and reports the last bar's DX
//! as "ADX". Detector thresholds were tuned against that reading, so it is the
//! default; [`AdxMode::WilderSmoothed`] gives the textbook value.

use serde::{Deserialize, Serialize};

use super::atr::{true_range, wilder_smooth};
use super::Indicator;
use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdxMode {
    #[default]
    SingleBarDx,
    WilderSmoothed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

struct DirectionalSeries {
    plus_di: Vec<f64>,
    minus_di: Vec<f64>,
    dx: Vec<f64>,
}

fn directional(candles: &[Candle], period: usize) -> DirectionalSeries {
    let n = candles.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    for i in 1..n {
        let up = candles[i].high - candles[i - 1].high;
        let down = candles[i - 1].low - candles[i].low;
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let mut tr = true_range(candles);
    if let Some(first) = tr.first_mut() {
        *first = f64::NAN;
    }
    let s_tr = wilder_smooth(&tr, period);
    let s_plus = wilder_smooth(&plus_dm, period);
    let s_minus = wilder_smooth(&minus_dm, period);

    let mut plus_di = vec![f64::NAN; n];
    let mut minus_di = vec![f64::NAN; n];
    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        if !(s_tr[i].is_finite() && s_plus[i].is_finite() && s_minus[i].is_finite()) {
            continue;
        }
        if s_tr[i] == 0.0 {
            plus_di[i] = 0.0;
            minus_di[i] = 0.0;
            dx[i] = 0.0;
            continue;
        }
        let p = 100.0 * s_plus[i] / s_tr[i];
        let m = 100.0 * s_minus[i] / s_tr[i];
        plus_di[i] = p;
        minus_di[i] = m;
        dx[i] = if p + m == 0.0 {
            0.0
        } else {
            100.0 * (p - m).abs() / (p + m)
        };
    }
    DirectionalSeries {
        plus_di,
        minus_di,
        dx,
    }
}

/// ADX series in the requested mode, NaN during warmup.
pub fn adx_series(candles: &[Candle], period: usize, mode: AdxMode) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; candles.len()];
    }
    let d = directional(candles, period);
    match mode {
        AdxMode::SingleBarDx => d.dx,
        AdxMode::WilderSmoothed => wilder_smooth(&d.dx, period),
    }
}

/// ADX and DI lines at the last candle.
pub fn adx(candles: &[Candle], period: usize, mode: AdxMode) -> Option<AdxReading> {
    let needed = match mode {
        AdxMode::SingleBarDx => period + 1,
        AdxMode::WilderSmoothed => 2 * period,
    };
    if period == 0 || candles.len() < needed.max(period + 1) {
        return None;
    }
    let d = directional(candles, period);
    let adx = match mode {
        AdxMode::SingleBarDx => *d.dx.last()?,
        AdxMode::WilderSmoothed => *wilder_smooth(&d.dx, period).last()?,
    };
    let reading = AdxReading {
        adx,
        plus_di: *d.plus_di.last()?,
        minus_di: *d.minus_di.last()?,
    };
    [reading.adx, reading.plus_di, reading.minus_di]
        .iter()
        .all(|v| v.is_finite())
        .then_some(reading)
}

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    mode: AdxMode,
    name: String,
}

impl Adx {
    pub fn new(period: usize, mode: AdxMode) -> Self {
        let period = period.max(1);
        let name = match mode {
            AdxMode::SingleBarDx => format!("dx_{period}"),
            AdxMode::WilderSmoothed => format!("adx_{period}"),
        };
        Self { period, mode, name }
    }
}

impl Indicator for Adx {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.mode {
            AdxMode::SingleBarDx => self.period,
            AdxMode::WilderSmoothed => 2 * self.period - 1,
        }
    }

    fn compute(&self, candles: &[Candle]) -> Vec<f64> {
        adx_series(candles, self.period, self.mode)
    }
}
