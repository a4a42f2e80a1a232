//! Sample statistics: mean, population stddev, Z-score, tie-aware percentile rank,
//! returns and beta.

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Standard deviation dividing by N.
pub fn population_std(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// `(value - mean) / std` over the full sample. `None` for an empty sample or
/// zero dispersion.
pub fn z_score(value: f64, sample: &[f64]) -> Option<f64> {
    let m = mean(sample)?;
    let sd = population_std(sample)?;
    if sd <= 0.0 || !value.is_finite() {
        return None;
    }
    Some((value - m) / sd)
}

/// Fraction of the sample ranked below `value`, ties counting half:
/// `(below + 0.5 · equal) / total`, in [0, 1].
pub fn percentile_rank(value: f64, sample: &[f64]) -> Option<f64> {
    if sample.is_empty() || !value.is_finite() {
        return None;
    }
    let mut below = 0usize;
    let mut equal = 0usize;
    for &v in sample {
        if v < value {
            below += 1;
        } else if v == value {
            equal += 1;
        }
    }
    Some((below as f64 + 0.5 * equal as f64) / sample.len() as f64)
}

/// Simple return over the last `lookback` closes.
pub fn pct_return(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || closes.len() < lookback + 1 {
        return None;
    }
    let last = *closes.last()?;
    let base = closes[closes.len() - 1 - lookback];
    if base <= 0.0 || !last.is_finite() {
        return None;
    }
    Some(last / base - 1.0)
}

/// Bar-over-bar returns.
pub fn returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// OLS beta of `asset` returns on `reference` returns over their common tail.
pub fn beta(asset: &[f64], reference: &[f64]) -> Option<f64> {
    let n = asset.len().min(reference.len());
    if n < 2 {
        return None;
    }
    let a = &asset[asset.len() - n..];
    let r = &reference[reference.len() - n..];
    let ma = mean(a)?;
    let mr = mean(r)?;
    let cov: f64 = a.iter().zip(r).map(|(x, y)| (x - ma) * (y - mr)).sum();
    let var: f64 = r.iter().map(|y| (y - mr).powi(2)).sum();
    if var <= 0.0 {
        return None;
    }
    Some(cov / var)
}
