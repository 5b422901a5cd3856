use statrs::statistics::Statistics;

use crate::EPSILON;

/// Pearson correlation. None when either input has (near-)zero variance or
/// the lengths disagree or fall under 2.
pub fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.mean();
    let mean_b = b.mean();

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..a.len() {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a / n <= EPSILON || var_b / n <= EPSILON {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Rolling Pearson correlation over full windows of `window` paired points.
/// Windows where either side is constant yield None at that slot.
pub fn rolling_correlation(a: &[f64], b: &[f64], window: usize) -> Vec<Option<f64>> {
    if a.len() != b.len() || window < 2 || a.len() < window {
        return Vec::new();
    }
    (0..=a.len() - window)
        .map(|i| correlation(&a[i..i + window], &b[i..i + window]))
        .collect()
}

/// Standardized deviation from a reference mean. None when the reference
/// std is at or below the variance floor.
pub fn z_score(x: f64, mean: f64, std: f64) -> Option<f64> {
    if std <= EPSILON {
        None
    } else {
        Some((x - mean) / std)
    }
}

/// Sample mean and standard deviation, or None for series shorter than 2.
pub fn mean_std(data: &[f64]) -> Option<(f64, f64)> {
    if data.len() < 2 {
        return None;
    }
    Some((data.mean(), data.std_dev()))
}

/// Percentile by linear interpolation between order statistics; q in [0, 1].
pub fn percentile(data: &[f64], q: f64) -> Option<f64> {
    if data.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = pos - lo as f64;
    Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Annualized volatility from per-period returns (√252 convention).
pub fn annualized_volatility(returns: &[f64]) -> Option<f64> {
    let (_, std) = mean_std(returns)?;
    Some(std * 252.0_f64.sqrt())
}

/// Annualized Sharpe ratio from per-period returns. None when volatility is
/// degenerate.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    let (mean, std) = mean_std(returns)?;
    if std <= EPSILON {
        return None;
    }
    let annual_return = mean * 252.0;
    let annual_vol = std * 252.0_f64.sqrt();
    Some((annual_return - risk_free_rate) / annual_vol)
}

/// Annualized Sortino ratio; penalizes only downside deviation. None when no
/// returns fall below the daily risk-free rate.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let daily_rf = risk_free_rate / 252.0;
    let downside_sq: Vec<f64> = returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .collect();
    if downside_sq.is_empty() {
        return None;
    }
    let downside_dev =
        (downside_sq.iter().sum::<f64>() / returns.len() as f64).sqrt() * 252.0_f64.sqrt();
    if downside_dev <= EPSILON {
        return None;
    }
    let annual_return = returns.iter().sum::<f64>() / returns.len() as f64 * 252.0;
    Some((annual_return - risk_free_rate) / downside_dev)
}

/// Covariance-based beta of `returns` against `benchmark`, with the OLS
/// alpha (per-period intercept). None when the benchmark is flat.
pub fn alpha_beta(returns: &[f64], benchmark: &[f64]) -> Option<(f64, f64)> {
    let n = returns.len().min(benchmark.len());
    if n < 2 {
        return None;
    }
    let r = &returns[returns.len() - n..];
    let b = &benchmark[benchmark.len() - n..];
    let mean_r = r.mean();
    let mean_b = b.mean();
    let mut cov = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        cov += (r[i] - mean_r) * (b[i] - mean_b);
        var_b += (b[i] - mean_b).powi(2);
    }
    if var_b / n as f64 <= EPSILON {
        return None;
    }
    let beta = cov / var_b;
    let alpha = mean_r - beta * mean_b;
    Some((alpha, beta))
}
