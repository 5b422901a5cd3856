/// Simple (arithmetic) returns; output length is input length − 1.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| if w[0] != 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Log returns; output length is input length − 1. Non-positive prices
/// contribute a zero return rather than a NaN.
pub fn log_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .map(|w| {
            if w[0] > 0.0 && w[1] > 0.0 {
                (w[1] / w[0]).ln()
            } else {
                0.0
            }
        })
        .collect()
}

/// Full windows of `window` consecutive elements; partial windows at the
/// start are omitted.
pub fn rolling(data: &[f64], window: usize) -> impl Iterator<Item = &[f64]> {
    data.windows(window.max(1))
}

/// Cumulative return over the trailing `lookback` elements, or None when the
/// series is too short.
pub fn trailing_return(prices: &[f64], lookback: usize) -> Option<f64> {
    if prices.len() <= lookback || lookback == 0 {
        return None;
    }
    let past = prices[prices.len() - 1 - lookback];
    let last = prices[prices.len() - 1];
    if past == 0.0 {
        return None;
    }
    Some((last - past) / past)
}

/// Peak-to-trough maximum drawdown as a positive fraction.
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for &price in prices {
        if price > peak {
            peak = price;
        }
        if peak > 0.0 {
            let dd = (peak - price) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
