use engine_core::{EngineError, EngineResult};

/// Simple Moving Average over full windows; output length is
/// `len − period + 1`.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let mut result = Vec::with_capacity(data.len() - period + 1);
    for i in period - 1..data.len() {
        let sum: f64 = data[i + 1 - period..=i].iter().sum();
        result.push(sum / period as f64);
    }
    result
}

/// Exponential Moving Average seeded with the SMA of the first `period`
/// elements; output length matches the input length (MACD relies on this).
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period {
        return vec![];
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;

    let mut result = Vec::with_capacity(data.len());
    for _ in 0..period {
        result.push(seed);
    }
    for i in period..data.len() {
        let prev = result[i - 1];
        result.push((data[i] - prev) * multiplier + prev);
    }
    result
}

/// Relative Strength Index with Wilder smoothing. Inputs shorter than
/// `period + 1` are degenerate: there is no warm-up value to emit.
pub fn rsi(data: &[f64], period: usize) -> EngineResult<Vec<f64>> {
    if period == 0 {
        return Err(EngineError::Degenerate("rsi period must be positive".to_string()));
    }
    if data.len() < period + 1 {
        return Err(EngineError::Degenerate(format!(
            "rsi needs at least {} points, got {}",
            period + 1,
            data.len()
        )));
    }

    let mut gains = Vec::with_capacity(data.len() - 1);
    let mut losses = Vec::with_capacity(data.len() - 1);
    for w in data.windows(2) {
        let change = w[1] - w[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(gains.len() - period + 1);
    out.push(rsi_value(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out.push(rsi_value(avg_gain, avg_loss));
    }
    Ok(out)
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// MACD (Moving Average Convergence Divergence)
pub struct MacdResult {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(data: &[f64], fast: usize, slow: usize, signal: usize) -> EngineResult<MacdResult> {
    if fast == 0 || slow == 0 || signal == 0 || slow <= fast {
        return Err(EngineError::Degenerate(format!(
            "macd requires 0 < fast < slow, got fast={fast} slow={slow}"
        )));
    }
    if data.len() < slow + signal {
        return Err(EngineError::Degenerate(format!(
            "macd needs at least {} points, got {}",
            slow + signal,
            data.len()
        )));
    }

    let ema_fast = ema(data, fast);
    let ema_slow = ema(data, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .skip(slow)
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal);
    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    Ok(MacdResult {
        macd_line,
        signal_line,
        histogram,
    })
}

/// Bollinger Bands
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(data: &[f64], period: usize, k: f64) -> EngineResult<BollingerBands> {
    if period < 2 || data.len() < period {
        return Err(EngineError::Degenerate(format!(
            "bollinger needs at least {period} points, got {}",
            data.len()
        )));
    }

    let middle = sma(data, period);
    let mut upper = Vec::with_capacity(middle.len());
    let mut lower = Vec::with_capacity(middle.len());

    for i in period - 1..data.len() {
        let slice = &data[i + 1 - period..=i];
        let mean = middle[i + 1 - period];
        let variance: f64 = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = variance.sqrt();
        upper.push(mean + k * std);
        lower.push(mean - k * std);
    }

    Ok(BollingerBands {
        upper,
        middle,
        lower,
    })
}

/// Average True Range with Wilder smoothing over parallel high/low/close
/// slices.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> EngineResult<Vec<f64>> {
    let n = high.len();
    if n != low.len() || n != close.len() {
        return Err(EngineError::Degenerate("atr input length mismatch".to_string()));
    }
    if period == 0 || n < period + 1 {
        return Err(EngineError::Degenerate(format!(
            "atr needs at least {} bars, got {n}",
            period + 1
        )));
    }

    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }

    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    let mut out = vec![value];
    for tr in &true_ranges[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
        out.push(value);
    }
    Ok(out)
}
