use engine_core::{Bar, EngineError, EngineResult};
use numeric_kit::{bollinger, macd, mean_std, rsi, sma, z_score};
use std::collections::BTreeMap;

/// What a strategy wants done after seeing a closed bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Enter or add; None means size by the engine's position sizing rule.
    Buy { qty: Option<f64> },
    /// Exit or reduce; None means close the whole position.
    Sell { qty: Option<f64> },
    Hold,
}

/// Read-only view of simulation state handed to the strategy each bar.
pub struct StrategyContext {
    pub bar_index: usize,
    /// Signed: positive long, negative short, zero flat.
    pub position_qty: f64,
    pub cash: f64,
    pub equity: f64,
}

/// A trading strategy. Implementations keep their own indicator state; the
/// engine guarantees bars arrive in order and only once.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Declared parameters with their configured values.
    fn parameters(&self) -> &BTreeMap<String, f64>;

    /// Called once before the first bar.
    fn initialize(&mut self, _ctx: &StrategyContext) {}

    /// Observe a closed bar and decide. Returning `Hold` during warm-up is
    /// the contract: no signal until the indicators are ready.
    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action;
}

/// Names of the built-in strategies, registration order.
pub fn builtin_strategies() -> Vec<&'static str> {
    vec![
        "sma_cross",
        "rsi_reversion",
        "bollinger_breakout",
        "macd_signal",
        "momentum_threshold",
        "pairs_trading",
    ]
}

/// Construct a built-in strategy by name. Unknown names are `NotFound`;
/// contradictory parameters (fast ≥ slow and the like) are `Degenerate`,
/// which the optimizer silently skips.
pub fn make_strategy(
    name: &str,
    params: &BTreeMap<String, f64>,
) -> EngineResult<Box<dyn Strategy>> {
    match name {
        "sma_cross" => Ok(Box::new(SmaCross::new(params)?)),
        "rsi_reversion" => Ok(Box::new(RsiReversion::new(params)?)),
        "bollinger_breakout" => Ok(Box::new(BollingerBreakout::new(params)?)),
        "macd_signal" => Ok(Box::new(MacdSignal::new(params)?)),
        "momentum_threshold" => Ok(Box::new(MomentumThreshold::new(params)?)),
        "pairs_trading" => Ok(Box::new(PairsTrading::new(params)?)),
        other => Err(EngineError::NotFound(format!("unknown strategy {other}"))),
    }
}

fn param(params: &BTreeMap<String, f64>, name: &str, default: f64) -> f64 {
    params.get(name).copied().unwrap_or(default)
}

// =============================================================================
// SMA crossover
// =============================================================================

/// Long when the fast SMA is above the slow SMA, flat otherwise.
pub struct SmaCross {
    params: BTreeMap<String, f64>,
    fast: usize,
    slow: usize,
    closes: Vec<f64>,
}

impl SmaCross {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let fast = param(params, "fast", 10.0) as usize;
        let slow = param(params, "slow", 30.0) as usize;
        if fast == 0 || fast >= slow {
            return Err(EngineError::Degenerate(format!(
                "sma_cross requires 0 < fast < slow, got fast={fast} slow={slow}"
            )));
        }
        Ok(Self {
            params: params.clone(),
            fast,
            slow,
            closes: Vec::new(),
        })
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        if self.closes.len() < self.slow {
            return Action::Hold;
        }
        let window = &self.closes[self.closes.len() - self.slow..];
        let fast_ma = sma(&window[window.len() - self.fast..], self.fast);
        let slow_ma = sma(window, self.slow);
        match (fast_ma.last(), slow_ma.last()) {
            (Some(f), Some(s)) if f > s && ctx.position_qty == 0.0 => Action::Buy { qty: None },
            (Some(f), Some(s)) if f < s && ctx.position_qty > 0.0 => Action::Sell { qty: None },
            _ => Action::Hold,
        }
    }
}

// =============================================================================
// RSI mean reversion
// =============================================================================

/// Buy oversold (RSI < lower), exit when RSI recovers past the midpoint.
pub struct RsiReversion {
    params: BTreeMap<String, f64>,
    period: usize,
    lower: f64,
    exit_level: f64,
    closes: Vec<f64>,
}

impl RsiReversion {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let period = param(params, "period", 14.0) as usize;
        let lower = param(params, "lower", 30.0);
        let exit_level = param(params, "exit", 50.0);
        if period < 2 {
            return Err(EngineError::Degenerate(format!(
                "rsi_reversion period {period} too small"
            )));
        }
        if lower >= exit_level {
            return Err(EngineError::Degenerate(format!(
                "rsi_reversion requires lower < exit, got {lower} >= {exit_level}"
            )));
        }
        Ok(Self {
            params: params.clone(),
            period,
            lower,
            exit_level,
            closes: Vec::new(),
        })
    }
}

impl Strategy for RsiReversion {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        let value = match rsi(&self.closes, self.period) {
            Ok(values) => match values.last() {
                Some(v) => *v,
                None => return Action::Hold,
            },
            Err(_) => return Action::Hold, // warm-up
        };
        if value < self.lower && ctx.position_qty == 0.0 {
            Action::Buy { qty: None }
        } else if value > self.exit_level && ctx.position_qty > 0.0 {
            Action::Sell { qty: None }
        } else {
            Action::Hold
        }
    }
}

// =============================================================================
// Bollinger breakout
// =============================================================================

/// Buy a close above the upper band, exit on a close back through the
/// middle band.
pub struct BollingerBreakout {
    params: BTreeMap<String, f64>,
    period: usize,
    k: f64,
    closes: Vec<f64>,
}

impl BollingerBreakout {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let period = param(params, "period", 20.0) as usize;
        let k = param(params, "k", 2.0);
        if period < 2 || k <= 0.0 {
            return Err(EngineError::Degenerate(format!(
                "bollinger_breakout requires period >= 2 and k > 0, got {period}/{k}"
            )));
        }
        Ok(Self {
            params: params.clone(),
            period,
            k,
            closes: Vec::new(),
        })
    }
}

impl Strategy for BollingerBreakout {
    fn name(&self) -> &str {
        "bollinger_breakout"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        let bands = match bollinger(&self.closes, self.period, self.k) {
            Ok(b) => b,
            Err(_) => return Action::Hold,
        };
        let (upper, middle) = match (bands.upper.last(), bands.middle.last()) {
            (Some(u), Some(m)) => (*u, *m),
            _ => return Action::Hold,
        };
        if bar.close > upper && ctx.position_qty == 0.0 {
            Action::Buy { qty: None }
        } else if bar.close < middle && ctx.position_qty > 0.0 {
            Action::Sell { qty: None }
        } else {
            Action::Hold
        }
    }
}

// =============================================================================
// MACD signal-line cross
// =============================================================================

pub struct MacdSignal {
    params: BTreeMap<String, f64>,
    fast: usize,
    slow: usize,
    signal: usize,
    closes: Vec<f64>,
    prev_histogram: Option<f64>,
}

impl MacdSignal {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let fast = param(params, "fast", 12.0) as usize;
        let slow = param(params, "slow", 26.0) as usize;
        let signal = param(params, "signal", 9.0) as usize;
        if fast == 0 || signal == 0 || fast >= slow {
            return Err(EngineError::Degenerate(format!(
                "macd_signal requires 0 < fast < slow and signal > 0, got {fast}/{slow}/{signal}"
            )));
        }
        Ok(Self {
            params: params.clone(),
            fast,
            slow,
            signal,
            closes: Vec::new(),
            prev_histogram: None,
        })
    }
}

impl Strategy for MacdSignal {
    fn name(&self) -> &str {
        "macd_signal"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        let result = match macd(&self.closes, self.fast, self.slow, self.signal) {
            Ok(r) => r,
            Err(_) => return Action::Hold,
        };
        let hist = match result.histogram.last() {
            Some(h) => *h,
            None => return Action::Hold,
        };
        let prev = self.prev_histogram.replace(hist);
        match prev {
            // Cross above zero opens, cross below closes.
            Some(p) if p <= 0.0 && hist > 0.0 && ctx.position_qty == 0.0 => {
                Action::Buy { qty: None }
            }
            Some(p) if p >= 0.0 && hist < 0.0 && ctx.position_qty > 0.0 => {
                Action::Sell { qty: None }
            }
            _ => Action::Hold,
        }
    }
}

// =============================================================================
// Momentum threshold
// =============================================================================

/// Long while the trailing `lookback` return exceeds `threshold`, flat when
/// it drops below zero.
pub struct MomentumThreshold {
    params: BTreeMap<String, f64>,
    lookback: usize,
    threshold: f64,
    closes: Vec<f64>,
}

impl MomentumThreshold {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let lookback = param(params, "lookback", 20.0) as usize;
        let threshold = param(params, "threshold", 0.02);
        if lookback == 0 {
            return Err(EngineError::Degenerate(
                "momentum_threshold lookback must be positive".to_string(),
            ));
        }
        if threshold < 0.0 {
            return Err(EngineError::Degenerate(format!(
                "momentum_threshold threshold {threshold} must be non-negative"
            )));
        }
        Ok(Self {
            params: params.clone(),
            lookback,
            threshold,
            closes: Vec::new(),
        })
    }
}

impl Strategy for MomentumThreshold {
    fn name(&self) -> &str {
        "momentum_threshold"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        if self.closes.len() <= self.lookback {
            return Action::Hold;
        }
        let past = self.closes[self.closes.len() - 1 - self.lookback];
        if past == 0.0 {
            return Action::Hold;
        }
        let momentum = (bar.close - past) / past;
        if momentum > self.threshold && ctx.position_qty == 0.0 {
            Action::Buy { qty: None }
        } else if momentum < 0.0 && ctx.position_qty > 0.0 {
            Action::Sell { qty: None }
        } else {
            Action::Hold
        }
    }
}

// =============================================================================
// Pairs trading (spread input)
// =============================================================================

/// Mean-reversion on a pre-built spread series (`a − β·b` priced as a
/// synthetic instrument). Goes long the spread when its z-score drops
/// under `-entry_z`, short when it rises above `entry_z`, and closes
/// either side once the z-score decays inside `exit_z`.
pub struct PairsTrading {
    params: BTreeMap<String, f64>,
    window: usize,
    entry_z: f64,
    exit_z: f64,
    closes: Vec<f64>,
}

impl PairsTrading {
    pub fn new(params: &BTreeMap<String, f64>) -> EngineResult<Self> {
        let window = param(params, "window", 60.0) as usize;
        let entry_z = param(params, "entry_z", 2.0);
        let exit_z = param(params, "exit_z", 0.5);
        if window < 10 {
            return Err(EngineError::Degenerate(format!(
                "pairs_trading window {window} too small (needs >= 10)"
            )));
        }
        if exit_z >= entry_z {
            return Err(EngineError::Degenerate(format!(
                "pairs_trading requires exit_z < entry_z, got {exit_z} >= {entry_z}"
            )));
        }
        Ok(Self {
            params: params.clone(),
            window,
            entry_z,
            exit_z,
            closes: Vec::new(),
        })
    }
}

impl Strategy for PairsTrading {
    fn name(&self) -> &str {
        "pairs_trading"
    }

    fn parameters(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Action {
        self.closes.push(bar.close);
        if self.closes.len() < self.window {
            return Action::Hold;
        }
        let window = &self.closes[self.closes.len() - self.window..];
        let (mean, std) = match mean_std(window) {
            Some(pair) => pair,
            None => return Action::Hold,
        };
        let z = match z_score(bar.close, mean, std) {
            Some(z) => z,
            None => return Action::Hold,
        };
        if ctx.position_qty == 0.0 {
            if z < -self.entry_z {
                Action::Buy { qty: None }
            } else if z > self.entry_z {
                Action::Sell { qty: None }
            } else {
                Action::Hold
            }
        } else if z.abs() < self.exit_z {
            if ctx.position_qty > 0.0 {
                // Flatten the long spread.
                Action::Sell { qty: None }
            } else {
                // Cover the short spread.
                Action::Buy { qty: None }
            }
        } else {
            Action::Hold
        }
    }
}
