use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configuration for one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub strategy_name: String,
    pub ticker: String,
    /// Strategy parameters by name.
    pub params: BTreeMap<String, f64>,
    pub initial_capital: f64,
    /// Fraction of equity deployed per entry, (0, 1].
    pub position_size: f64,
    pub commission_bps: f64,
    pub slippage_bps: f64,
    /// Fill actions at the same bar's close instead of the next bar's open.
    pub close_fill: bool,
}

impl BacktestConfig {
    pub fn new(strategy_name: &str, ticker: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            ticker: ticker.to_string(),
            params: BTreeMap::new(),
            initial_capital: 100_000.0,
            position_size: 1.0,
            commission_bps: 0.0,
            slippage_bps: 5.0,
            close_fill: false,
        }
    }

    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

/// One round trip. Exit fields are set together when the trade closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub run_id: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub side: TradeSide,
    pub qty: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    /// Net of commission and slippage.
    pub pnl: Option<f64>,
    pub return_pct: Option<f64>,
    pub exit_reason: Option<String>,
    pub holding_bars: Option<u32>,
}

/// One point on the equity curve; one per simulated bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub drawdown_pct: f64,
}

/// Aggregate run metrics. Ratios that need trades or losses to exist are
/// null rather than 0/0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_return_pct: f64,
    pub cagr_pct: Option<f64>,
    pub sharpe: Option<f64>,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub max_drawdown_pct: f64,
    pub max_drawdown_bars: u32,
    pub win_rate: Option<f64>,
    pub average_win: Option<f64>,
    pub average_loss: Option<f64>,
    pub profit_factor: Option<f64>,
    pub num_trades: u32,
    pub avg_holding_bars: Option<f64>,
    /// Fraction of bars with an open position.
    pub exposure: f64,
    pub max_consecutive_wins: u32,
    pub max_consecutive_losses: u32,
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    pub information_ratio: Option<f64>,
    /// (year, month) -> return percent.
    pub monthly_returns: Vec<MonthlyReturn>,
}

/// Monthly return grid cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub return_pct: f64,
}

/// A completed run. Identity fields never change once created; results are
/// appended exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub strategy_name: String,
    pub ticker: String,
    pub params: BTreeMap<String, f64>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: RunMetrics,
}

/// One walk-forward window with its in-sample pick and out-of-sample score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub window_index: u32,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
    pub best_params: BTreeMap<String, f64>,
    pub in_sample_score: f64,
    pub out_of_sample_score: f64,
    pub test_bar_count: usize,
}
