use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A paper portfolio. `cash + Σ(position qty × live price)` is its equity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRecord {
    pub id: String,
    pub name: String,
    pub initial_cash: f64,
    pub cash: f64,
    pub created_at: DateTime<Utc>,
}

/// One holding. Deleted when qty reaches zero; at most one per ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    pub portfolio_id: String,
    pub ticker: String,
    pub qty: f64,
    pub avg_cost: f64,
    /// How many pyramid adds have fired for this position.
    pub pyramid_count: u32,
}

/// Executed paper trade, recorded exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub portfolio_id: String,
    pub ticker: String,
    /// buy | sell
    pub action: String,
    pub qty: f64,
    pub price: f64,
    pub commission: f64,
    /// entry | rebalance_exit | stop_loss | pyramid
    pub reason: String,
    /// Set on sells: (fill − avg_cost) × qty − commission.
    pub realized_pnl: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

/// Daily (or per-rebalance) equity mark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub portfolio_id: String,
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
}

/// Scored rebalance candidate, usually a composite rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub ticker: String,
    pub composite: f64,
}

/// Full portfolio state as loaded from the store.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub portfolio: PortfolioRecord,
    pub positions: Vec<PositionRecord>,
}

/// What one rebalance did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub portfolio_id: String,
    pub trades: Vec<PaperTrade>,
    /// Tickers skipped with the reason (insufficient cash, missing quote).
    pub skipped: Vec<(String, String)>,
    pub stop_losses_triggered: usize,
    pub equity_before: f64,
    pub equity_after: f64,
    pub cash_after: f64,
}
