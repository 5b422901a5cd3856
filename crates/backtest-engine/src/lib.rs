//! Strategy backtesting: bar-by-bar simulation with next-open fills,
//! commission and slippage, a metrics suite, grid and seeded random
//! parameter search, walk-forward validation with an overfitting flag, and
//! a SQLite run store.

pub mod engine;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod store;
pub mod strategy;
pub mod walk_forward;

pub use engine::SimulationEngine;
pub use metrics::compute_metrics;
pub use models::*;
pub use optimizer::{optimize, OptimizationResult, ScoreMetric, SearchSpace};
pub use store::BacktestStore;
pub use strategy::{builtin_strategies, make_strategy, Action, Strategy, StrategyContext};
pub use walk_forward::{run_walk_forward, WalkForwardConfig, WalkForwardReport};

#[cfg(test)]
mod tests;
