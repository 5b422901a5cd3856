use engine_core::{CancelToken, EngineError, EngineResult, PriceSeries};
use numeric_kit::{log_returns, mean_std, percentile};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::scenarios::{scenario_grid, ScenarioOutcome};
use crate::var::{tail_risk, VarEntry};

/// Paths per batch; cancellation is checked between batches.
const BATCH: usize = 2048;

/// Simulation flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimMethod {
    /// Geometric Brownian Motion with parameters fit to historical log
    /// returns.
    Gbm,
    /// Resampling of historical log returns with replacement; keeps the
    /// empirical skew and kurtosis.
    Bootstrap,
}

/// Terminal-value percentiles of the simulated distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalPercentiles {
    pub p1: f64,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Full Monte Carlo output for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub ticker: String,
    pub method: SimMethod,
    pub paths: usize,
    pub horizon_days: usize,
    pub seed: u64,
    pub spot: f64,
    pub drift_daily: f64,
    pub volatility_daily: f64,
    pub terminal: TerminalPercentiles,
    /// P(terminal return > 0).
    pub probability_profit: f64,
    /// Mean terminal simple return.
    pub expected_return: f64,
    pub expected_terminal: f64,
    /// 1% and 5% worst terminal values.
    pub worst_case_1pct: f64,
    pub worst_case_5pct: f64,
    pub var: Vec<VarEntry>,
    pub scenarios: Vec<ScenarioOutcome>,
}

/// Seeded Monte Carlo simulator.
pub struct MonteCarloEngine {
    pub paths: usize,
    pub horizon_days: usize,
    pub lookback_days: usize,
}

impl MonteCarloEngine {
    pub fn new(paths: usize, horizon_days: usize) -> Self {
        Self {
            paths,
            horizon_days,
            lookback_days: 252,
        }
    }

    /// Simulate terminal values and derive the distribution report.
    /// Deterministic for a given (series, seed): each path derives its own
    /// RNG from the seed and its index, so thread scheduling cannot change
    /// the outcome.
    pub fn simulate(
        &self,
        series: &PriceSeries,
        method: SimMethod,
        seed: u64,
        cancel: &CancelToken,
    ) -> EngineResult<MonteCarloReport> {
        if self.paths == 0 || self.horizon_days == 0 {
            return Err(EngineError::InvalidArgument(
                "monte carlo needs paths > 0 and horizon > 0".to_string(),
            ));
        }
        let closes = series.closes();
        if closes.len() < 30 {
            return Err(EngineError::Degenerate(format!(
                "monte carlo needs at least 30 bars of history, got {}",
                closes.len()
            )));
        }
        let spot = *closes
            .last()
            .ok_or_else(|| EngineError::Degenerate("empty price series".to_string()))?;

        let window = &closes[closes.len().saturating_sub(self.lookback_days + 1)..];
        let returns = log_returns(window);
        let (mu, sigma) = mean_std(&returns).ok_or_else(|| {
            EngineError::Degenerate("not enough returns to fit drift/volatility".to_string())
        })?;
        if sigma <= numeric_kit::EPSILON {
            return Err(EngineError::Degenerate(
                "constant price history has zero volatility".to_string(),
            ));
        }

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| EngineError::Internal(format!("normal(0,1): {e}")))?;

        let mut terminals = Vec::with_capacity(self.paths);
        let mut start = 0usize;
        while start < self.paths {
            cancel.check()?;
            let end = (start + BATCH).min(self.paths);
            let batch: Vec<f64> = (start..end)
                .into_par_iter()
                .map(|path| {
                    let mut rng = path_rng(seed, path);
                    match method {
                        SimMethod::Gbm => {
                            let mut log_sum = 0.0;
                            for _ in 0..self.horizon_days {
                                let z: f64 = rng.sample(normal);
                                log_sum += (mu - sigma * sigma / 2.0) + sigma * z;
                            }
                            spot * log_sum.exp()
                        }
                        SimMethod::Bootstrap => {
                            let mut log_sum = 0.0;
                            for _ in 0..self.horizon_days {
                                let idx = rng.gen_range(0..returns.len());
                                log_sum += returns[idx];
                            }
                            spot * log_sum.exp()
                        }
                    }
                })
                .collect();
            terminals.extend(batch);
            start = end;
        }

        let terminal_returns: Vec<f64> = terminals.iter().map(|t| t / spot - 1.0).collect();

        let pct = |q: f64| -> EngineResult<f64> {
            percentile(&terminals, q)
                .ok_or_else(|| EngineError::Internal("empty terminal distribution".to_string()))
        };
        let terminal = TerminalPercentiles {
            p1: pct(0.01)?,
            p5: pct(0.05)?,
            p10: pct(0.10)?,
            p25: pct(0.25)?,
            p50: pct(0.50)?,
            p75: pct(0.75)?,
            p90: pct(0.90)?,
            p95: pct(0.95)?,
            p99: pct(0.99)?,
        };

        let profitable = terminal_returns.iter().filter(|r| **r > 0.0).count();
        let expected_return =
            terminal_returns.iter().sum::<f64>() / terminal_returns.len() as f64;

        Ok(MonteCarloReport {
            ticker: series.ticker.clone(),
            method,
            paths: self.paths,
            horizon_days: self.horizon_days,
            seed,
            spot,
            drift_daily: mu,
            volatility_daily: sigma,
            worst_case_1pct: terminal.p1,
            worst_case_5pct: terminal.p5,
            terminal,
            probability_profit: profitable as f64 / terminal_returns.len() as f64,
            expected_return,
            expected_terminal: spot * (1.0 + expected_return),
            var: tail_risk(&terminal_returns, spot, &[0.95, 0.99]),
            scenarios: scenario_grid(spot, mu, sigma, returns.len(), self.horizon_days),
        })
    }
}

/// Independent RNG per path, derived from the run seed and the path index.
fn path_rng(seed: u64, path: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (path as u64).wrapping_mul(0x9e3779b97f4a7c15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engine_core::{Bar, Interval};

    fn trending_series(n: usize) -> PriceSeries {
        let bars = (0..n)
            .map(|i| {
                let c = 100.0 * (1.0 + 0.0005 * (i as f64) + ((i as f64) * 0.9).sin() * 0.01);
                Bar {
                    timestamp: Utc.timestamp_opt(1_600_000_000 + i as i64 * 86_400, 0).unwrap(),
                    open: c,
                    high: c * 1.01,
                    low: c * 0.99,
                    close: c,
                    adj_close: None,
                    volume: 1.0e6,
                }
            })
            .collect();
        PriceSeries {
            ticker: "AAPL".to_string(),
            interval: Interval::Day,
            bars,
        }
    }

    #[test]
    fn fixed_seed_is_bit_identical() {
        let series = trending_series(300);
        let engine = MonteCarloEngine::new(2000, 30);
        let cancel = CancelToken::new();
        let a = engine.simulate(&series, SimMethod::Gbm, 42, &cancel).unwrap();
        let b = engine.simulate(&series, SimMethod::Gbm, 42, &cancel).unwrap();
        assert_eq!(a.terminal.p1, b.terminal.p1);
        assert_eq!(a.terminal.p50, b.terminal.p50);
        assert_eq!(a.terminal.p99, b.terminal.p99);
        assert_eq!(a.expected_return, b.expected_return);
    }

    #[test]
    fn different_seeds_differ() {
        let series = trending_series(300);
        let engine = MonteCarloEngine::new(2000, 30);
        let cancel = CancelToken::new();
        let a = engine.simulate(&series, SimMethod::Gbm, 1, &cancel).unwrap();
        let b = engine.simulate(&series, SimMethod::Gbm, 2, &cancel).unwrap();
        assert_ne!(a.terminal.p50, b.terminal.p50);
    }

    #[test]
    fn percentiles_are_ordered_and_probability_bounded() {
        let series = trending_series(300);
        let engine = MonteCarloEngine::new(5000, 30);
        let cancel = CancelToken::new();
        for method in [SimMethod::Gbm, SimMethod::Bootstrap] {
            let r = engine.simulate(&series, method, 42, &cancel).unwrap();
            assert!(r.terminal.p1 <= r.terminal.p5);
            assert!(r.terminal.p5 <= r.terminal.p50);
            assert!(r.terminal.p50 <= r.terminal.p95);
            assert!(r.terminal.p95 <= r.terminal.p99);
            assert!((0.0..=1.0).contains(&r.probability_profit));
            assert_eq!(r.worst_case_5pct, r.terminal.p5);
        }
    }

    #[test]
    fn constant_series_is_degenerate() {
        let bars = (0..100)
            .map(|i| Bar {
                timestamp: Utc.timestamp_opt(1_600_000_000 + i as i64 * 86_400, 0).unwrap(),
                open: 50.0,
                high: 50.0,
                low: 50.0,
                close: 50.0,
                adj_close: None,
                volume: 0.0,
            })
            .collect();
        let series = PriceSeries {
            ticker: "FLAT".to_string(),
            interval: Interval::Day,
            bars,
        };
        let err = MonteCarloEngine::new(100, 10)
            .simulate(&series, SimMethod::Gbm, 7, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), "Degenerate");
    }

    #[test]
    fn cancellation_stops_the_run() {
        let series = trending_series(300);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = MonteCarloEngine::new(10_000, 252)
            .simulate(&series, SimMethod::Gbm, 42, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
    }
}
