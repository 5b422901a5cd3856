use chrono::{DateTime, Months, Utc};
use engine_core::{CancelToken, EngineError, EngineResult, PriceSeries};
use serde::{Deserialize, Serialize};

use crate::engine::SimulationEngine;
use crate::models::{BacktestConfig, EquityPoint, WalkForwardWindow};
use crate::optimizer::{optimize, ScoreMetric, SearchSpace};

/// Walk-forward setup: rolling train/test windows stepped by the test span,
/// optimizing on each train slice and scoring out-of-sample on the test
/// slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_months: u32,
    pub test_months: u32,
    pub space: SearchSpace,
    pub metric: ScoreMetric,
    pub seed: u64,
}

/// Walk-forward output with the concatenated out-of-sample equity curve and
/// the overfitting verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WalkForwardWindow>,
    pub oos_equity_curve: Vec<EquityPoint>,
    pub total_test_bars: usize,
    pub in_sample_avg_sharpe: f64,
    pub out_of_sample_avg_sharpe: f64,
    /// OOS / IS average Sharpe; None when in-sample Sharpe is not positive.
    pub degradation_ratio: Option<f64>,
    /// Raised when OOS Sharpe degrades below half of in-sample Sharpe.
    pub overfitting_flag: bool,
}

/// Run walk-forward validation. Windows with too few bars to either train
/// or test are skipped with a warning.
pub fn run_walk_forward(
    base: &BacktestConfig,
    series: &PriceSeries,
    benchmark: Option<&PriceSeries>,
    cfg: &WalkForwardConfig,
    cancel: &CancelToken,
) -> EngineResult<WalkForwardReport> {
    if cfg.train_months == 0 || cfg.test_months == 0 {
        return Err(EngineError::InvalidArgument(
            "walk-forward needs positive train and test spans".to_string(),
        ));
    }
    let bars = &series.bars;
    if bars.len() < 40 {
        return Err(EngineError::Degenerate(format!(
            "walk-forward needs more history, got {} bars",
            bars.len()
        )));
    }

    let first = bars[0].timestamp;
    let last = bars[bars.len() - 1].timestamp;

    let mut windows: Vec<WalkForwardWindow> = Vec::new();
    let mut oos_curve: Vec<EquityPoint> = Vec::new();
    let mut cumulative_capital = base.initial_capital;
    let mut is_sharpes: Vec<f64> = Vec::new();
    let mut oos_sharpes: Vec<f64> = Vec::new();

    let mut index = 0u32;
    loop {
        cancel.check()?;
        let train_start = add_months(first, index * cfg.test_months);
        let train_end = add_months(train_start, cfg.train_months);
        let test_end = add_months(train_end, cfg.test_months);
        if test_end > last {
            break;
        }

        let train_slice = slice_between(series, train_start, train_end);
        let test_slice = slice_between(series, train_end, test_end);
        if train_slice.bars.len() < 30 || test_slice.bars.len() < 5 {
            tracing::warn!(
                window = index,
                "skipping walk-forward window with too few bars ({} train / {} test)",
                train_slice.bars.len(),
                test_slice.bars.len()
            );
            index += 1;
            continue;
        }

        // In-sample: pick parameters on the train slice only.
        let picked = optimize(
            base,
            &train_slice,
            benchmark,
            &cfg.space,
            cfg.metric,
            cfg.seed.wrapping_add(u64::from(index)),
            cancel,
        )?;

        let mut is_config = base.clone();
        is_config.params.extend(picked.best_params.clone());
        let is_run = SimulationEngine::new(is_config).run(&train_slice, benchmark, cancel)?;

        // Out-of-sample: apply them unchanged to the unseen test slice,
        // chaining capital across windows.
        let mut oos_config = base.clone();
        oos_config.params.extend(picked.best_params.clone());
        oos_config.initial_capital = cumulative_capital;
        let oos_run = SimulationEngine::new(oos_config).run(&test_slice, benchmark, cancel)?;

        cumulative_capital = oos_run.final_equity;
        oos_curve.extend(oos_run.equity_curve.iter().cloned());

        if let Some(s) = is_run.metrics.sharpe {
            is_sharpes.push(s);
        }
        if let Some(s) = oos_run.metrics.sharpe {
            oos_sharpes.push(s);
        }

        windows.push(WalkForwardWindow {
            window_index: index,
            train_start,
            train_end,
            test_start: train_end,
            test_end,
            best_params: picked.best_params,
            in_sample_score: picked.best_score,
            out_of_sample_score: cfg.metric_score(&oos_run),
            test_bar_count: test_slice.bars.len(),
        });
        index += 1;
    }

    if windows.is_empty() {
        return Err(EngineError::Degenerate(
            "history too short for a single walk-forward window".to_string(),
        ));
    }

    let avg = |v: &[f64]| -> f64 {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };
    let is_avg = avg(&is_sharpes);
    let oos_avg = avg(&oos_sharpes);
    let degradation_ratio = if is_avg > 0.0 { Some(oos_avg / is_avg) } else { None };
    let overfitting_flag = match degradation_ratio {
        Some(ratio) => ratio < 0.5,
        None => false,
    };

    let total_test_bars = windows.iter().map(|w| w.test_bar_count).sum();
    Ok(WalkForwardReport {
        windows,
        oos_equity_curve: oos_curve,
        total_test_bars,
        in_sample_avg_sharpe: is_avg,
        out_of_sample_avg_sharpe: oos_avg,
        degradation_ratio,
        overfitting_flag,
    })
}

impl WalkForwardConfig {
    fn metric_score(&self, run: &crate::models::BacktestRun) -> f64 {
        match self.metric {
            ScoreMetric::Sharpe => run.metrics.sharpe.unwrap_or(0.0),
            ScoreMetric::TotalReturn => run.metrics.total_return_pct,
            ScoreMetric::Calmar => run.metrics.calmar.unwrap_or(0.0),
        }
    }
}

fn add_months(ts: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    ts.checked_add_months(Months::new(months)).unwrap_or(ts)
}

/// Bars with `start <= timestamp < end` as a standalone series.
fn slice_between(series: &PriceSeries, start: DateTime<Utc>, end: DateTime<Utc>) -> PriceSeries {
    PriceSeries {
        ticker: series.ticker.clone(),
        interval: series.interval,
        bars: series
            .bars
            .iter()
            .filter(|b| b.timestamp >= start && b.timestamp < end)
            .cloned()
            .collect(),
    }
}
