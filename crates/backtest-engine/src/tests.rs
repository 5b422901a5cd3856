use chrono::{TimeZone, Utc};
use engine_core::{Bar, CancelToken, Interval, PriceSeries};
use std::collections::BTreeMap;

use crate::engine::SimulationEngine;
use crate::models::*;
use crate::optimizer::{optimize, ScoreMetric, SearchSpace};
use crate::store::BacktestStore;
use crate::walk_forward::{run_walk_forward, WalkForwardConfig};

/// Helper: a daily bar at day offset `i` with the given OHLC.
fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: Utc
            .timestamp_opt(1_672_617_600 + i as i64 * 86_400, 0) // 2023-01-02
            .unwrap(),
        open,
        high,
        low,
        close,
        adj_close: None,
        volume: 1_000_000.0,
    }
}

/// Helper: series where each bar opens at the previous close.
fn series_from_closes(ticker: &str, closes: &[f64]) -> PriceSeries {
    let mut bars = Vec::with_capacity(closes.len());
    for (i, &close) in closes.iter().enumerate() {
        let open = if i == 0 { close } else { closes[i - 1] };
        let high = open.max(close) * 1.002;
        let low = open.min(close) * 0.998;
        bars.push(bar(i, open, high, low, close));
    }
    PriceSeries {
        ticker: ticker.to_string(),
        interval: Interval::Day,
        bars,
    }
}

/// Helper: V-shaped series that forces an SMA cross.
fn v_shape(n_down: usize, n_up: usize) -> Vec<f64> {
    let mut closes = Vec::new();
    let mut price = 100.0;
    for _ in 0..n_down {
        price *= 0.99;
        closes.push(price);
    }
    for _ in 0..n_up {
        price *= 1.015;
        closes.push(price);
    }
    closes
}

fn config(strategy: &str) -> BacktestConfig {
    BacktestConfig::new(strategy, "AAPL")
}

// =============================================================================
// Execution semantics
// =============================================================================

#[test]
fn signals_fill_at_next_bar_open_with_slippage() {
    let closes = v_shape(30, 40);
    let series = series_from_closes("AAPL", &closes);
    let cfg = config("sma_cross")
        .with_param("fast", 5.0)
        .with_param("slow", 10.0);
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert!(!run.trades.is_empty());
    let trade = &run.trades[0];
    // The fill price is some bar's open plus 5 bps, never the signal
    // bar's close.
    let fills: Vec<f64> = series.bars.iter().map(|b| b.open * 1.0005).collect();
    let matches_an_open = fills
        .iter()
        .any(|f| (f - trade.entry_price).abs() < 1e-9);
    assert!(matches_an_open, "entry {} is not an open+slippage fill", trade.entry_price);
}

#[test]
fn close_fill_mode_fills_on_the_signal_bar() {
    let closes = v_shape(30, 40);
    let series = series_from_closes("AAPL", &closes);
    let mut cfg = config("sma_cross")
        .with_param("fast", 5.0)
        .with_param("slow", 10.0);
    cfg.close_fill = true;
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert!(!run.trades.is_empty());
    let trade = &run.trades[0];
    let fills: Vec<f64> = series.bars.iter().map(|b| b.close * 1.0005).collect();
    assert!(fills.iter().any(|f| (f - trade.entry_price).abs() < 1e-9));
}

#[test]
fn equity_curve_has_one_point_per_bar() {
    let closes = v_shape(40, 60);
    let series = series_from_closes("AAPL", &closes);
    let cfg = config("sma_cross")
        .with_param("fast", 10.0)
        .with_param("slow", 30.0);
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();
    assert_eq!(run.equity_curve.len(), series.bars.len());
}

#[test]
fn warmup_produces_no_signal() {
    // 20 bars with a 30-bar slow SMA: strategy never leaves warm-up.
    let series = series_from_closes("AAPL", &v_shape(10, 10));
    let cfg = config("sma_cross")
        .with_param("fast", 10.0)
        .with_param("slow", 30.0);
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();
    assert_eq!(run.trades.len(), 0);
    assert_eq!(run.final_equity, run.initial_capital);
}

// =============================================================================
// Accounting
// =============================================================================

#[test]
fn closed_trade_pnl_reconciles_with_cash() {
    let closes = v_shape(30, 60);
    let series = series_from_closes("AAPL", &closes);
    let mut cfg = config("sma_cross")
        .with_param("fast", 5.0)
        .with_param("slow", 10.0);
    cfg.commission_bps = 10.0;
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    let total_pnl: f64 = run.trades.iter().filter_map(|t| t.pnl).sum();
    let cash_delta = run.final_equity - run.initial_capital;
    assert!(
        (total_pnl - cash_delta).abs() < 1e-6,
        "pnl {total_pnl} vs cash delta {cash_delta}"
    );
}

#[test]
fn zero_trade_run_reports_null_ratios() {
    let series = series_from_closes("AAPL", &vec![100.0; 50]);
    let cfg = config("momentum_threshold")
        .with_param("lookback", 20.0)
        .with_param("threshold", 0.5);
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert_eq!(run.metrics.num_trades, 0);
    assert!(run.metrics.win_rate.is_none());
    assert!(run.metrics.profit_factor.is_none());
    assert!(run.metrics.average_win.is_none());
}

#[test]
fn trending_run_makes_money_and_reports_metrics() {
    let closes: Vec<f64> = (0..200).map(|i| 100.0 * 1.005_f64.powi(i)).collect();
    let series = series_from_closes("AAPL", &closes);
    let cfg = config("momentum_threshold")
        .with_param("lookback", 10.0)
        .with_param("threshold", 0.01);
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert!(run.final_equity > run.initial_capital);
    assert!(run.metrics.total_return_pct > 0.0);
    assert!(run.metrics.sharpe.is_some());
    assert!(run.metrics.exposure > 0.5);
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn identical_configs_give_identical_trades() {
    let closes = v_shape(40, 80);
    let series = series_from_closes("AAPL", &closes);
    let make = || {
        SimulationEngine::new(
            config("sma_cross")
                .with_param("fast", 10.0)
                .with_param("slow", 30.0),
        )
        .run(&series, None, &CancelToken::new())
        .unwrap()
    };
    let a = make();
    let b = make();
    assert_eq!(a.trades.len(), b.trades.len());
    for (x, y) in a.trades.iter().zip(b.trades.iter()) {
        assert_eq!(x.entry_price, y.entry_price);
        assert_eq!(x.exit_price, y.exit_price);
        assert_eq!(x.pnl, y.pnl);
    }
}

// =============================================================================
// Short selling
// =============================================================================

/// Helper: mean-reverting spread that spikes rich, then decays back.
/// Quiet phases keep |z| under 2.5, the spike pushes it well above.
fn spread_with_spike() -> Vec<f64> {
    let mut closes = Vec::new();
    for i in 0..40 {
        closes.push(100.0 + ((i as f64) * 0.9).sin());
    }
    for _ in 40..44 {
        closes.push(112.0);
    }
    for i in 44..90 {
        closes.push(100.0 + ((i as f64) * 0.9).sin());
    }
    closes
}

fn pairs_config() -> BacktestConfig {
    config("pairs_trading")
        .with_param("window", 20.0)
        .with_param("entry_z", 2.5)
        .with_param("exit_z", 1.0)
}

#[test]
fn sell_while_flat_opens_a_short_that_covers_on_buy() {
    let series = series_from_closes("SPRD", &spread_with_spike());
    let run = SimulationEngine::new(pairs_config())
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert_eq!(run.trades.len(), 1);
    let trade = &run.trades[0];
    assert_eq!(trade.side, TradeSide::Short);
    assert!(trade.exit_time.is_some());

    // Shorting the rich spread near 112 and covering back near 100 is a
    // winner.
    assert!(trade.entry_price > trade.exit_price.unwrap());
    assert!(trade.pnl.unwrap() > 0.0);
    assert!(trade.return_pct.unwrap() > 0.0);
    assert!(run.final_equity > run.initial_capital);
}

#[test]
fn short_fills_carry_directional_slippage() {
    let series = series_from_closes("SPRD", &spread_with_spike());
    let run = SimulationEngine::new(pairs_config())
        .run(&series, None, &CancelToken::new())
        .unwrap();
    let trade = &run.trades[0];

    // Short entry sells the bid: some bar's open minus 5 bps. The cover
    // buys the offer: some bar's open plus 5 bps.
    let entry_fills: Vec<f64> = series.bars.iter().map(|b| b.open * 0.9995).collect();
    let cover_fills: Vec<f64> = series.bars.iter().map(|b| b.open * 1.0005).collect();
    assert!(entry_fills
        .iter()
        .any(|f| (f - trade.entry_price).abs() < 1e-9));
    assert!(cover_fills
        .iter()
        .any(|f| (f - trade.exit_price.unwrap()).abs() < 1e-9));
}

#[test]
fn short_pnl_reconciles_with_cash() {
    let series = series_from_closes("SPRD", &spread_with_spike());
    let mut cfg = pairs_config();
    cfg.commission_bps = 10.0;
    let run = SimulationEngine::new(cfg)
        .run(&series, None, &CancelToken::new())
        .unwrap();

    assert!(run.trades.iter().any(|t| t.side == TradeSide::Short));
    let total_pnl: f64 = run.trades.iter().filter_map(|t| t.pnl).sum();
    let cash_delta = run.final_equity - run.initial_capital;
    assert!(
        (total_pnl - cash_delta).abs() < 1e-6,
        "pnl {total_pnl} vs cash delta {cash_delta}"
    );
}

#[test]
fn long_only_strategies_never_open_shorts() {
    // A collapsing series hands sma_cross plenty of bearish bars; its sell
    // guard keeps it flat rather than short.
    let closes: Vec<f64> = (0..120).map(|i| 100.0 * 0.995_f64.powi(i)).collect();
    let series = series_from_closes("AAPL", &closes);
    let run = SimulationEngine::new(
        config("sma_cross")
            .with_param("fast", 5.0)
            .with_param("slow", 10.0),
    )
    .run(&series, None, &CancelToken::new())
    .unwrap();
    assert!(run.trades.iter().all(|t| t.side == TradeSide::Long));
}

// =============================================================================
// Optimizer
// =============================================================================

#[test]
fn optimizer_skips_degenerate_combinations_silently() {
    let closes = v_shape(40, 80);
    let series = series_from_closes("AAPL", &closes);
    let mut axes = BTreeMap::new();
    // 3x3 grid, but only combos with fast < slow are valid (5 of 9).
    axes.insert("fast".to_string(), vec![5.0, 10.0, 30.0]);
    axes.insert("slow".to_string(), vec![10.0, 30.0, 50.0]);

    let result = optimize(
        &config("sma_cross"),
        &series,
        None,
        &SearchSpace::Grid(axes),
        ScoreMetric::TotalReturn,
        42,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(result.evaluated, 5);
    let best_fast = result.best_params["fast"];
    let best_slow = result.best_params["slow"];
    assert!(best_fast < best_slow);
}

#[test]
fn random_search_is_deterministic_under_a_seed() {
    let closes = v_shape(40, 80);
    let series = series_from_closes("AAPL", &closes);
    let mut ranges = BTreeMap::new();
    ranges.insert("lookback".to_string(), (5.0, 40.0));
    ranges.insert("threshold".to_string(), (0.0, 0.05));
    let space = SearchSpace::Random { ranges, samples: 20 };

    let run = |seed| {
        optimize(
            &config("momentum_threshold"),
            &series,
            None,
            &space,
            ScoreMetric::Sharpe,
            seed,
            &CancelToken::new(),
        )
        .unwrap()
    };
    let a = run(7);
    let b = run(7);
    assert_eq!(a.best_params, b.best_params);
    assert_eq!(a.best_score, b.best_score);
}

// =============================================================================
// Walk-forward
// =============================================================================

#[test]
fn walk_forward_oos_curve_covers_every_test_bar() {
    // Two years of synthetic daily data (weekdays compressed to a flat
    // sequence of calendar days for simplicity).
    let closes: Vec<f64> = (0..500)
        .map(|i| 100.0 * (1.0 + 0.0008 * i as f64 + ((i as f64) * 0.15).sin() * 0.04))
        .collect();
    let series = series_from_closes("SPY", &closes);

    let mut axes = BTreeMap::new();
    axes.insert("lookback".to_string(), vec![10.0, 20.0]);
    axes.insert("threshold".to_string(), vec![0.0, 0.02]);

    let cfg = WalkForwardConfig {
        train_months: 6,
        test_months: 2,
        space: SearchSpace::Grid(axes),
        metric: ScoreMetric::Sharpe,
        seed: 42,
    };
    let report = run_walk_forward(
        &config("momentum_threshold"),
        &series,
        None,
        &cfg,
        &CancelToken::new(),
    )
    .unwrap();

    assert!(!report.windows.is_empty());
    assert_eq!(report.oos_equity_curve.len(), report.total_test_bars);
    let summed: usize = report.windows.iter().map(|w| w.test_bar_count).sum();
    assert_eq!(report.total_test_bars, summed);

    // Windows step by the test span and never overlap.
    for pair in report.windows.windows(2) {
        assert!(pair[1].test_start >= pair[0].test_end);
    }

    // Flag consistency with the reported averages.
    match report.degradation_ratio {
        Some(ratio) => assert_eq!(report.overfitting_flag, ratio < 0.5),
        None => assert!(!report.overfitting_flag),
    }
}

// =============================================================================
// Store
// =============================================================================

#[tokio::test]
async fn store_round_trips_a_run() {
    let closes = v_shape(30, 60);
    let series = series_from_closes("AAPL", &closes);
    let run = SimulationEngine::new(
        config("sma_cross")
            .with_param("fast", 5.0)
            .with_param("slow", 10.0),
    )
    .run(&series, None, &CancelToken::new())
    .unwrap();

    let store = BacktestStore::new("sqlite::memory:").await.unwrap();
    let id = store.save_run(&run, None).await.unwrap();
    let loaded = store.load_run(&id).await.unwrap();

    assert_eq!(loaded.strategy_name, run.strategy_name);
    assert_eq!(loaded.trades.len(), run.trades.len());
    assert_eq!(loaded.equity_curve.len(), run.equity_curve.len());
    assert_eq!(loaded.params, run.params);
    assert_eq!(loaded.final_equity, run.final_equity);
}

#[tokio::test]
async fn save_run_is_idempotent_per_client_request_id() {
    let closes = v_shape(30, 60);
    let series = series_from_closes("AAPL", &closes);
    let engine = SimulationEngine::new(
        config("sma_cross")
            .with_param("fast", 5.0)
            .with_param("slow", 10.0),
    );
    let run_a = engine.run(&series, None, &CancelToken::new()).unwrap();
    let run_b = engine.run(&series, None, &CancelToken::new()).unwrap();

    let store = BacktestStore::new("sqlite::memory:").await.unwrap();
    let first = store.save_run(&run_a, Some("req-1")).await.unwrap();
    let second = store.save_run(&run_b, Some("req-1")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(store.list_runs(None, None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn list_runs_filters_by_strategy_and_ticker() {
    let closes = v_shape(30, 60);
    let series = series_from_closes("AAPL", &closes);
    let run = SimulationEngine::new(
        config("sma_cross")
            .with_param("fast", 5.0)
            .with_param("slow", 10.0),
    )
    .run(&series, None, &CancelToken::new())
    .unwrap();

    let store = BacktestStore::new("sqlite::memory:").await.unwrap();
    store.save_run(&run, None).await.unwrap();

    assert_eq!(
        store.list_runs(Some("sma_cross"), Some("AAPL"), 10).await.unwrap().len(),
        1
    );
    assert!(store
        .list_runs(Some("macd_signal"), None, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn append_trade_to_missing_run_is_not_found() {
    let store = BacktestStore::new("sqlite::memory:").await.unwrap();
    let trade = crate::models::TradeRecord {
        run_id: None,
        entry_time: Utc.timestamp_opt(1_672_617_600, 0).unwrap(),
        exit_time: None,
        side: crate::models::TradeSide::Long,
        qty: 1.0,
        entry_price: 100.0,
        exit_price: None,
        pnl: None,
        return_pct: None,
        exit_reason: None,
        holding_bars: None,
    };
    let err = store.append_trade("no-such-run", &trade).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}
