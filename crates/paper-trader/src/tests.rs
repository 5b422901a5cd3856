use engine_core::{CancelToken, RuntimeConfig, RuntimeContext};
use market_data::StubProvider;
use std::sync::Arc;

use crate::models::ScoredCandidate;
use crate::rebalance::{PaperTrader, RebalanceSettings};
use crate::store::PaperStore;

fn candidate(ticker: &str, composite: f64) -> ScoredCandidate {
    ScoredCandidate {
        ticker: ticker.to_string(),
        composite,
    }
}

/// Six buy-rated names, all quoted at 50.
fn six_candidates() -> Vec<ScoredCandidate> {
    ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"]
        .iter()
        .enumerate()
        .map(|(i, t)| candidate(t, 4.5 - i as f64 * 0.1))
        .collect()
}

async fn trader() -> (PaperTrader, Arc<StubProvider>, RuntimeContext) {
    let store = PaperStore::new("sqlite::memory:").await.unwrap();
    let stub = Arc::new(StubProvider::strict());
    for t in ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"] {
        stub.set_quote(t, 50.0);
    }
    let ctx = RuntimeContext::new(stub.clone(), RuntimeConfig::default());
    (
        PaperTrader::new(store, RebalanceSettings::default()),
        stub,
        ctx,
    )
}

// =============================================================================
// First rebalance: allocation and accounting
// =============================================================================

#[tokio::test]
async fn first_rebalance_allocates_top_n_at_target_weight() {
    let (trader, _stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("growth", 100_000.0).await.unwrap();

    let report = trader
        .rebalance(&ctx, &portfolio.id, &six_candidates(), None, &CancelToken::new())
        .await
        .unwrap();

    let state = trader.store().load_portfolio(&portfolio.id).await.unwrap();
    assert!(state.positions.len() <= 6);
    assert_eq!(state.positions.len(), 6);

    // cash == initial − Σ(shares × fill) − fees
    let spent: f64 = report
        .trades
        .iter()
        .map(|t| t.qty * t.price + t.commission)
        .sum();
    assert!((state.portfolio.cash - (100_000.0 - spent)).abs() < 1e-6);
    assert!(state.portfolio.cash >= 0.0);

    // No position exceeded its target weight at fill time.
    for pos in &state.positions {
        let value_at_fill = pos.qty * pos.avg_cost;
        assert!(
            value_at_fill <= 0.15 * 100_000.0 + 1e-6,
            "{} worth {value_at_fill} at fill",
            pos.ticker
        );
    }

    // Equity identity: initial + realized + unrealized == equity.
    let marks = 50.0;
    let unrealized: f64 = state
        .positions
        .iter()
        .map(|p| (marks - p.avg_cost) * p.qty)
        .sum();
    let equity = state.portfolio.cash
        + state.positions.iter().map(|p| p.qty * marks).sum::<f64>();
    assert!((100_000.0 + unrealized - equity).abs() < 1e-6);
}

#[tokio::test]
async fn insufficient_cash_skips_name_but_continues() {
    let store = PaperStore::new("sqlite::memory:").await.unwrap();
    let stub = Arc::new(StubProvider::strict());
    for t in ["AAA", "BBB", "CCC"] {
        stub.set_quote(t, 50.0);
    }
    let ctx = RuntimeContext::new(stub, RuntimeConfig::default());
    // Three names at 40% each cannot all fit.
    let settings = RebalanceSettings {
        target_weight: 0.40,
        max_positions: 3,
        ..RebalanceSettings::default()
    };
    let trader = PaperTrader::new(store, settings);
    let portfolio = trader.create_portfolio("tight", 10_000.0).await.unwrap();

    let candidates = vec![candidate("AAA", 4.0), candidate("BBB", 3.9), candidate("CCC", 3.8)];
    let report = trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    let state = trader.store().load_portfolio(&portfolio.id).await.unwrap();
    assert_eq!(state.positions.len(), 2, "third name cannot be afforded");
    assert!(report
        .skipped
        .iter()
        .any(|(t, why)| t == "CCC" && why.contains("insufficient cash")));
    assert!(state.portfolio.cash >= 0.0);
}

// =============================================================================
// Stop-loss ordering
// =============================================================================

#[tokio::test]
async fn stop_loss_runs_before_the_rebalance() {
    let (trader, stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("sl", 100_000.0).await.unwrap();
    let candidates = six_candidates();

    trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    // AAA collapses below the 15% stop.
    stub.set_quote("AAA", 40.0);
    let report = trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.stop_losses_triggered, 1);
    let first = &report.trades[0];
    assert_eq!(first.action, "sell");
    assert_eq!(first.reason, "stop_loss");
    assert_eq!(first.ticker, "AAA");
    assert!(first.realized_pnl.unwrap() < 0.0);
}

#[tokio::test]
async fn dropped_name_is_sold_on_rebalance() {
    let (trader, _stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("drop", 100_000.0).await.unwrap();

    trader
        .rebalance(&ctx, &portfolio.id, &six_candidates(), None, &CancelToken::new())
        .await
        .unwrap();

    // FFF falls out of the universe.
    let five: Vec<ScoredCandidate> = six_candidates().into_iter().take(5).collect();
    let report = trader
        .rebalance(&ctx, &portfolio.id, &five, None, &CancelToken::new())
        .await
        .unwrap();

    assert!(report
        .trades
        .iter()
        .any(|t| t.ticker == "FFF" && t.reason == "rebalance_exit"));
    let state = trader.store().load_portfolio(&portfolio.id).await.unwrap();
    assert!(!state.positions.iter().any(|p| p.ticker == "FFF"));
}

// =============================================================================
// Pyramiding
// =============================================================================

#[tokio::test]
async fn winner_pyramids_once_per_level() {
    let (trader, stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("pyr", 100_000.0).await.unwrap();
    let candidates = six_candidates();

    trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    // AAA up ~20% over its fill: first pyramid level only.
    stub.set_quote("AAA", 60.0);
    let report = trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    let pyramids: Vec<_> = report
        .trades
        .iter()
        .filter(|t| t.reason == "pyramid")
        .collect();
    assert_eq!(pyramids.len(), 1);
    assert_eq!(pyramids[0].ticker, "AAA");

    let state = trader.store().load_portfolio(&portfolio.id).await.unwrap();
    let aaa = state.positions.iter().find(|p| p.ticker == "AAA").unwrap();
    assert_eq!(aaa.pyramid_count, 1);

    // Re-running at the same price must not pyramid again.
    let again = trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();
    assert!(again.trades.iter().all(|t| t.reason != "pyramid" || t.ticker != "AAA"));
}

#[tokio::test]
async fn big_winner_takes_both_pyramid_levels() {
    let (trader, stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("pyr2", 100_000.0).await.unwrap();
    // Single-name book keeps plenty of cash free for both adds.
    let candidates = vec![candidate("AAA", 4.5)];

    trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    // Up 40%: both the 15% and 30% levels are crossed.
    stub.set_quote("AAA", 70.0);
    let report = trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    let pyramids = report
        .trades
        .iter()
        .filter(|t| t.reason == "pyramid" && t.ticker == "AAA")
        .count();
    assert_eq!(pyramids, 2);
    let state = trader.store().load_portfolio(&portfolio.id).await.unwrap();
    let aaa = state.positions.iter().find(|p| p.ticker == "AAA").unwrap();
    assert_eq!(aaa.pyramid_count, 2);
}

// =============================================================================
// Idempotence and persistence
// =============================================================================

#[tokio::test]
async fn rebalance_is_idempotent_per_client_request_id() {
    let (trader, _stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("idem", 100_000.0).await.unwrap();
    let candidates = six_candidates();

    let first = trader
        .rebalance(&ctx, &portfolio.id, &candidates, Some("req-7"), &CancelToken::new())
        .await
        .unwrap();
    let replay = trader
        .rebalance(&ctx, &portfolio.id, &candidates, Some("req-7"), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(first.trades.len(), replay.trades.len());
    assert_eq!(first.cash_after, replay.cash_after);

    // The trade log holds each trade exactly once.
    let log = trader.store().trade_log(&portfolio.id).await.unwrap();
    assert_eq!(log.len(), first.trades.len());
}

#[tokio::test]
async fn equity_snapshots_are_monotone() {
    let (trader, stub, ctx) = trader().await;
    let portfolio = trader.create_portfolio("snap", 100_000.0).await.unwrap();
    let candidates = six_candidates();

    trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();
    stub.set_quote("AAA", 55.0);
    trader
        .rebalance(&ctx, &portfolio.id, &candidates, None, &CancelToken::new())
        .await
        .unwrap();

    let history = trader.store().equity_history(&portfolio.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp <= history[1].timestamp);
}

#[tokio::test]
async fn unknown_portfolio_is_not_found() {
    let (trader, _stub, ctx) = trader().await;
    let err = trader
        .rebalance(&ctx, "missing", &six_candidates(), None, &CancelToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}
