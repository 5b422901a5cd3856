use backtest_engine::{
    optimize, run_walk_forward, BacktestConfig, BacktestStore, ScoreMetric, SearchSpace,
    SimulationEngine, WalkForwardConfig,
};
use engine_core::{
    CancelToken, EngineError, EngineResult, Interval, PriceSeries, RuntimeContext,
};
use paper_trader::{PaperTrader, ScoredCandidate};
use rating_engine::RatingEngine;
use risk_engine::{MonteCarloEngine, SimMethod};
use serde::Serialize;
use serde_json::{json, Value};
use signal_engine::{
    CointegrationEngine, ComponentSignal, CorrelationEngine, CorrelationSettings, FusionEngine,
    MomentumEngine,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::params::{ParamSpec, ParamType, ParamValue, ParamValues};
use crate::registry::{CapabilitySpec, ModuleRegistry};

fn to_value<T: Serialize>(value: &T) -> EngineResult<Value> {
    serde_json::to_value(value).map_err(|e| EngineError::Internal(format!("serialize result: {e}")))
}

/// Trading-day lookback to calendar days with weekend/holiday slack.
fn calendar_days(trading_days: i64) -> i64 {
    trading_days * 7 / 5 + 30
}

async fn fetch_daily(
    ctx: &RuntimeContext,
    ticker: &str,
    trading_days: i64,
    cancel: &CancelToken,
) -> EngineResult<PriceSeries> {
    ctx.fetcher
        .price_history(ticker, Interval::Day, calendar_days(trading_days), cancel)
        .await
}

fn correlation_settings(params: &ParamValues) -> CorrelationSettings {
    let defaults = CorrelationSettings::default();
    CorrelationSettings {
        window_short: params.int_opt("short").map(|v| v as usize).unwrap_or(defaults.window_short),
        window_long: params.int_opt("long").map(|v| v as usize).unwrap_or(defaults.window_long),
        lookback: params.int_opt("lookback").map(|v| v as usize).unwrap_or(defaults.lookback),
        ..defaults
    }
}

fn correlation_params(spec: CapabilitySpec) -> CapabilitySpec {
    spec.param(ParamSpec::with_default("short", ParamType::Int, ParamValue::Int(20)))
        .param(ParamSpec::with_default("long", ParamType::Int, ParamValue::Int(60)))
        .param(ParamSpec::with_default("lookback", ParamType::Int, ParamValue::Int(252)))
}

fn strategy_params(raw: Option<&Value>) -> EngineResult<BTreeMap<String, f64>> {
    let mut out = BTreeMap::new();
    if let Some(value) = raw {
        let object = value.as_object().ok_or_else(|| {
            EngineError::InvalidArgument("params must be an object of numbers".to_string())
        })?;
        for (key, v) in object {
            let number = v.as_f64().ok_or_else(|| {
                EngineError::InvalidArgument(format!("strategy parameter {key} must be numeric"))
            })?;
            out.insert(key.clone(), number);
        }
    }
    Ok(out)
}

fn grid_space(raw: &Value) -> EngineResult<SearchSpace> {
    let object = raw.as_object().ok_or_else(|| {
        EngineError::InvalidArgument("grid must be an object of value lists".to_string())
    })?;
    let mut axes = BTreeMap::new();
    for (key, v) in object {
        let list = v
            .as_array()
            .and_then(|items| {
                items
                    .iter()
                    .map(|x| x.as_f64())
                    .collect::<Option<Vec<f64>>>()
            })
            .ok_or_else(|| {
                EngineError::InvalidArgument(format!("grid axis {key} must be a number array"))
            })?;
        if list.is_empty() {
            return Err(EngineError::InvalidArgument(format!("grid axis {key} is empty")));
        }
        axes.insert(key.clone(), list);
    }
    if axes.is_empty() {
        return Err(EngineError::InvalidArgument("grid has no axes".to_string()));
    }
    Ok(SearchSpace::Grid(axes))
}

fn backtest_config(ctx: &RuntimeContext, params: &ParamValues) -> EngineResult<BacktestConfig> {
    let mut config = BacktestConfig::new(params.str("strategy")?, params.str("ticker")?);
    config.params = strategy_params(params.json_opt("params"))?;
    config.initial_capital = params.float_opt("initial_capital").unwrap_or(100_000.0);
    config.commission_bps = params
        .float_opt("commission_bps")
        .unwrap_or(ctx.config.backtest_default_commission_bps);
    config.slippage_bps = params
        .float_opt("slippage_bps")
        .unwrap_or(ctx.config.backtest_default_slippage_bps);
    if let Some(size) = params.float_opt("position_size") {
        config.position_size = size;
    }
    Ok(config)
}

/// Assemble the full module registry. Called once at process start; the
/// registry is immutable afterwards.
pub fn build_registry(
    backtest_store: BacktestStore,
    paper: Arc<PaperTrader>,
) -> EngineResult<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();

    // --- momentum_cross_sectional ---
    registry.register(
        "momentum_cross_sectional",
        CapabilitySpec::new("scan", |ctx, params, cancel| {
            Box::pin(async move {
                let tickers = params.tickers("tickers")?.to_vec();
                let ranks = MomentumEngine::new().scan(&ctx, &tickers, &cancel).await?;
                to_value(&ranks)
            })
        })
        .param(ParamSpec::required("tickers", ParamType::TickerList)),
    )?;

    // --- correlation_anomaly ---
    registry.register(
        "correlation_anomaly",
        correlation_params(CapabilitySpec::new("run", |ctx, params, cancel| {
            Box::pin(async move {
                let engine = CorrelationEngine::new(correlation_settings(&params));
                let lookback = engine.settings().lookback;
                let a = fetch_daily(&ctx, params.str("ticker_a")?, lookback as i64, &cancel).await?;
                let b = fetch_daily(&ctx, params.str("ticker_b")?, lookback as i64, &cancel).await?;
                let pair = engine.detect_breakdown(&a, &b)?;
                to_value(&pair)
            })
        })
        .param(ParamSpec::required("ticker_a", ParamType::Str))
        .param(ParamSpec::required("ticker_b", ParamType::Str))),
    )?;
    registry.register(
        "correlation_anomaly",
        correlation_params(CapabilitySpec::new("scan", |ctx, params, cancel| {
            Box::pin(async move {
                let engine = CorrelationEngine::new(correlation_settings(&params));
                let tickers = params.tickers("tickers")?.to_vec();
                let top_k = params.int_opt("top_k").unwrap_or(10).max(1) as usize;
                let anomalies = engine.scan_universe(&ctx, &tickers, top_k, &cancel).await?;
                to_value(&anomalies)
            })
        })
        .param(ParamSpec::required("tickers", ParamType::TickerList))
        .param(ParamSpec::with_default("top_k", ParamType::Int, ParamValue::Int(10)))),
    )?;
    registry.register(
        "correlation_anomaly",
        correlation_params(CapabilitySpec::new("regime", |ctx, params, cancel| {
            Box::pin(async move {
                let engine = CorrelationEngine::new(correlation_settings(&params));
                let tickers = params.tickers("tickers")?.to_vec();
                let report = engine.regime_for(&ctx, &tickers, &cancel).await?;
                to_value(&report)
            })
        })
        .param(ParamSpec::required("tickers", ParamType::TickerList))),
    )?;
    registry.register(
        "correlation_anomaly",
        correlation_params(CapabilitySpec::new("pairs", |ctx, params, cancel| {
            Box::pin(async move {
                let engine = CorrelationEngine::new(correlation_settings(&params));
                let lookback = engine.settings().lookback;
                let a = fetch_daily(&ctx, params.str("ticker_a")?, lookback as i64, &cancel).await?;
                let b = fetch_daily(&ctx, params.str("ticker_b")?, lookback as i64, &cancel).await?;
                let signal = engine.pairs_arbitrage(&a, &b)?;
                to_value(&signal)
            })
        })
        .param(ParamSpec::required("ticker_a", ParamType::Str))
        .param(ParamSpec::required("ticker_b", ParamType::Str))),
    )?;

    // --- cointegration ---
    registry.register(
        "cointegration",
        CapabilitySpec::new("run", |ctx, params, cancel| {
            Box::pin(async move {
                let lookback = params.int_opt("lookback").unwrap_or(252).max(30) as usize;
                let engine = CointegrationEngine::new(lookback);
                let report = engine
                    .test_pair(&ctx, params.str("ticker_a")?, params.str("ticker_b")?, &cancel)
                    .await?;
                to_value(&report)
            })
        })
        .param(ParamSpec::required("ticker_a", ParamType::Str))
        .param(ParamSpec::required("ticker_b", ParamType::Str))
        .param(ParamSpec::with_default("lookback", ParamType::Int, ParamValue::Int(252))),
    )?;

    // --- signal_fusion ---
    registry.register(
        "signal_fusion",
        CapabilitySpec::new("run", |_ctx, params, _cancel| {
            Box::pin(async move {
                let raw = params.json_opt("components").ok_or_else(|| {
                    EngineError::InvalidArgument("missing components".to_string())
                })?;
                let components: Vec<ComponentSignal> = serde_json::from_value(raw.clone())
                    .map_err(|e| {
                        EngineError::InvalidArgument(format!("components malformed: {e}"))
                    })?;
                let fused = FusionEngine::new().fuse(params.str("ticker")?, &components)?;
                to_value(&fused)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::required("components", ParamType::Json)),
    )?;

    // --- monte_carlo ---
    registry.register(
        "monte_carlo",
        CapabilitySpec::new("run", |ctx, params, cancel| {
            Box::pin(async move {
                let ticker = params.str("ticker")?.to_string();
                let paths = params.int_opt("paths").unwrap_or(10_000).max(1) as usize;
                let horizon = params.int_opt("horizon_days").unwrap_or(30).max(1) as usize;
                let lookback = params.int_opt("lookback").unwrap_or(252).max(30) as usize;
                let method = match params.str_opt("method").unwrap_or("gbm") {
                    "gbm" => SimMethod::Gbm,
                    "bootstrap" => SimMethod::Bootstrap,
                    other => {
                        return Err(EngineError::InvalidArgument(format!(
                            "unknown method {other} (want gbm|bootstrap)"
                        )))
                    }
                };
                let seed = ctx.seed_for(
                    params.int_opt("seed").map(|v| v as u64),
                    &format!("monte_carlo:{ticker}"),
                );

                let series = fetch_daily(&ctx, &ticker, lookback as i64, &cancel).await?;
                let mut engine = MonteCarloEngine::new(paths, horizon);
                engine.lookback_days = lookback;
                let report = engine.simulate(&series, method, seed, &cancel)?;
                to_value(&report)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::with_default("paths", ParamType::Int, ParamValue::Int(10_000)))
        .param(ParamSpec::with_default("horizon_days", ParamType::Int, ParamValue::Int(30)))
        .param(ParamSpec::with_default("lookback", ParamType::Int, ParamValue::Int(252)))
        .param(ParamSpec::with_default(
            "method",
            ParamType::Str,
            ParamValue::Str("gbm".to_string()),
        ))
        .param(ParamSpec::optional("seed", ParamType::Int)),
    )?;

    // --- volatility_surface ---
    registry.register(
        "volatility_surface",
        CapabilitySpec::new("run", |ctx, params, cancel| {
            Box::pin(async move {
                let ticker = params.str("ticker")?;
                cancel.check()?;
                let chain = ctx
                    .fetcher
                    .options_chain(ticker, params.date_opt("expiry"), &cancel)
                    .await?;
                let quote = ctx.fetcher.quote(ticker, &cancel).await?;
                let surface = risk_engine::build_surface(&chain, quote.last)?;
                to_value(&surface)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::optional("expiry", ParamType::Date)),
    )?;

    // --- factor_rating ---
    registry.register(
        "factor_rating",
        CapabilitySpec::new("run", |ctx, params, cancel| {
            Box::pin(async move {
                let score = RatingEngine::new()
                    .score(&ctx, params.str("ticker")?, params.date_opt("as_of"), &cancel)
                    .await?;
                to_value(&score)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::optional("as_of", ParamType::Date)),
    )?;

    // --- backtest ---
    let store = backtest_store.clone();
    registry.register(
        "backtest",
        CapabilitySpec::new("run", move |ctx, params, cancel| {
            let store = store.clone();
            Box::pin(async move {
                let config = backtest_config(&ctx, &params)?;
                let period = params.int_opt("period_days").unwrap_or(252);
                let series = fetch_daily(&ctx, &config.ticker, period, &cancel).await?;
                let benchmark_ticker = params.str_opt("benchmark").unwrap_or("SPY").to_string();
                let benchmark = fetch_daily(&ctx, &benchmark_ticker, period, &cancel)
                    .await
                    .ok();
                let run = SimulationEngine::new(config).run(&series, benchmark.as_ref(), &cancel)?;
                let id = store
                    .save_run(&run, params.str_opt("client_request_id"))
                    .await?;
                let mut value = to_value(&run)?;
                if let Some(object) = value.as_object_mut() {
                    object.insert("id".to_string(), json!(id));
                }
                Ok(value)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::required("strategy", ParamType::Str))
        .param(ParamSpec::optional("params", ParamType::Json))
        .param(ParamSpec::with_default("period_days", ParamType::Int, ParamValue::Int(252)))
        .param(ParamSpec::optional("initial_capital", ParamType::Float))
        .param(ParamSpec::optional("commission_bps", ParamType::Float))
        .param(ParamSpec::optional("slippage_bps", ParamType::Float))
        .param(ParamSpec::optional("position_size", ParamType::Float))
        .param(ParamSpec::with_default(
            "benchmark",
            ParamType::Str,
            ParamValue::Str("SPY".to_string()),
        ))
        .param(ParamSpec::optional("client_request_id", ParamType::Str))
        .timeout(120),
    )?;

    registry.register(
        "backtest",
        CapabilitySpec::new("optimize", |ctx, params, cancel| {
            Box::pin(async move {
                let config = backtest_config(&ctx, &params)?;
                let period = params.int_opt("period_days").unwrap_or(504);
                let series = fetch_daily(&ctx, &config.ticker, period, &cancel).await?;
                let metric = ScoreMetric::parse(params.str_opt("metric").unwrap_or("sharpe"))?;
                let seed = ctx.seed_for(
                    params.int_opt("seed").map(|v| v as u64),
                    &format!("optimize:{}", config.ticker),
                );

                let space = match (params.json_opt("grid"), params.json_opt("random")) {
                    (Some(grid), None) => grid_space(grid)?,
                    (None, Some(random)) => {
                        let object = random.as_object().ok_or_else(|| {
                            EngineError::InvalidArgument(
                                "random must be an object of [lo, hi] ranges".to_string(),
                            )
                        })?;
                        let mut ranges = BTreeMap::new();
                        for (key, v) in object {
                            let pair = v
                                .as_array()
                                .filter(|a| a.len() == 2)
                                .and_then(|a| Some((a[0].as_f64()?, a[1].as_f64()?)))
                                .ok_or_else(|| {
                                    EngineError::InvalidArgument(format!(
                                        "range {key} must be [lo, hi]"
                                    ))
                                })?;
                            ranges.insert(key.clone(), pair);
                        }
                        SearchSpace::Random {
                            ranges,
                            samples: params.int_opt("samples").unwrap_or(50).max(1) as usize,
                        }
                    }
                    _ => {
                        return Err(EngineError::InvalidArgument(
                            "provide exactly one of grid or random".to_string(),
                        ))
                    }
                };

                let result = optimize(&config, &series, None, &space, metric, seed, &cancel)?;
                to_value(&result)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::required("strategy", ParamType::Str))
        .param(ParamSpec::optional("params", ParamType::Json))
        .param(ParamSpec::optional("grid", ParamType::Json))
        .param(ParamSpec::optional("random", ParamType::Json))
        .param(ParamSpec::with_default("samples", ParamType::Int, ParamValue::Int(50)))
        .param(ParamSpec::with_default("period_days", ParamType::Int, ParamValue::Int(504)))
        .param(ParamSpec::optional("initial_capital", ParamType::Float))
        .param(ParamSpec::optional("commission_bps", ParamType::Float))
        .param(ParamSpec::optional("slippage_bps", ParamType::Float))
        .param(ParamSpec::optional("position_size", ParamType::Float))
        .param(ParamSpec::with_default(
            "metric",
            ParamType::Str,
            ParamValue::Str("sharpe".to_string()),
        ))
        .param(ParamSpec::optional("seed", ParamType::Int))
        .timeout(300),
    )?;

    registry.register(
        "backtest",
        CapabilitySpec::new("walk_forward", |ctx, params, cancel| {
            Box::pin(async move {
                let config = backtest_config(&ctx, &params)?;
                let period = params.int_opt("period_days").unwrap_or(1260);
                let series = fetch_daily(&ctx, &config.ticker, period, &cancel).await?;
                let grid = params.json_opt("grid").ok_or_else(|| {
                    EngineError::InvalidArgument("walk_forward requires a grid".to_string())
                })?;
                let wf = WalkForwardConfig {
                    train_months: params.int_opt("train_months").unwrap_or(12).max(1) as u32,
                    test_months: params.int_opt("test_months").unwrap_or(3).max(1) as u32,
                    space: grid_space(grid)?,
                    metric: ScoreMetric::parse(params.str_opt("metric").unwrap_or("sharpe"))?,
                    seed: ctx.seed_for(
                        params.int_opt("seed").map(|v| v as u64),
                        &format!("walk_forward:{}", config.ticker),
                    ),
                };
                let report = run_walk_forward(&config, &series, None, &wf, &cancel)?;
                to_value(&report)
            })
        })
        .param(ParamSpec::required("ticker", ParamType::Str))
        .param(ParamSpec::required("strategy", ParamType::Str))
        .param(ParamSpec::optional("params", ParamType::Json))
        .param(ParamSpec::required("grid", ParamType::Json))
        .param(ParamSpec::with_default("train_months", ParamType::Int, ParamValue::Int(12)))
        .param(ParamSpec::with_default("test_months", ParamType::Int, ParamValue::Int(3)))
        .param(ParamSpec::with_default("period_days", ParamType::Int, ParamValue::Int(1260)))
        .param(ParamSpec::optional("initial_capital", ParamType::Float))
        .param(ParamSpec::optional("commission_bps", ParamType::Float))
        .param(ParamSpec::optional("slippage_bps", ParamType::Float))
        .param(ParamSpec::optional("position_size", ParamType::Float))
        .param(ParamSpec::with_default(
            "metric",
            ParamType::Str,
            ParamValue::Str("sharpe".to_string()),
        ))
        .param(ParamSpec::optional("seed", ParamType::Int))
        .timeout(600),
    )?;

    let store = backtest_store.clone();
    registry.register(
        "backtest",
        CapabilitySpec::new("load_run", move |_ctx, params, _cancel| {
            let store = store.clone();
            Box::pin(async move {
                let run = store.load_run(params.str("run_id")?).await?;
                to_value(&run)
            })
        })
        .param(ParamSpec::required("run_id", ParamType::Str)),
    )?;

    let store = backtest_store.clone();
    registry.register(
        "backtest",
        CapabilitySpec::new("list_runs", move |_ctx, params, _cancel| {
            let store = store.clone();
            Box::pin(async move {
                let runs = store
                    .list_runs(
                        params.str_opt("strategy"),
                        params.str_opt("ticker"),
                        params.int_opt("limit").unwrap_or(20),
                    )
                    .await?;
                to_value(&runs)
            })
        })
        .param(ParamSpec::optional("strategy", ParamType::Str))
        .param(ParamSpec::optional("ticker", ParamType::Str))
        .param(ParamSpec::with_default("limit", ParamType::Int, ParamValue::Int(20))),
    )?;

    // --- paper ---
    let trader = paper.clone();
    registry.register(
        "paper",
        CapabilitySpec::new("create", move |_ctx, params, _cancel| {
            let trader = trader.clone();
            Box::pin(async move {
                let record = trader
                    .create_portfolio(
                        params.str("name")?,
                        params.float_opt("initial_cash").unwrap_or(100_000.0),
                    )
                    .await?;
                to_value(&record)
            })
        })
        .param(ParamSpec::required("name", ParamType::Str))
        .param(ParamSpec::with_default(
            "initial_cash",
            ParamType::Float,
            ParamValue::Float(100_000.0),
        )),
    )?;

    let trader = paper.clone();
    registry.register(
        "paper",
        CapabilitySpec::new("rebalance", move |ctx, params, cancel| {
            let trader = trader.clone();
            Box::pin(async move {
                let portfolio_id = params.str("portfolio_id")?.to_string();
                let tickers = params.tickers("tickers")?.to_vec();

                // Score the candidate universe first; names that cannot be
                // scored drop out rather than sinking the rebalance.
                let rating = RatingEngine::new();
                let mut candidates = Vec::with_capacity(tickers.len());
                for ticker in &tickers {
                    cancel.check()?;
                    match rating.score(&ctx, ticker, None, &cancel).await {
                        Ok(score) => candidates.push(ScoredCandidate {
                            ticker: score.ticker.clone(),
                            composite: score.composite,
                        }),
                        Err(err) => {
                            tracing::warn!("cannot score {ticker} for rebalance: {err}");
                        }
                    }
                }

                let report = trader
                    .rebalance(
                        &ctx,
                        &portfolio_id,
                        &candidates,
                        params.str_opt("client_request_id"),
                        &cancel,
                    )
                    .await?;
                to_value(&report)
            })
        })
        .param(ParamSpec::required("portfolio_id", ParamType::Str))
        .param(ParamSpec::required("tickers", ParamType::TickerList))
        .param(ParamSpec::optional("client_request_id", ParamType::Str))
        .timeout(300),
    )?;

    let trader = paper.clone();
    registry.register(
        "paper",
        CapabilitySpec::new("status", move |_ctx, params, _cancel| {
            let trader = trader.clone();
            Box::pin(async move {
                let id = params.str("portfolio_id")?;
                let state = trader.store().load_portfolio(id).await?;
                let trades = trader.store().trade_log(id).await?;
                let equity = trader.store().equity_history(id).await?;
                Ok(json!({
                    "portfolio": to_value(&state.portfolio)?,
                    "positions": to_value(&state.positions)?,
                    "trades": to_value(&trades)?,
                    "equity_history": to_value(&equity)?,
                }))
            })
        })
        .param(ParamSpec::required("portfolio_id", ParamType::Str)),
    )?;

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use engine_core::RuntimeConfig;
    use market_data::{MarketDataService, StubProvider};
    use paper_trader::{PaperStore, RebalanceSettings};

    async fn dispatcher() -> Dispatcher {
        let backtest_store = BacktestStore::new("sqlite::memory:").await.unwrap();
        let paper_store = PaperStore::new("sqlite::memory:").await.unwrap();
        let paper = Arc::new(PaperTrader::new(paper_store, RebalanceSettings::default()));
        let registry = build_registry(backtest_store, paper).unwrap();
        let config = RuntimeConfig::default();
        let fetcher =
            MarketDataService::new(&config).with_provider(Arc::new(StubProvider::new()));
        let ctx = RuntimeContext::new(Arc::new(fetcher), config);
        Dispatcher::new(registry, ctx)
    }

    fn args(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn monte_carlo_run_is_reproducible_and_shaped() {
        let d = dispatcher().await;
        let request = args(json!({
            "ticker": "AAPL", "paths": 2000, "horizon_days": 30, "seed": 42
        }));
        let first = d.invoke("monte_carlo", "run", &request).await;
        assert!(first.ok, "{:?}", first.error);
        let data = first.data.unwrap();

        let p5 = data["terminal"]["p5"].as_f64().unwrap();
        let p50 = data["terminal"]["p50"].as_f64().unwrap();
        let p95 = data["terminal"]["p95"].as_f64().unwrap();
        assert!(p5 <= p50 && p50 <= p95);
        let prob = data["probability_profit"].as_f64().unwrap();
        assert!((0.0..=1.0).contains(&prob));

        // Same seed, same cache state: byte-equal data.
        let second = d.invoke("monte_carlo", "run", &request).await;
        assert_eq!(data, second.data.unwrap());
        assert!(second.meta.unwrap().cached);
    }

    #[tokio::test]
    async fn cointegration_contract_holds() {
        let d = dispatcher().await;
        let result = d
            .invoke(
                "cointegration",
                "run",
                &args(json!({"ticker_a": "KO", "ticker_b": "PEP", "lookback": 252})),
            )
            .await;
        assert!(result.ok, "{:?}", result.error);
        let data = result.data.unwrap();
        assert!(data["cointegrated"].is_boolean());
        assert!(data["p_value"].is_number());
        assert!(data["hedge_ratio"].is_number());
        let signal = data["signal"].as_str().unwrap();
        if data["p_value"].as_f64().unwrap() >= 0.05 {
            assert_eq!(signal, "NO_TRADE");
        }
        assert!(["LONG_SPREAD", "SHORT_SPREAD", "HOLD", "CLOSE", "NO_TRADE"].contains(&signal));
    }

    #[tokio::test]
    async fn correlation_scan_caps_results_and_filters_by_thresholds() {
        let d = dispatcher().await;
        let result = d
            .invoke(
                "correlation_anomaly",
                "scan",
                &args(json!({"tickers": "SPY,TLT,GLD,QQQ,IWM", "lookback": 252})),
            )
            .await;
        assert!(result.ok, "{:?}", result.error);
        let anomalies = result.data.unwrap();
        let list = anomalies.as_array().unwrap();
        assert!(list.len() <= 10);
        for pair in list {
            assert!(pair["z_score"].as_f64().unwrap().abs() > 2.0);
            assert_ne!(pair["severity"].as_str().unwrap(), "NORMAL");
        }
    }

    #[tokio::test]
    async fn backtest_run_persists_and_reports_annualized_metrics() {
        let d = dispatcher().await;
        let result = d
            .invoke(
                "backtest",
                "run",
                &args(json!({
                    "ticker": "AAPL",
                    "strategy": "sma_cross",
                    "params": {"fast": 10, "slow": 30},
                    "period_days": 252
                })),
            )
            .await;
        assert!(result.ok, "{:?}", result.error);
        let data = result.data.unwrap();
        let curve_len = data["equity_curve"].as_array().unwrap().len();
        assert!(curve_len > 200, "curve has {curve_len} points");
        let run_id = data["id"].as_str().unwrap().to_string();

        let loaded = d
            .invoke("backtest", "load_run", &args(json!({"run_id": run_id})))
            .await;
        assert!(loaded.ok, "{:?}", loaded.error);
    }

    #[tokio::test]
    async fn paper_lifecycle_create_rebalance_status() {
        let d = dispatcher().await;
        let created = d
            .invoke(
                "paper",
                "create",
                &args(json!({"name": "demo", "initial_cash": 100000.0})),
            )
            .await;
        assert!(created.ok, "{:?}", created.error);
        let id = created.data.unwrap()["id"].as_str().unwrap().to_string();

        let rebalanced = d
            .invoke(
                "paper",
                "rebalance",
                &args(json!({
                    "portfolio_id": id,
                    "tickers": "AAPL,MSFT,NVDA,GOOG,AMZN,META"
                })),
            )
            .await;
        assert!(rebalanced.ok, "{:?}", rebalanced.error);
        let report = rebalanced.data.unwrap();
        assert!(report["cash_after"].as_f64().unwrap() >= 0.0);

        let status = d
            .invoke("paper", "status", &args(json!({"portfolio_id": id})))
            .await;
        assert!(status.ok);
        let data = status.data.unwrap();
        assert!(data["positions"].as_array().unwrap().len() <= 6);
    }

    #[tokio::test]
    async fn unknown_parameter_is_rejected_before_any_work() {
        let d = dispatcher().await;
        let result = d
            .invoke(
                "monte_carlo",
                "run",
                &args(json!({"ticker": "AAPL", "pathz": 100})),
            )
            .await;
        assert!(!result.ok);
        let error = result.error.unwrap();
        assert_eq!(error.kind, "InvalidArgument");
        assert!(error.message.contains("pathz"));
    }
}
