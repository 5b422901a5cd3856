use dashmap::DashMap;
use engine_core::{CancelToken, EngineResult, RuntimeConfig, RuntimeContext};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{
    EquitySnapshot, PaperTrade, PortfolioRecord, PortfolioState, PositionRecord, RebalanceReport,
    ScoredCandidate,
};
use crate::store::PaperStore;

/// Rebalance rule parameters.
#[derive(Debug, Clone)]
pub struct RebalanceSettings {
    /// Target allocation per name.
    pub target_weight: f64,
    /// Top-N cut of the scored universe.
    pub max_positions: usize,
    /// Minimum composite score to be considered (2.8 = "Buy" boundary).
    pub min_composite: f64,
    pub stop_loss_pct: f64,
    /// Gain thresholds over avg cost at which the position pyramids 50%.
    pub pyramid_levels: Vec<f64>,
    pub slippage_bps: f64,
    pub crypto_commission_bps: f64,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            target_weight: 0.15,
            max_positions: 6,
            min_composite: 2.8,
            stop_loss_pct: 0.15,
            pyramid_levels: vec![0.15, 0.30],
            slippage_bps: 5.0,
            crypto_commission_bps: 10.0,
        }
    }
}

impl RebalanceSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            stop_loss_pct: config.paper_stop_loss_pct,
            pyramid_levels: config.paper_pyramid_levels.clone(),
            ..Self::default()
        }
    }
}

/// Crypto tickers carry a dash suffix (BTC-USD); they pay commission,
/// equities trade free.
fn is_crypto(ticker: &str) -> bool {
    ticker.contains('-')
}

/// Paper trading engine. Writes to one portfolio are serialized through a
/// per-portfolio async mutex; rebalances on distinct portfolios run in
/// parallel.
pub struct PaperTrader {
    store: PaperStore,
    settings: RebalanceSettings,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PaperTrader {
    pub fn new(store: PaperStore, settings: RebalanceSettings) -> Self {
        Self {
            store,
            settings,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &PaperStore {
        &self.store
    }

    pub async fn create_portfolio(
        &self,
        name: &str,
        initial_cash: f64,
    ) -> EngineResult<PortfolioRecord> {
        self.store.create_portfolio(name, initial_cash).await
    }

    fn lock_for(&self, portfolio_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(portfolio_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one rebalance against live quotes. Stop-loss fires first,
    /// unconditionally; then the scored top-N reshapes the book; retained
    /// winners pyramid. Everything persists in a single transaction.
    pub async fn rebalance(
        &self,
        ctx: &RuntimeContext,
        portfolio_id: &str,
        candidates: &[ScoredCandidate],
        client_request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> EngineResult<RebalanceReport> {
        if let Some(req_id) = client_request_id {
            if let Some(report) = self.store.replayed_rebalance(req_id).await? {
                tracing::info!("rebalance replay for request {req_id}");
                return Ok(report);
            }
        }

        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        // A queued duplicate may have committed while we waited.
        if let Some(req_id) = client_request_id {
            if let Some(report) = self.store.replayed_rebalance(req_id).await? {
                return Ok(report);
            }
        }

        let mut state = self.store.load_portfolio(portfolio_id).await?;
        let s = &self.settings;
        let slip = s.slippage_bps / 10_000.0;
        let now = ctx.clock.now();

        // Eligible universe: score floor, best first, ticker as tie-break.
        let mut eligible: Vec<&ScoredCandidate> = candidates
            .iter()
            .filter(|c| c.composite >= s.min_composite)
            .collect();
        eligible.sort_by(|a, b| {
            b.composite
                .partial_cmp(&a.composite)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.ticker.cmp(&b.ticker))
        });
        eligible.truncate(s.max_positions);

        // Quotes for everything we may touch.
        let mut marks: HashMap<String, f64> = HashMap::new();
        let mut skipped: Vec<(String, String)> = Vec::new();
        let quote_targets: Vec<String> = state
            .positions
            .iter()
            .map(|p| p.ticker.clone())
            .chain(eligible.iter().map(|c| c.ticker.clone()))
            .collect();
        for ticker in quote_targets {
            if marks.contains_key(&ticker) {
                continue;
            }
            cancel.check()?;
            match ctx.fetcher.quote(&ticker, cancel).await {
                Ok(q) => {
                    marks.insert(ticker, q.last);
                }
                Err(err) => {
                    tracing::warn!("no quote for {ticker}: {err}");
                    skipped.push((ticker, format!("no quote: {}", err.kind())));
                }
            }
        }

        let mark_of = |pos: &PositionRecord, marks: &HashMap<String, f64>| -> f64 {
            marks.get(&pos.ticker).copied().unwrap_or(pos.avg_cost)
        };
        let equity_before = state.portfolio.cash
            + state
                .positions
                .iter()
                .map(|p| p.qty * mark_of(p, &marks))
                .sum::<f64>();

        let mut trades: Vec<PaperTrade> = Vec::new();
        let mut stop_losses = 0usize;

        // 1. Stop-loss pass, before anything else.
        let mut survivors: Vec<PositionRecord> = Vec::new();
        for pos in std::mem::take(&mut state.positions) {
            let mark = match marks.get(&pos.ticker) {
                Some(m) => *m,
                None => {
                    survivors.push(pos);
                    continue;
                }
            };
            if mark <= pos.avg_cost * (1.0 - s.stop_loss_pct) {
                stop_losses += 1;
                trades.push(Self::sell_all(&mut state.portfolio, &pos, mark, slip, s, "stop_loss", now));
            } else {
                survivors.push(pos);
            }
        }

        // 2. Exit holdings that fell out of the top-N.
        let keep: Vec<String> = eligible.iter().map(|c| c.ticker.clone()).collect();
        let mut retained: Vec<PositionRecord> = Vec::new();
        for pos in survivors {
            if keep.contains(&pos.ticker) {
                retained.push(pos);
            } else {
                match marks.get(&pos.ticker) {
                    Some(mark) => {
                        trades.push(Self::sell_all(
                            &mut state.portfolio,
                            &pos,
                            *mark,
                            slip,
                            s,
                            "rebalance_exit",
                            now,
                        ));
                    }
                    None => retained.push(pos), // unquotable, hold it
                }
            }
        }
        state.positions = retained;

        // Sizing base: equity after exits, marked at current quotes.
        let equity = state.portfolio.cash
            + state
                .positions
                .iter()
                .map(|p| p.qty * mark_of(p, &marks))
                .sum::<f64>();

        // 3. Enter new names, best score first; a name we cannot afford is
        //    skipped, the rest still get their chance.
        for candidate in &eligible {
            if state.positions.iter().any(|p| p.ticker == candidate.ticker) {
                continue;
            }
            let mark = match marks.get(&candidate.ticker) {
                Some(m) => *m,
                None => continue, // already recorded as skipped
            };
            let fill = mark * (1.0 + slip);
            if fill <= 0.0 {
                continue;
            }
            let qty = (s.target_weight * equity / fill).floor();
            if qty < 1.0 {
                skipped.push((candidate.ticker.clone(), "allocation under one share".to_string()));
                continue;
            }
            let commission = Self::commission(&candidate.ticker, fill * qty, s);
            let cost = fill * qty + commission;
            if cost > state.portfolio.cash {
                skipped.push((candidate.ticker.clone(), "insufficient cash".to_string()));
                continue;
            }
            state.portfolio.cash -= cost;
            state.positions.push(PositionRecord {
                portfolio_id: state.portfolio.id.clone(),
                ticker: candidate.ticker.clone(),
                qty,
                avg_cost: fill,
                pyramid_count: 0,
            });
            trades.push(PaperTrade {
                portfolio_id: state.portfolio.id.clone(),
                ticker: candidate.ticker.clone(),
                action: "buy".to_string(),
                qty,
                price: fill,
                commission,
                reason: "entry".to_string(),
                realized_pnl: None,
                executed_at: now,
            });
        }

        // 4. Pyramid retained winners: +50% of current size at each
        //    configured gain level, tracked per position.
        for pos in &mut state.positions {
            let mark = match marks.get(&pos.ticker) {
                Some(m) => *m,
                None => continue,
            };
            if pos.avg_cost <= 0.0 {
                continue;
            }
            // Levels are measured against the basis as of this pass, so a
            // 40% winner crosses both thresholds in one rebalance.
            let base_cost = pos.avg_cost;
            loop {
                let level = match s.pyramid_levels.get(pos.pyramid_count as usize) {
                    Some(l) => *l,
                    None => break,
                };
                let gain = mark / base_cost - 1.0;
                if gain < level {
                    break;
                }
                let add = (pos.qty * 0.5).floor();
                if add < 1.0 {
                    break;
                }
                let fill = mark * (1.0 + slip);
                let commission = Self::commission(&pos.ticker, fill * add, s);
                let cost = fill * add + commission;
                if cost > state.portfolio.cash {
                    skipped.push((pos.ticker.clone(), "pyramid: insufficient cash".to_string()));
                    break;
                }
                state.portfolio.cash -= cost;
                pos.avg_cost = (pos.avg_cost * pos.qty + fill * add) / (pos.qty + add);
                pos.qty += add;
                pos.pyramid_count += 1;
                trades.push(PaperTrade {
                    portfolio_id: state.portfolio.id.clone(),
                    ticker: pos.ticker.clone(),
                    action: "buy".to_string(),
                    qty: add,
                    price: fill,
                    commission,
                    reason: "pyramid".to_string(),
                    realized_pnl: None,
                    executed_at: now,
                });
            }
        }

        let equity_after = state.portfolio.cash
            + state
                .positions
                .iter()
                .map(|p| p.qty * mark_of(p, &marks))
                .sum::<f64>();

        let snapshot = EquitySnapshot {
            portfolio_id: state.portfolio.id.clone(),
            timestamp: now,
            equity: equity_after,
            cash: state.portfolio.cash,
        };
        let report = RebalanceReport {
            portfolio_id: state.portfolio.id.clone(),
            trades: trades.clone(),
            skipped,
            stop_losses_triggered: stop_losses,
            equity_before,
            equity_after,
            cash_after: state.portfolio.cash,
        };

        self.store
            .commit_rebalance(&state, &trades, &snapshot, &report, client_request_id)
            .await?;

        tracing::info!(
            portfolio = portfolio_id,
            trades = report.trades.len(),
            stop_losses,
            "rebalance committed: equity {:.2} -> {:.2}",
            equity_before,
            equity_after
        );
        Ok(report)
    }

    fn commission(ticker: &str, notional: f64, s: &RebalanceSettings) -> f64 {
        if is_crypto(ticker) {
            notional * s.crypto_commission_bps / 10_000.0
        } else {
            0.0
        }
    }

    fn sell_all(
        portfolio: &mut PortfolioRecord,
        pos: &PositionRecord,
        mark: f64,
        slip: f64,
        s: &RebalanceSettings,
        reason: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PaperTrade {
        let fill = mark * (1.0 - slip);
        let commission = Self::commission(&pos.ticker, fill * pos.qty, s);
        let proceeds = fill * pos.qty - commission;
        portfolio.cash += proceeds;
        PaperTrade {
            portfolio_id: portfolio.id.clone(),
            ticker: pos.ticker.clone(),
            action: "sell".to_string(),
            qty: pos.qty,
            price: fill,
            commission,
            reason: reason.to_string(),
            realized_pnl: Some((fill - pos.avg_cost) * pos.qty - commission),
            executed_at: now,
        }
    }
}
