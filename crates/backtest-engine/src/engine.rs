use chrono::{DateTime, Utc};
use engine_core::{Bar, CancelToken, EngineError, EngineResult, PriceSeries};
use uuid::Uuid;

use crate::metrics::compute_metrics;
use crate::models::{BacktestConfig, BacktestRun, EquityPoint, TradeRecord, TradeSide};
use crate::strategy::{make_strategy, Action, StrategyContext};

/// Bar-by-bar simulator. Signals form on closed bars and fill at the next
/// bar's open (close-fill configurable); commission and slippage apply to
/// every fill; no partial fills. A sell while flat opens a short and a buy
/// covers it; slippage is directional (buys fill higher, sells fill lower)
/// on entries and exits alike.
pub struct SimulationEngine {
    config: BacktestConfig,
}

struct OpenPosition {
    entry_time: DateTime<Utc>,
    entry_bar: usize,
    entry_price: f64,
    entry_commission: f64,
    side: TradeSide,
    /// Always positive; direction lives in `side`.
    qty: f64,
}

impl OpenPosition {
    /// Quantity as strategies see it: negative when short.
    fn signed_qty(&self) -> f64 {
        match self.side {
            TradeSide::Long => self.qty,
            TradeSide::Short => -self.qty,
        }
    }
}

impl SimulationEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the configured strategy over `series`. The benchmark, when
    /// supplied, feeds alpha/beta and information ratio.
    pub fn run(
        &self,
        series: &PriceSeries,
        benchmark: Option<&PriceSeries>,
        cancel: &CancelToken,
    ) -> EngineResult<BacktestRun> {
        let cfg = &self.config;
        if series.bars.len() < 2 {
            return Err(EngineError::Degenerate(format!(
                "backtest needs at least 2 bars, got {}",
                series.bars.len()
            )));
        }
        if !(0.0..=1.0).contains(&cfg.position_size) || cfg.position_size == 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "position_size must be in (0, 1], got {}",
                cfg.position_size
            )));
        }

        let mut strategy = make_strategy(&cfg.strategy_name, &cfg.params)?;
        let commission_rate = cfg.commission_bps / 10_000.0;
        let slippage_rate = cfg.slippage_bps / 10_000.0;

        let mut cash = cfg.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades: Vec<TradeRecord> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(series.bars.len());
        let mut peak_equity = cfg.initial_capital;
        let mut exposed_bars = 0usize;
        let mut pending: Option<Action> = None;

        strategy.initialize(&StrategyContext {
            bar_index: 0,
            position_qty: 0.0,
            cash,
            equity: cash,
        });

        for (i, bar) in series.bars.iter().enumerate() {
            cancel.check()?;

            // 1. Fill the action signalled on the previous close at this
            //    bar's open.
            if let Some(action) = pending.take() {
                self.execute(
                    action,
                    bar.open,
                    bar.timestamp,
                    i,
                    commission_rate,
                    slippage_rate,
                    &mut cash,
                    &mut position,
                    &mut trades,
                );
            }

            // 2. Strategy observes the closed bar.
            let signed = position.as_ref().map(|p| p.signed_qty()).unwrap_or(0.0);
            let ctx = StrategyContext {
                bar_index: i,
                position_qty: signed,
                cash,
                equity: cash + signed * bar.close,
            };
            let action = strategy.on_bar(bar, &ctx);

            // 3. Queue for the next open, or fill on this close.
            if cfg.close_fill {
                self.execute(
                    action,
                    bar.close,
                    bar.timestamp,
                    i,
                    commission_rate,
                    slippage_rate,
                    &mut cash,
                    &mut position,
                    &mut trades,
                );
            } else if action != Action::Hold {
                pending = Some(action);
            }

            // 4. Mark equity at the close. Short proceeds sit in cash, so
            //    the signed quantity nets out the cost to cover.
            let signed = position.as_ref().map(|p| p.signed_qty()).unwrap_or(0.0);
            if signed != 0.0 {
                exposed_bars += 1;
            }
            let equity = cash + signed * bar.close;
            if equity > peak_equity {
                peak_equity = equity;
            }
            let drawdown = if peak_equity > 0.0 {
                (peak_equity - equity) / peak_equity * 100.0
            } else {
                0.0
            };
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
                drawdown_pct: drawdown,
            });
        }

        // Force-close any open position at the final close so the run's
        // accounting balances.
        if let Some(pos) = position.take() {
            let last = &series.bars[series.bars.len() - 1];
            let trade = Self::close_trade(
                pos,
                last.close,
                last.timestamp,
                series.bars.len() - 1,
                commission_rate,
                slippage_rate,
                &mut cash,
                "end_of_data",
            );
            trades.push(trade);
            if let Some(point) = equity_curve.last_mut() {
                point.equity = cash;
            }
        }

        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(cash);
        let metrics = compute_metrics(
            &equity_curve,
            &trades,
            cfg.initial_capital,
            exposed_bars,
            series.bars.len(),
            benchmark,
        );

        tracing::info!(
            strategy = %cfg.strategy_name,
            ticker = %cfg.ticker,
            trades = trades.len(),
            "backtest finished: {:.2} -> {:.2}",
            cfg.initial_capital,
            final_equity
        );

        Ok(BacktestRun {
            id: Uuid::new_v4().to_string(),
            strategy_name: cfg.strategy_name.clone(),
            ticker: cfg.ticker.clone(),
            params: cfg.params.clone(),
            start_date: series.bars[0].timestamp,
            end_date: series.bars[series.bars.len() - 1].timestamp,
            created_at: Utc::now(),
            initial_capital: cfg.initial_capital,
            final_equity,
            trades,
            equity_curve,
            metrics,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &self,
        action: Action,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        bar_index: usize,
        commission_rate: f64,
        slippage_rate: f64,
        cash: &mut f64,
        position: &mut Option<OpenPosition>,
        trades: &mut Vec<TradeRecord>,
    ) {
        match action {
            Action::Buy { qty } => match position.take() {
                // Buy against a short covers it.
                Some(pos) if pos.side == TradeSide::Short => {
                    let trade = Self::close_trade(
                        pos,
                        raw_price,
                        timestamp,
                        bar_index,
                        commission_rate,
                        slippage_rate,
                        cash,
                        "signal",
                    );
                    trades.push(trade);
                }
                // Already long: no pyramiding in the basic engine.
                Some(pos) => *position = Some(pos),
                None => {
                    // Long entry buys the offer: fill slips up.
                    let fill = raw_price * (1.0 + slippage_rate);
                    if fill <= 0.0 {
                        return;
                    }
                    let budget = *cash * self.config.position_size;
                    let want = qty.unwrap_or(f64::MAX).min((budget / fill).floor());
                    if want < 1.0 {
                        return;
                    }
                    let commission = fill * want * commission_rate;
                    let cost = fill * want + commission;
                    if cost > *cash {
                        return;
                    }
                    *cash -= cost;
                    *position = Some(OpenPosition {
                        entry_time: timestamp,
                        entry_bar: bar_index,
                        entry_price: fill,
                        entry_commission: commission,
                        side: TradeSide::Long,
                        qty: want,
                    });
                }
            },
            Action::Sell { qty } => match position.take() {
                // A sell flattens the whole long.
                Some(pos) if pos.side == TradeSide::Long => {
                    let trade = Self::close_trade(
                        pos,
                        raw_price,
                        timestamp,
                        bar_index,
                        commission_rate,
                        slippage_rate,
                        cash,
                        "signal",
                    );
                    trades.push(trade);
                }
                // Already short: hold the position.
                Some(pos) => *position = Some(pos),
                None => {
                    // Short entry hits the bid: fill slips down. Proceeds
                    // land in cash; the signed mark nets them off until
                    // cover.
                    let fill = raw_price * (1.0 - slippage_rate);
                    if fill <= 0.0 {
                        return;
                    }
                    let budget = *cash * self.config.position_size;
                    let want = qty.unwrap_or(f64::MAX).min((budget / fill).floor());
                    if want < 1.0 {
                        return;
                    }
                    let commission = fill * want * commission_rate;
                    *cash += fill * want - commission;
                    *position = Some(OpenPosition {
                        entry_time: timestamp,
                        entry_bar: bar_index,
                        entry_price: fill,
                        entry_commission: commission,
                        side: TradeSide::Short,
                        qty: want,
                    });
                }
            },
            Action::Hold => {}
        }
    }

    /// Close either side: a long exits on a sell (fill slips down), a short
    /// covers on a buy (fill slips up). PnL is net of both legs' costs.
    #[allow(clippy::too_many_arguments)]
    fn close_trade(
        pos: OpenPosition,
        raw_price: f64,
        timestamp: DateTime<Utc>,
        bar_index: usize,
        commission_rate: f64,
        slippage_rate: f64,
        cash: &mut f64,
        reason: &str,
    ) -> TradeRecord {
        let fill = match pos.side {
            TradeSide::Long => raw_price * (1.0 - slippage_rate),
            TradeSide::Short => raw_price * (1.0 + slippage_rate),
        };
        let commission = fill * pos.qty * commission_rate;
        let entry_notional = pos.entry_price * pos.qty;

        let pnl = match pos.side {
            TradeSide::Long => {
                *cash += fill * pos.qty - commission;
                (fill * pos.qty - commission) - (entry_notional + pos.entry_commission)
            }
            TradeSide::Short => {
                *cash -= fill * pos.qty + commission;
                (entry_notional - pos.entry_commission) - (fill * pos.qty + commission)
            }
        };
        let basis = entry_notional + pos.entry_commission;

        TradeRecord {
            run_id: None,
            entry_time: pos.entry_time,
            exit_time: Some(timestamp),
            side: pos.side,
            qty: pos.qty,
            entry_price: pos.entry_price,
            exit_price: Some(fill),
            pnl: Some(pnl),
            return_pct: if basis > 0.0 {
                Some(pnl / basis * 100.0)
            } else {
                None
            },
            exit_reason: Some(reason.to_string()),
            holding_bars: Some(bar_index.saturating_sub(pos.entry_bar) as u32),
        }
    }
}
