use engine_core::PriceSeries;
use numeric_kit::{alpha_beta, mean_std, sharpe_ratio, simple_returns, sortino_ratio};

use crate::models::{EquityPoint, MonthlyReturn, RunMetrics, TradeRecord};

use chrono::Datelike;

/// Metric suite over a finished simulation. Ratios with an empty
/// denominator come back as None, never as 0/0.
pub fn compute_metrics(
    equity_curve: &[EquityPoint],
    trades: &[TradeRecord],
    initial_capital: f64,
    exposed_bars: usize,
    total_bars: usize,
    benchmark: Option<&PriceSeries>,
) -> RunMetrics {
    let final_equity = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(initial_capital);
    let total_return_pct = if initial_capital > 0.0 {
        (final_equity / initial_capital - 1.0) * 100.0
    } else {
        0.0
    };

    // Annualized growth from the covered calendar span.
    let cagr_pct = match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) if final_equity > 0.0 && initial_capital > 0.0 => {
            let days = (last.timestamp - first.timestamp).num_days();
            if days >= 30 {
                let years = days as f64 / 365.25;
                Some(((final_equity / initial_capital).powf(1.0 / years) - 1.0) * 100.0)
            } else {
                None
            }
        }
        _ => None,
    };

    let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let bar_returns = simple_returns(&equity);
    let sharpe = sharpe_ratio(&bar_returns, 0.0);
    let sortino = sortino_ratio(&bar_returns, 0.0);

    let (max_drawdown_pct, max_drawdown_bars) = drawdown_profile(equity_curve);
    let calmar = match (cagr_pct, max_drawdown_pct) {
        (Some(cagr), dd) if dd > 0.0 => Some(cagr / dd),
        _ => None,
    };

    let closed: Vec<&TradeRecord> = trades.iter().filter(|t| t.pnl.is_some()).collect();
    let pnls: Vec<f64> = closed.iter().filter_map(|t| t.pnl).collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

    let win_rate = if pnls.is_empty() {
        None
    } else {
        Some(wins.len() as f64 / pnls.len() as f64 * 100.0)
    };
    let average_win = if wins.is_empty() {
        None
    } else {
        Some(wins.iter().sum::<f64>() / wins.len() as f64)
    };
    let average_loss = if losses.is_empty() {
        None
    } else {
        Some(losses.iter().sum::<f64>() / losses.len() as f64)
    };
    let gross_loss: f64 = losses.iter().map(|l| l.abs()).sum();
    let profit_factor = if pnls.is_empty() || gross_loss == 0.0 {
        None
    } else {
        Some(wins.iter().sum::<f64>() / gross_loss)
    };

    let (max_consecutive_wins, max_consecutive_losses) = streaks(&pnls);

    let holding: Vec<f64> = closed
        .iter()
        .filter_map(|t| t.holding_bars)
        .map(f64::from)
        .collect();
    let avg_holding_bars = if holding.is_empty() {
        None
    } else {
        Some(holding.iter().sum::<f64>() / holding.len() as f64)
    };

    let (alpha, beta, information_ratio) = benchmark
        .map(|b| relative_metrics(&bar_returns, b))
        .unwrap_or((None, None, None));

    RunMetrics {
        total_return_pct,
        cagr_pct,
        sharpe,
        sortino,
        calmar,
        max_drawdown_pct,
        max_drawdown_bars,
        win_rate,
        average_win,
        average_loss,
        profit_factor,
        num_trades: closed.len() as u32,
        avg_holding_bars,
        exposure: if total_bars > 0 {
            exposed_bars as f64 / total_bars as f64
        } else {
            0.0
        },
        max_consecutive_wins,
        max_consecutive_losses,
        alpha,
        beta,
        information_ratio,
        monthly_returns: monthly_grid(equity_curve),
    }
}

/// Deepest drawdown and the longest stretch of bars spent under a prior
/// peak.
fn drawdown_profile(curve: &[EquityPoint]) -> (f64, u32) {
    let mut max_dd = 0.0_f64;
    let mut longest = 0u32;
    let mut current = 0u32;
    for point in curve {
        if point.drawdown_pct > 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
        max_dd = max_dd.max(point.drawdown_pct);
    }
    (max_dd, longest)
}

fn streaks(pnls: &[f64]) -> (u32, u32) {
    let mut max_wins = 0u32;
    let mut max_losses = 0u32;
    let mut wins = 0u32;
    let mut losses = 0u32;
    for pnl in pnls {
        if *pnl > 0.0 {
            wins += 1;
            losses = 0;
        } else {
            losses += 1;
            wins = 0;
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

/// Alpha (annualized %), beta and information ratio against a benchmark
/// price series, aligned from the end.
fn relative_metrics(
    bar_returns: &[f64],
    benchmark: &PriceSeries,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let bench_returns = simple_returns(&benchmark.closes());
    let n = bar_returns.len().min(bench_returns.len());
    if n < 2 {
        return (None, None, None);
    }
    let r = &bar_returns[bar_returns.len() - n..];
    let b = &bench_returns[bench_returns.len() - n..];

    let (alpha_daily, beta) = match alpha_beta(r, b) {
        Some(pair) => pair,
        None => return (None, None, None),
    };

    let excess: Vec<f64> = r.iter().zip(b.iter()).map(|(x, y)| x - y).collect();
    let information_ratio = mean_std(&excess).and_then(|(mean, std)| {
        if std > numeric_kit::EPSILON {
            Some(mean / std * 252.0_f64.sqrt())
        } else {
            None
        }
    });

    (
        Some(alpha_daily * 252.0 * 100.0),
        Some(beta),
        information_ratio,
    )
}

/// Calendar-month return grid from the equity curve.
fn monthly_grid(curve: &[EquityPoint]) -> Vec<MonthlyReturn> {
    let mut out: Vec<MonthlyReturn> = Vec::new();
    let mut month_open: Option<(i32, u32, f64)> = None;
    let mut last_equity = 0.0;

    for point in curve {
        let (year, month) = (point.timestamp.year(), point.timestamp.month());
        match month_open {
            Some((y, m, _)) if y == year && m == month => {}
            Some((y, m, open)) => {
                if open > 0.0 {
                    out.push(MonthlyReturn {
                        year: y,
                        month: m,
                        return_pct: (last_equity / open - 1.0) * 100.0,
                    });
                }
                month_open = Some((year, month, last_equity));
            }
            None => month_open = Some((year, month, point.equity)),
        }
        last_equity = point.equity;
    }
    if let Some((y, m, open)) = month_open {
        if open > 0.0 {
            out.push(MonthlyReturn {
                year: y,
                month: m,
                return_pct: (last_equity / open - 1.0) * 100.0,
            });
        }
    }
    out
}
