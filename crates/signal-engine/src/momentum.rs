use engine_core::{CancelToken, EngineError, EngineResult, PriceSeries, RuntimeContext};
use numeric_kit::{rsi, sma, trailing_return};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Trading-day lookbacks for the momentum legs.
const THREE_MONTHS: usize = 63;
const SIX_MONTHS: usize = 126;
const TWELVE_MONTHS: usize = 252;
/// Most recent month excluded from the 12-month leg (reversal effect).
const SKIP_MONTH: usize = 21;

/// One ticker's momentum profile inside a ranked universe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumRank {
    pub ticker: String,
    pub rank: usize,
    /// Average of the available return legs.
    pub blended_score: f64,
    pub return_3m: Option<f64>,
    pub return_6m: Option<f64>,
    pub return_12m: Option<f64>,
    pub rsi_14: Option<f64>,
    pub above_200d_ma: Option<bool>,
    pub details: serde_json::Value,
}

/// Cross-sectional momentum: blend 3/6/12-month returns per ticker and rank
/// the universe.
pub struct MomentumEngine;

impl MomentumEngine {
    pub fn new() -> Self {
        Self
    }

    /// Momentum profile of one series; None when no leg has enough history.
    pub fn profile(&self, series: &PriceSeries) -> Option<MomentumProfile> {
        let closes = series.closes();
        let r3 = trailing_return(&closes, THREE_MONTHS);
        let r6 = trailing_return(&closes, SIX_MONTHS);
        // 12-month leg measured up to one month ago.
        let r12 = if closes.len() > TWELVE_MONTHS {
            let end = closes.len() - 1 - SKIP_MONTH;
            let start = closes.len() - 1 - TWELVE_MONTHS;
            let (past, recent) = (closes[start], closes[end]);
            if past != 0.0 {
                Some((recent - past) / past)
            } else {
                None
            }
        } else {
            None
        };

        let legs: Vec<f64> = [r3, r6, r12].iter().flatten().copied().collect();
        if legs.is_empty() {
            return None;
        }
        let blended = legs.iter().sum::<f64>() / legs.len() as f64;

        let rsi_14 = rsi(&closes, 14).ok().and_then(|v| v.last().copied());
        let ma_200 = sma(&closes, 200);
        let above_ma = match (ma_200.last(), closes.last()) {
            (Some(ma), Some(last)) => Some(last > ma),
            _ => None,
        };

        Some(MomentumProfile {
            blended,
            return_3m: r3,
            return_6m: r6,
            return_12m: r12,
            rsi_14,
            above_200d_ma: above_ma,
        })
    }

    /// Rank a universe by blended momentum, strongest first. Tickers with no
    /// usable history are reported in `details` of the result envelope by
    /// the caller; here they are simply skipped.
    pub fn rank_universe(&self, universe: &[PriceSeries]) -> EngineResult<Vec<MomentumRank>> {
        if universe.is_empty() {
            return Err(EngineError::InvalidArgument(
                "momentum ranking needs a non-empty universe".to_string(),
            ));
        }

        let mut scored: Vec<(String, MomentumProfile)> = Vec::new();
        for series in universe {
            match self.profile(series) {
                Some(profile) => scored.push((series.ticker.clone(), profile)),
                None => tracing::debug!("{} has no momentum history, skipping", series.ticker),
            }
        }
        if scored.is_empty() {
            return Err(EngineError::Degenerate(
                "no ticker in the universe had enough history".to_string(),
            ));
        }

        scored.sort_by(|x, y| {
            y.1.blended
                .partial_cmp(&x.1.blended)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.0.cmp(&y.0))
        });

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (ticker, p))| MomentumRank {
                ticker,
                rank: i + 1,
                blended_score: p.blended,
                return_3m: p.return_3m,
                return_6m: p.return_6m,
                return_12m: p.return_12m,
                rsi_14: p.rsi_14,
                above_200d_ma: p.above_200d_ma,
                details: json!({
                    "legs_available": [p.return_3m.is_some(), p.return_6m.is_some(), p.return_12m.is_some()],
                }),
            })
            .collect())
    }

    pub async fn scan(
        &self,
        ctx: &RuntimeContext,
        tickers: &[String],
        cancel: &CancelToken,
    ) -> EngineResult<Vec<MomentumRank>> {
        let universe =
            crate::correlation::fetch_universe(ctx, tickers, TWELVE_MONTHS + SKIP_MONTH, cancel)
                .await?;
        self.rank_universe(&universe)
    }
}

impl Default for MomentumEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Intermediate per-ticker momentum numbers.
pub struct MomentumProfile {
    pub blended: f64,
    pub return_3m: Option<f64>,
    pub return_6m: Option<f64>,
    pub return_12m: Option<f64>,
    pub rsi_14: Option<f64>,
    pub above_200d_ma: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engine_core::{Bar, Interval};

    fn series(ticker: &str, closes: Vec<f64>) -> PriceSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.timestamp_opt(1_600_000_000 + i as i64 * 86_400, 0).unwrap(),
                open: c,
                high: c,
                low: c,
                close: c,
                adj_close: None,
                volume: 1.0,
            })
            .collect();
        PriceSeries {
            ticker: ticker.to_string(),
            interval: Interval::Day,
            bars,
        }
    }

    #[test]
    fn winners_rank_above_losers() {
        let up = series("UP", (0..300).map(|i| 100.0 * 1.002_f64.powi(i)).collect());
        let down = series("DN", (0..300).map(|i| 100.0 * 0.999_f64.powi(i)).collect());
        let flat = series("FL", vec![100.0; 300]);

        let ranks = MomentumEngine::new().rank_universe(&[down, flat, up]).unwrap();
        assert_eq!(ranks[0].ticker, "UP");
        assert_eq!(ranks[2].ticker, "DN");
        assert_eq!(ranks[0].rank, 1);
        assert!(ranks[0].blended_score > ranks[2].blended_score);
    }

    #[test]
    fn short_history_uses_available_legs_only() {
        // 80 bars: only the 3-month leg is computable.
        let s = series("NEW", (0..80).map(|i| 50.0 + i as f64 * 0.1).collect());
        let profile = MomentumEngine::new().profile(&s).unwrap();
        assert!(profile.return_3m.is_some());
        assert!(profile.return_6m.is_none());
        assert!(profile.return_12m.is_none());
    }

    #[test]
    fn too_short_universe_is_degenerate() {
        let s = series("TINY", vec![10.0; 5]);
        let err = MomentumEngine::new().rank_universe(&[s]).unwrap_err();
        assert_eq!(err.kind(), "Degenerate");
    }

    #[test]
    fn skip_month_excludes_latest_crash() {
        // Strong year-long rally, then a crash in the final month. The
        // 12-month leg should still be strongly positive.
        let mut closes: Vec<f64> = (0..280).map(|i| 100.0 * 1.003_f64.powi(i)).collect();
        let peak = *closes.last().unwrap();
        for i in 0..21 {
            closes.push(peak * (1.0 - 0.02 * (i + 1) as f64));
        }
        let profile = MomentumEngine::new().profile(&series("CRSH", closes)).unwrap();
        assert!(profile.return_12m.unwrap() > 0.5);
        assert!(profile.return_3m.unwrap() < profile.return_12m.unwrap());
    }
}
