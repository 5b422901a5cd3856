use engine_core::{CancelToken, EngineError, EngineResult, Interval, PriceSeries, RuntimeContext};
use numeric_kit::{adf_test, half_life_of_mean_reversion, mean_std, ols, z_score};
use serde::{Deserialize, Serialize};

/// Trading signal derived from the spread z-score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadSignal {
    LongSpread,
    ShortSpread,
    Close,
    Hold,
    NoTrade,
}

/// Engle-Granger test output for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CointegrationReport {
    pub ticker_a: String,
    pub ticker_b: String,
    pub cointegrated: bool,
    pub p_value: f64,
    pub hedge_ratio: f64,
    pub half_life_days: Option<f64>,
    pub current_z_score: f64,
    pub signal: SpreadSignal,
    pub lookback: usize,
}

pub struct CointegrationEngine {
    lookback: usize,
    /// p-value at or above this means not cointegrated.
    significance: f64,
}

impl CointegrationEngine {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            significance: 0.05,
        }
    }

    /// Two-step Engle-Granger: hedge ratio from OLS of a on b, then an ADF
    /// stationarity test on the residual spread.
    pub fn engle_granger(
        &self,
        a: &PriceSeries,
        b: &PriceSeries,
    ) -> EngineResult<CointegrationReport> {
        let ca = a.closes();
        let cb = b.closes();
        let n = ca.len().min(cb.len()).min(self.lookback);
        if n < 30 {
            return Err(EngineError::Degenerate(format!(
                "cointegration needs at least 30 overlapping bars, got {n}"
            )));
        }
        let pa = &ca[ca.len() - n..];
        let pb = &cb[cb.len() - n..];

        // Step 1: a = α + β·b + ε
        let intercept = vec![1.0; n];
        let fit = ols(pa, &[intercept, pb.to_vec()])?;
        let hedge_ratio = fit.coefficients[1];
        let spread: Vec<f64> = fit.residuals;

        // Step 2: unit-root test on the spread.
        let adf = adf_test(&spread)?;
        let cointegrated = adf.p_value < self.significance;

        let (spread_mean, spread_std) = mean_std(&spread).ok_or_else(|| {
            EngineError::Degenerate("spread too short for statistics".to_string())
        })?;
        let current = *spread
            .last()
            .ok_or_else(|| EngineError::Degenerate("empty spread".to_string()))?;
        let current_z = z_score(current, spread_mean, spread_std).ok_or_else(|| {
            EngineError::Degenerate("spread has zero variance".to_string())
        })?;

        let signal = if !cointegrated {
            SpreadSignal::NoTrade
        } else if current_z < -2.0 {
            SpreadSignal::LongSpread
        } else if current_z > 2.0 {
            SpreadSignal::ShortSpread
        } else if current_z.abs() < 0.5 {
            SpreadSignal::Close
        } else {
            SpreadSignal::Hold
        };

        Ok(CointegrationReport {
            ticker_a: a.ticker.clone(),
            ticker_b: b.ticker.clone(),
            cointegrated,
            p_value: adf.p_value,
            hedge_ratio,
            half_life_days: half_life_of_mean_reversion(&spread),
            current_z_score: current_z,
            signal,
            lookback: n,
        })
    }

    /// Fetch both legs and run the test.
    pub async fn test_pair(
        &self,
        ctx: &RuntimeContext,
        ticker_a: &str,
        ticker_b: &str,
        cancel: &CancelToken,
    ) -> EngineResult<CointegrationReport> {
        let days = (self.lookback as i64 * 7) / 5 + 30;
        cancel.check()?;
        let a = ctx
            .fetcher
            .price_history(ticker_a, Interval::Day, days, cancel)
            .await?;
        cancel.check()?;
        let b = ctx
            .fetcher
            .price_history(ticker_b, Interval::Day, days, cancel)
            .await?;
        self.engle_granger(&a, &b)
    }
}

impl Default for CointegrationEngine {
    fn default() -> Self {
        Self::new(252)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use engine_core::Bar;

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

    /// b is a random-walk-ish wave; a = 2b + a strongly mean-reverting
    /// residual, so the pair is cointegrated with β ≈ 2.
    fn cointegrated_pair() -> (PriceSeries, PriceSeries) {
        let mut b = Vec::new();
        let mut a = Vec::new();
        let mut level: f64 = 50.0;
        let mut resid: f64 = 0.0;
        for i in 0..260 {
            level += (i as f64 * 0.9).sin() * 0.8;
            resid = 0.3 * resid + (i as f64 * 2.3).sin() * 1.5;
            b.push(level);
            a.push(2.0 * level + resid + 5.0);
        }
        (series("KO", a), series("PEP", b))
    }

    #[test]
    fn cointegrated_pair_recovers_hedge_ratio() {
        let (a, b) = cointegrated_pair();
        let report = CointegrationEngine::default().engle_granger(&a, &b).unwrap();
        assert!(report.cointegrated, "p={}", report.p_value);
        assert!((report.hedge_ratio - 2.0).abs() < 0.2, "beta={}", report.hedge_ratio);
        assert!(report.half_life_days.is_some());
    }

    #[test]
    fn non_cointegrated_pair_signals_no_trade() {
        // Two diverging trends: the residual inherits a trend and fails ADF.
        let a = series("AAA", (0..260).map(|i| 100.0 + (i as f64).powf(1.3) * 0.05).collect());
        let b = series("BBB", (0..260).map(|i| 50.0 + i as f64 * 0.02).collect());
        let report = CointegrationEngine::default().engle_granger(&a, &b).unwrap();
        if !report.cointegrated {
            assert_eq!(report.signal, SpreadSignal::NoTrade);
        }
    }

    #[test]
    fn signal_map_matches_z_bands() {
        let (a, b) = cointegrated_pair();
        let report = CointegrationEngine::default().engle_granger(&a, &b).unwrap();
        let z = report.current_z_score;
        let expected = if z < -2.0 {
            SpreadSignal::LongSpread
        } else if z > 2.0 {
            SpreadSignal::ShortSpread
        } else if z.abs() < 0.5 {
            SpreadSignal::Close
        } else {
            SpreadSignal::Hold
        };
        assert_eq!(report.signal, expected);
    }

    #[test]
    fn short_series_is_degenerate() {
        let a = series("AAA", vec![1.0, 2.0, 3.0]);
        let b = series("BBB", vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            CointegrationEngine::default().engle_granger(&a, &b),
            Err(EngineError::Degenerate(_))
        ));
    }
}
