use engine_core::{
    CancelToken, CorrelationDirection, CorrelationPair, EngineError, EngineResult, Interval,
    PriceSeries, RuntimeContext, Severity,
};
use numeric_kit::{correlation, mean_std, rolling_correlation, simple_returns, z_score};
use serde::{Deserialize, Serialize};

/// Window and threshold settings for correlation analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationSettings {
    pub window_short: usize,
    pub window_long: usize,
    pub lookback: usize,
    /// |z| above this marks a candidate anomaly.
    pub anomaly_z: f64,
    /// |current − long-window corr| above this confirms the anomaly.
    pub change_threshold: f64,
    /// |change| above this upgrades severity to High.
    pub high_change_threshold: f64,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            window_short: 20,
            window_long: 60,
            lookback: 252,
            anomaly_z: 2.0,
            change_threshold: 0.3,
            high_change_threshold: 0.5,
        }
    }
}

/// Correlation regime of a universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrelationRegime {
    HighCorrelation,
    Normal,
    Low,
    Decorrelated,
}

impl CorrelationRegime {
    fn from_average(avg: f64) -> Self {
        if avg > 0.7 {
            CorrelationRegime::HighCorrelation
        } else if avg >= 0.4 {
            CorrelationRegime::Normal
        } else if avg >= 0.1 {
            CorrelationRegime::Low
        } else {
            CorrelationRegime::Decorrelated
        }
    }
}

/// Universe-level regime classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReport {
    pub tickers: Vec<String>,
    pub average_pairwise_correlation: f64,
    pub regime: CorrelationRegime,
    pub pair_count: usize,
}

/// Pairs-arbitrage signal combining correlation and price-ratio dislocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairsSignal {
    pub ticker_a: String,
    pub ticker_b: String,
    pub historical_correlation: f64,
    pub correlation_z: f64,
    pub price_ratio_z: f64,
    pub combined_z: f64,
    pub actionable: bool,
    pub high_confidence: bool,
    /// long_a_short_b when the ratio is depressed, short_a_long_b when rich.
    pub direction: String,
}

pub struct CorrelationEngine {
    settings: CorrelationSettings,
}

impl CorrelationEngine {
    pub fn new(settings: CorrelationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CorrelationSettings {
        &self.settings
    }

    /// Rolling short-vs-long correlation comparison for one pair. Severity
    /// Normal means no anomaly; Medium and High are emitted per the z and
    /// change thresholds.
    pub fn detect_breakdown(
        &self,
        a: &PriceSeries,
        b: &PriceSeries,
    ) -> EngineResult<CorrelationPair> {
        let s = &self.settings;
        let (ra, rb) = aligned_returns(a, b, s.lookback)?;
        if ra.len() < s.window_long + 2 {
            return Err(EngineError::Degenerate(format!(
                "correlation breakdown needs {} aligned returns, got {}",
                s.window_long + 2,
                ra.len()
            )));
        }

        let short_series: Vec<f64> = rolling_correlation(&ra, &rb, s.window_short)
            .into_iter()
            .flatten()
            .collect();
        if short_series.len() < 3 {
            return Err(EngineError::Degenerate(
                "short-window correlation series collapsed (constant inputs)".to_string(),
            ));
        }
        let current = short_series[short_series.len() - 1];

        let long_current = correlation(
            &ra[ra.len() - s.window_long..],
            &rb[rb.len() - s.window_long..],
        )
        .ok_or_else(|| {
            EngineError::Degenerate("long-window correlation undefined (zero variance)".to_string())
        })?;

        let history = &short_series[..short_series.len() - 1];
        let (hist_mean, hist_std) = mean_std(history).ok_or_else(|| {
            EngineError::Degenerate("not enough correlation history".to_string())
        })?;
        let z = z_score(current, hist_mean, hist_std).unwrap_or(0.0);

        let change = current - long_current;
        let severity = if z.abs() > s.anomaly_z && change.abs() > s.change_threshold {
            if change.abs() > s.high_change_threshold {
                Severity::High
            } else {
                Severity::Medium
            }
        } else {
            Severity::Normal
        };

        Ok(CorrelationPair {
            ticker_a: a.ticker.clone(),
            ticker_b: b.ticker.clone(),
            window_short: s.window_short,
            window_long: s.window_long,
            current_corr: current,
            historical_mean: hist_mean,
            historical_std: hist_std,
            z_score: z,
            severity,
            direction: if current >= hist_mean {
                CorrelationDirection::Strengthening
            } else {
                CorrelationDirection::Weakening
            },
        })
    }

    /// All C(n,2) pairs of the universe; anomalies only, strongest |z|
    /// first, truncated to `top_k`.
    pub fn scan_matrix(
        &self,
        universe: &[PriceSeries],
        top_k: usize,
    ) -> EngineResult<Vec<CorrelationPair>> {
        if universe.len() < 2 {
            return Err(EngineError::InvalidArgument(
                "correlation scan needs at least two tickers".to_string(),
            ));
        }
        let mut anomalies = Vec::new();
        for i in 0..universe.len() {
            for j in i + 1..universe.len() {
                match self.detect_breakdown(&universe[i], &universe[j]) {
                    Ok(pair) if pair.severity != Severity::Normal => anomalies.push(pair),
                    Ok(_) => {}
                    Err(EngineError::Degenerate(msg)) => {
                        tracing::debug!(
                            "skipping pair {}/{}: {msg}",
                            universe[i].ticker,
                            universe[j].ticker
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        anomalies.sort_by(|x, y| {
            y.z_score
                .abs()
                .partial_cmp(&x.z_score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        anomalies.truncate(top_k);
        Ok(anomalies)
    }

    /// Average pairwise correlation over the long window, bucketed into a
    /// regime.
    pub fn classify_regime(&self, universe: &[PriceSeries]) -> EngineResult<RegimeReport> {
        if universe.len() < 2 {
            return Err(EngineError::InvalidArgument(
                "regime classification needs at least two tickers".to_string(),
            ));
        }
        let s = &self.settings;
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..universe.len() {
            for j in i + 1..universe.len() {
                let (ra, rb) = aligned_returns(&universe[i], &universe[j], s.lookback)?;
                if ra.len() < s.window_long {
                    continue;
                }
                if let Some(c) = correlation(
                    &ra[ra.len() - s.window_long..],
                    &rb[rb.len() - s.window_long..],
                ) {
                    sum += c;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Err(EngineError::Degenerate(
                "no pair produced a defined correlation".to_string(),
            ));
        }
        let avg = sum / count as f64;
        Ok(RegimeReport {
            tickers: universe.iter().map(|p| p.ticker.clone()).collect(),
            average_pairwise_correlation: avg,
            regime: CorrelationRegime::from_average(avg),
            pair_count: count,
        })
    }

    /// Correlation-plus-ratio dislocation signal for a candidate pair.
    /// Requires the pair to be historically correlated (> 0.6) to mean
    /// anything; the combined z averages the two dislocation measures.
    pub fn pairs_arbitrage(
        &self,
        a: &PriceSeries,
        b: &PriceSeries,
    ) -> EngineResult<PairsSignal> {
        let s = &self.settings;
        let (ra, rb) = aligned_returns(a, b, s.lookback)?;
        let hist_corr = correlation(&ra, &rb).ok_or_else(|| {
            EngineError::Degenerate("historical correlation undefined".to_string())
        })?;
        if hist_corr <= 0.6 {
            return Err(EngineError::Degenerate(format!(
                "pair correlation {hist_corr:.2} too weak for arbitrage (needs > 0.6)"
            )));
        }

        let breakdown = self.detect_breakdown(a, b)?;

        let (pa, pb) = aligned_closes(a, b, s.lookback + 1);
        let ratios: Vec<f64> = pa
            .iter()
            .zip(pb.iter())
            .filter(|(_, &denom)| denom != 0.0)
            .map(|(&num, &denom)| num / denom)
            .collect();
        let (ratio_mean, ratio_std) = mean_std(&ratios).ok_or_else(|| {
            EngineError::Degenerate("price ratio history too short".to_string())
        })?;
        let current_ratio = *ratios.last().ok_or_else(|| {
            EngineError::Degenerate("empty price ratio series".to_string())
        })?;
        let ratio_z = z_score(current_ratio, ratio_mean, ratio_std).ok_or_else(|| {
            EngineError::Degenerate("price ratio has zero variance".to_string())
        })?;

        let combined = (breakdown.z_score.abs() + ratio_z.abs()) / 2.0;
        Ok(PairsSignal {
            ticker_a: a.ticker.clone(),
            ticker_b: b.ticker.clone(),
            historical_correlation: hist_corr,
            correlation_z: breakdown.z_score,
            price_ratio_z: ratio_z,
            combined_z: combined,
            actionable: combined > 3.0,
            high_confidence: combined > 4.0,
            direction: if ratio_z < 0.0 {
                "long_a_short_b".to_string()
            } else {
                "short_a_long_b".to_string()
            },
        })
    }

    /// Fetch a universe and scan it.
    pub async fn scan_universe(
        &self,
        ctx: &RuntimeContext,
        tickers: &[String],
        top_k: usize,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<CorrelationPair>> {
        let universe = fetch_universe(ctx, tickers, self.settings.lookback, cancel).await?;
        self.scan_matrix(&universe, top_k)
    }

    pub async fn regime_for(
        &self,
        ctx: &RuntimeContext,
        tickers: &[String],
        cancel: &CancelToken,
    ) -> EngineResult<RegimeReport> {
        let universe = fetch_universe(ctx, tickers, self.settings.lookback, cancel).await?;
        self.classify_regime(&universe)
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(CorrelationSettings::default())
    }
}

/// Fetch daily series for each ticker, checking cancellation between calls.
pub(crate) async fn fetch_universe(
    ctx: &RuntimeContext,
    tickers: &[String],
    lookback: usize,
    cancel: &CancelToken,
) -> EngineResult<Vec<PriceSeries>> {
    // Calendar days ≈ trading days × 7/5 plus slack for holidays.
    let days = (lookback as i64 * 7) / 5 + 30;
    let mut out = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        cancel.check()?;
        out.push(
            ctx.fetcher
                .price_history(ticker, Interval::Day, days, cancel)
                .await?,
        );
    }
    Ok(out)
}

/// Trailing daily returns of both series, truncated to the shorter side and
/// to `lookback` points.
fn aligned_returns(a: &PriceSeries, b: &PriceSeries, lookback: usize) -> EngineResult<(Vec<f64>, Vec<f64>)> {
    let (ca, cb) = aligned_closes(a, b, lookback + 1);
    if ca.len() < 3 {
        return Err(EngineError::Degenerate(format!(
            "pair {}/{} has too little overlapping history",
            a.ticker, b.ticker
        )));
    }
    Ok((simple_returns(&ca), simple_returns(&cb)))
}

fn aligned_closes(a: &PriceSeries, b: &PriceSeries, max_len: usize) -> (Vec<f64>, Vec<f64>) {
    let ca = a.closes();
    let cb = b.closes();
    let n = ca.len().min(cb.len()).min(max_len);
    (
        ca[ca.len() - n..].to_vec(),
        cb[cb.len() - n..].to_vec(),
    )
}
