use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

/// OHLCV bar data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub adj_close: Option<f64>,
    pub volume: f64,
}

impl Bar {
    /// Close adjusted for corporate actions when the provider supplies it.
    pub fn effective_close(&self) -> f64 {
        self.adj_close.unwrap_or(self.close)
    }
}

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

/// Ordered sequence of bars for one ticker at one interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub ticker: String,
    pub interval: Interval,
    pub bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series, enforcing strictly increasing timestamps.
    pub fn new(ticker: impl Into<String>, interval: Interval, bars: Vec<Bar>) -> EngineResult<Self> {
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(EngineError::ParseError(format!(
                    "bars out of order at {}",
                    pair[1].timestamp
                )));
            }
        }
        Ok(Self {
            ticker: ticker.into(),
            interval,
            bars,
        })
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.effective_close()).collect()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Bars visible on or before the given date. Used by point-in-time paths.
    pub fn up_to(&self, as_of: NaiveDate) -> Self {
        Self {
            ticker: self.ticker.clone(),
            interval: self.interval,
            bars: self
                .bars
                .iter()
                .filter(|b| b.timestamp.date_naive() <= as_of)
                .cloned()
                .collect(),
        }
    }
}

/// Quote data (bid/ask plus last trade)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub last: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
}

/// Quarterly or annual financial snapshot. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub ticker: String,
    pub period_ending: NaiveDate,
    /// Date the figures became publicly visible (filing date). Point-in-time
    /// filters compare against this, not `period_ending`.
    pub reported_at: Option<NaiveDate>,
    pub fiscal_period: String,
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub eps: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub shareholders_equity: Option<f64>,
    pub cash_flow_operating: Option<f64>,
    pub cash_flow_investing: Option<f64>,
    pub cash_flow_financing: Option<f64>,
    pub shares_outstanding: Option<f64>,
}

/// Reporting cadence for fundamentals requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Quarterly,
    Annual,
}

/// One graded factor inside a composite rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorScore {
    pub factor: String,
    /// Raw metric value; None when the inputs were unavailable.
    pub raw_value: Option<f64>,
    /// Bounded grade, 0 (worst) to 5 (best).
    pub grade: f64,
    pub details: serde_json::Value,
}

/// Discrete rating bucket derived from a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rating {
    StrongSell,
    Sell,
    Hold,
    Buy,
    StrongBuy,
}

impl Rating {
    /// Map a 0-5 composite onto the rating buckets.
    pub fn from_composite(composite: f64) -> Self {
        if composite < 1.2 {
            Rating::StrongSell
        } else if composite < 2.0 {
            Rating::Sell
        } else if composite < 2.8 {
            Rating::Hold
        } else if composite < 3.5 {
            Rating::Buy
        } else {
            Rating::StrongBuy
        }
    }

    pub fn to_label(&self) -> &'static str {
        match self {
            Rating::StrongSell => "Strong Sell",
            Rating::Sell => "Sell",
            Rating::Hold => "Hold",
            Rating::Buy => "Buy",
            Rating::StrongBuy => "Strong Buy",
        }
    }
}

/// Composite multi-factor score for one ticker at one date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub ticker: String,
    pub as_of: NaiveDate,
    /// Weighted composite, 0-5.
    pub composite: f64,
    pub rating: Rating,
    pub factors: BTreeMap<String, FactorScore>,
    /// Which factor inputs were point-in-time faithful vs current-as-proxy.
    pub data_completeness: serde_json::Value,
}

/// Severity bucket for correlation anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Medium,
    High,
}

/// Direction of a correlation move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationDirection {
    Strengthening,
    Weakening,
}

/// Rolling-correlation comparison for one pair of tickers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub ticker_a: String,
    pub ticker_b: String,
    pub window_short: usize,
    pub window_long: usize,
    pub current_corr: f64,
    pub historical_mean: f64,
    pub historical_std: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub direction: CorrelationDirection,
}

/// Generic point of a macro or reference time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

/// A macro series (rates, CPI, ...) keyed by provider series id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroSeries {
    pub series_id: String,
    pub points: Vec<SeriesPoint>,
}

/// A single options contract as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    pub contract: String,
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    pub is_call: bool,
    pub last: Option<f64>,
    pub implied_volatility: Option<f64>,
    pub open_interest: Option<f64>,
}

/// Options chain snapshot for one underlying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsChain {
    pub underlying: String,
    pub contracts: Vec<OptionContract>,
}

/// Reference to a regulatory filing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingRef {
    pub ticker: String,
    pub form_type: String,
    pub filed_at: NaiveDate,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(secs: i64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            adj_close: None,
            volume: 0.0,
        }
    }

    #[test]
    fn series_rejects_unordered_bars() {
        let bars = vec![bar_at(200), bar_at(100)];
        assert!(PriceSeries::new("X", Interval::Day, bars).is_err());
    }

    #[test]
    fn series_rejects_duplicate_timestamps() {
        let bars = vec![bar_at(100), bar_at(100)];
        assert!(PriceSeries::new("X", Interval::Day, bars).is_err());
    }

    #[test]
    fn rating_thresholds_are_exact() {
        assert_eq!(Rating::from_composite(0.0), Rating::StrongSell);
        assert_eq!(Rating::from_composite(1.19), Rating::StrongSell);
        assert_eq!(Rating::from_composite(1.2), Rating::Sell);
        assert_eq!(Rating::from_composite(1.99), Rating::Sell);
        assert_eq!(Rating::from_composite(2.0), Rating::Hold);
        assert_eq!(Rating::from_composite(2.8), Rating::Buy);
        assert_eq!(Rating::from_composite(3.49), Rating::Buy);
        assert_eq!(Rating::from_composite(3.5), Rating::StrongBuy);
        assert_eq!(Rating::from_composite(5.0), Rating::StrongBuy);
    }
}
