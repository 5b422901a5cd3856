use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use engine_core::{Bar, EngineError, EngineResult, Interval, PriceSeries};
use reqwest::Client;

use super::MarketDataProvider;

/// Stooq CSV endpoint; end-of-day bars only. Serves as the fallback when the
/// primary chart feed is down.
pub struct StooqProvider {
    client: Client,
}

impl StooqProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Stooq wants lowercase symbols with a market suffix; bare US tickers
    /// become `<sym>.us`.
    fn stooq_symbol(ticker: &str) -> String {
        let lower = ticker.to_lowercase();
        if lower.contains('.') {
            lower
        } else {
            format!("{lower}.us")
        }
    }
}

impl Default for StooqProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for StooqProvider {
    fn name(&self) -> &'static str {
        "stooq"
    }

    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
    ) -> EngineResult<PriceSeries> {
        if interval != Interval::Day {
            return Err(self.unsupported("intraday price_history"));
        }

        let url = format!(
            "https://stooq.com/q/d/l/?s={}&i=d",
            Self::stooq_symbol(ticker)
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("stooq: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "stooq HTTP {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Upstream(format!("stooq body: {e}")))?;

        let cutoff = Utc::now().date_naive() - chrono::Duration::days(period_days);
        let mut bars = Vec::new();
        // CSV header: Date,Open,High,Low,Close,Volume
        for line in body.lines().skip(1) {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 6 {
                continue;
            }
            let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")
                .map_err(|e| EngineError::ParseError(format!("stooq date {}: {e}", fields[0])))?;
            if date < cutoff {
                continue;
            }
            let parse = |s: &str| -> EngineResult<f64> {
                s.parse()
                    .map_err(|_| EngineError::ParseError(format!("stooq field {s:?}")))
            };
            let timestamp = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| EngineError::ParseError(format!("stooq date {date}")))?;
            bars.push(Bar {
                timestamp,
                open: parse(fields[1])?,
                high: parse(fields[2])?,
                low: parse(fields[3])?,
                close: parse(fields[4])?,
                adj_close: None,
                volume: fields[5].parse().unwrap_or(0.0),
            });
        }

        if bars.is_empty() {
            return Err(EngineError::NotFound(format!(
                "stooq has no bars for {ticker}"
            )));
        }
        PriceSeries::new(ticker, interval, bars)
    }
}
