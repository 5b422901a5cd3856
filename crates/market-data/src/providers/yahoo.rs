use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use engine_core::{
    EngineError, EngineResult, Bar, Interval, MarketQuote, OptionContract, OptionsChain,
    PriceSeries,
};
use reqwest::Client;
use serde::Deserialize;

use super::MarketDataProvider;

const BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Free Yahoo Finance endpoints: chart bars, quotes and options chains.
pub struct YahooProvider {
    client: Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("quantdesk/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    async fn fetch_chart(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
    ) -> EngineResult<ChartResult> {
        let interval_param = match interval {
            Interval::Minute => "1m",
            Interval::Hour => "1h",
            Interval::Day => "1d",
            Interval::Week => "1wk",
            Interval::Month => "1mo",
        };
        let now = Utc::now();
        let start = now - Duration::days(period_days);
        let url = format!("{BASE_URL}/v8/finance/chart/{ticker}");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("interval", interval_param),
                ("period1", &start.timestamp().to_string()),
                ("period2", &now.timestamp().to_string()),
                ("events", "div,splits"),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("yahoo chart: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(EngineError::NotFound(format!("unknown ticker {ticker}")));
        }
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited("yahoo 429".to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::Upstream(format!("yahoo HTTP {status}")));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("yahoo chart payload: {e}")))?;

        body.chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| EngineError::NotFound(format!("no chart data for {ticker}")))
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
    ) -> EngineResult<PriceSeries> {
        let chart = self.fetch_chart(ticker, interval, period_days).await?;

        let quote = chart
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ParseError("yahoo chart: missing quote block".to_string()))?;
        let adj = chart
            .indicators
            .adjclose
            .and_then(|mut a| if a.is_empty() { None } else { Some(a.remove(0)) });

        let mut bars = Vec::with_capacity(chart.timestamp.len());
        for (i, ts) in chart.timestamp.iter().enumerate() {
            // Yahoo reports nulls for halted bars; those stay missing.
            let (open, high, low, close) = match (
                quote.open.get(i).copied().flatten(),
                quote.high.get(i).copied().flatten(),
                quote.low.get(i).copied().flatten(),
                quote.close.get(i).copied().flatten(),
            ) {
                (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
                _ => continue,
            };
            let timestamp = DateTime::from_timestamp(*ts, 0)
                .ok_or_else(|| EngineError::ParseError(format!("yahoo bar timestamp {ts}")))?;
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                adj_close: adj.as_ref().and_then(|a| a.adjclose.get(i).copied().flatten()),
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0.0),
            });
        }

        PriceSeries::new(ticker, interval, bars)
    }

    async fn quote(&self, ticker: &str) -> EngineResult<MarketQuote> {
        let chart = self.fetch_chart(ticker, Interval::Minute, 1).await?;
        let meta = chart.meta;
        let last = meta
            .regular_market_price
            .ok_or_else(|| EngineError::NotFound(format!("no quote for {ticker}")))?;
        Ok(MarketQuote {
            ticker: ticker.to_string(),
            timestamp: Utc::now(),
            last,
            bid: None,
            ask: None,
        })
    }

    async fn options_chain(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
    ) -> EngineResult<OptionsChain> {
        let url = format!("{BASE_URL}/v7/finance/options/{ticker}");
        let mut request = self.client.get(&url);
        if let Some(date) = expiry {
            let ts = date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc().timestamp())
                .unwrap_or_default();
            request = request.query(&[("date", ts.to_string())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Upstream(format!("yahoo options: {e}")))?;
        if response.status().as_u16() == 429 {
            return Err(EngineError::RateLimited("yahoo 429".to_string()));
        }
        if !response.status().is_success() {
            return Err(EngineError::Upstream(format!(
                "yahoo options HTTP {}",
                response.status()
            )));
        }

        let body: OptionsResponse = response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("yahoo options payload: {e}")))?;

        let result = body
            .option_chain
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .ok_or_else(|| EngineError::NotFound(format!("no options for {ticker}")))?;

        let mut contracts = Vec::new();
        for block in result.options {
            for (raw, is_call) in block
                .calls
                .into_iter()
                .map(|c| (c, true))
                .chain(block.puts.into_iter().map(|p| (p, false)))
            {
                let expiry = DateTime::from_timestamp(raw.expiration, 0)
                    .map(|dt| dt.date_naive())
                    .ok_or_else(|| {
                        EngineError::ParseError(format!("option expiry {}", raw.expiration))
                    })?;
                contracts.push(OptionContract {
                    contract: raw.contract_symbol,
                    underlying: ticker.to_string(),
                    expiry,
                    strike: raw.strike,
                    is_call,
                    last: raw.last_price,
                    implied_volatility: raw.implied_volatility,
                    open_interest: raw.open_interest,
                });
            }
        }

        Ok(OptionsChain {
            underlying: ticker.to_string(),
            contracts,
        })
    }
}

// --- wire types ---

#[derive(Deserialize)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Deserialize)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
}

#[derive(Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Deserialize)]
struct ChartMeta {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
    #[serde(default)]
    adjclose: Option<Vec<AdjClose>>,
}

#[derive(Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

#[derive(Deserialize)]
struct OptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: OptionsEnvelope,
}

#[derive(Deserialize)]
struct OptionsEnvelope {
    result: Option<Vec<OptionsResult>>,
}

#[derive(Deserialize)]
struct OptionsResult {
    #[serde(default)]
    options: Vec<OptionsBlock>,
}

#[derive(Deserialize)]
struct OptionsBlock {
    #[serde(default)]
    calls: Vec<RawContract>,
    #[serde(default)]
    puts: Vec<RawContract>,
}

#[derive(Deserialize)]
struct RawContract {
    #[serde(rename = "contractSymbol")]
    contract_symbol: String,
    expiration: i64,
    strike: f64,
    #[serde(rename = "lastPrice")]
    last_price: Option<f64>,
    #[serde(rename = "impliedVolatility")]
    implied_volatility: Option<f64>,
    #[serde(rename = "openInterest")]
    open_interest: Option<f64>,
}
