use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use dashmap::DashMap;
use engine_core::{
    Bar, EngineError, EngineResult, FilingRef, FundamentalSnapshot, Interval, MacroSeries,
    MarketQuote, OptionsChain, PeriodType, PriceSeries, SeriesPoint,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::MarketDataProvider;

/// Anchor date for generated history so tests are stable across wall-clock
/// time.
const ANCHOR: (i32, u32, u32) = (2024, 12, 31);

/// Deterministic in-memory provider. Tests and offline runs register
/// explicit payloads; anything not registered is synthesized from a seed
/// derived from the ticker so repeated calls agree bit-for-bit.
pub struct StubProvider {
    series: DashMap<String, PriceSeries>,
    fundamentals: DashMap<String, Vec<FundamentalSnapshot>>,
    quotes: DashMap<String, f64>,
    generate_missing: bool,
}

impl StubProvider {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            fundamentals: DashMap::new(),
            quotes: DashMap::new(),
            generate_missing: true,
        }
    }

    /// A stub that only serves registered data; everything else is NotFound.
    pub fn strict() -> Self {
        Self {
            generate_missing: false,
            ..Self::new()
        }
    }

    pub fn with_series(self, series: PriceSeries) -> Self {
        self.series.insert(series.ticker.to_uppercase(), series);
        self
    }

    pub fn with_fundamentals(self, ticker: &str, snapshots: Vec<FundamentalSnapshot>) -> Self {
        self.fundamentals.insert(ticker.to_uppercase(), snapshots);
        self
    }

    pub fn with_quote(self, ticker: &str, last: f64) -> Self {
        self.quotes.insert(ticker.to_uppercase(), last);
        self
    }

    pub fn set_quote(&self, ticker: &str, last: f64) {
        self.quotes.insert(ticker.to_uppercase(), last);
    }

    fn anchor() -> NaiveDate {
        NaiveDate::from_ymd_opt(ANCHOR.0, ANCHOR.1, ANCHOR.2).unwrap_or_default()
    }

    fn seed_for(ticker: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in ticker.to_uppercase().as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        hash
    }

    /// Synthesize a weekday daily series with seed-dependent drift and
    /// volatility.
    fn generate_series(ticker: &str, period_days: i64) -> PriceSeries {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(ticker));
        let drift: f64 = rng.gen_range(-0.0004..0.0008);
        let vol: f64 = rng.gen_range(0.008..0.025);
        let mut price: f64 = rng.gen_range(20.0..400.0);

        let end = Self::anchor();
        let start = end - Duration::days(period_days);
        let mut bars = Vec::new();
        let mut day = start;
        while day <= end {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                // Two-sided noise keeps the series roughly log-normal.
                let shock: f64 = rng.gen_range(-1.0..1.0) + rng.gen_range(-1.0..1.0);
                let ret = drift + vol * shock * 0.5;
                let open = price;
                price = (price * (1.0 + ret)).max(0.5);
                let close = price;
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.004));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.004));
                if let Some(dt) = day.and_hms_opt(21, 0, 0) {
                    bars.push(Bar {
                        timestamp: dt.and_utc(),
                        open,
                        high,
                        low,
                        close,
                        adj_close: Some(close),
                        volume: rng.gen_range(1.0e6..2.0e7),
                    });
                }
            }
            day += Duration::days(1);
        }

        PriceSeries {
            ticker: ticker.to_string(),
            interval: Interval::Day,
            bars,
        }
    }

    fn generate_fundamentals(ticker: &str) -> Vec<FundamentalSnapshot> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(ticker) ^ 0xf00d);
        let base_revenue: f64 = rng.gen_range(1.0e9..8.0e10);
        let margin: f64 = rng.gen_range(0.02..0.28);
        let growth: f64 = rng.gen_range(-0.05..0.30);
        let shares: f64 = rng.gen_range(1.0e8..5.0e9);

        let mut snapshots = Vec::new();
        let anchor = Self::anchor();
        for q in 0..8 {
            // Most recent first; each step back shrinks revenue by the
            // quarterly growth rate.
            let period_ending = anchor - Duration::days(45 + 91 * q);
            let factor = (1.0 + growth / 4.0).powi(-(q as i32));
            let revenue = base_revenue * factor;
            let net_income = revenue * margin;
            let equity = base_revenue * rng.gen_range(0.8..2.5);
            let assets = equity * rng.gen_range(1.5..3.0);
            snapshots.push(FundamentalSnapshot {
                ticker: ticker.to_uppercase(),
                period_ending,
                reported_at: Some(period_ending + Duration::days(45)),
                fiscal_period: format!("Q{}", 4 - (q % 4)),
                fiscal_year: period_ending.year(),
                revenue: Some(revenue),
                gross_profit: Some(revenue * 0.45),
                operating_income: Some(net_income * 1.3),
                net_income: Some(net_income),
                eps: Some(net_income / shares),
                total_assets: Some(assets),
                total_liabilities: Some(assets - equity),
                shareholders_equity: Some(equity),
                cash_flow_operating: Some(net_income * 1.1),
                cash_flow_investing: Some(-net_income * 0.4),
                cash_flow_financing: Some(-net_income * 0.2),
                shares_outstanding: Some(shares),
            });
        }
        snapshots
    }
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataProvider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
    ) -> EngineResult<PriceSeries> {
        if let Some(series) = self.series.get(&ticker.to_uppercase()) {
            return Ok(series.clone());
        }
        if !self.generate_missing {
            return Err(EngineError::NotFound(format!("stub has no series for {ticker}")));
        }
        if interval != Interval::Day {
            return Err(self.unsupported("intraday price_history"));
        }
        Ok(Self::generate_series(ticker, period_days))
    }

    async fn quote(&self, ticker: &str) -> EngineResult<MarketQuote> {
        let last = if let Some(q) = self.quotes.get(&ticker.to_uppercase()) {
            *q
        } else if let Some(series) = self.series.get(&ticker.to_uppercase()) {
            series
                .bars
                .last()
                .map(|b| b.close)
                .ok_or_else(|| EngineError::NotFound(format!("empty series for {ticker}")))?
        } else if self.generate_missing {
            Self::generate_series(ticker, 30)
                .bars
                .last()
                .map(|b| b.close)
                .ok_or_else(|| EngineError::Internal("generated empty series".to_string()))?
        } else {
            return Err(EngineError::NotFound(format!("stub has no quote for {ticker}")));
        };
        Ok(MarketQuote {
            ticker: ticker.to_uppercase(),
            timestamp: Utc::now(),
            last,
            bid: Some(last * 0.9995),
            ask: Some(last * 1.0005),
        })
    }

    async fn fundamentals(
        &self,
        ticker: &str,
        _period_type: PeriodType,
    ) -> EngineResult<Vec<FundamentalSnapshot>> {
        if let Some(snaps) = self.fundamentals.get(&ticker.to_uppercase()) {
            return Ok(snaps.clone());
        }
        if !self.generate_missing {
            return Err(EngineError::NotFound(format!(
                "stub has no fundamentals for {ticker}"
            )));
        }
        Ok(Self::generate_fundamentals(ticker))
    }

    async fn options_chain(
        &self,
        ticker: &str,
        _expiry: Option<NaiveDate>,
    ) -> EngineResult<OptionsChain> {
        Ok(OptionsChain {
            underlying: ticker.to_uppercase(),
            contracts: Vec::new(),
        })
    }

    async fn filings(
        &self,
        ticker: &str,
        form_types: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<Vec<FilingRef>> {
        let form = form_types.first().cloned().unwrap_or_else(|| "10-Q".to_string());
        let filed = Self::anchor() - Duration::days(30);
        if filed < from || filed > to {
            return Ok(Vec::new());
        }
        Ok(vec![FilingRef {
            ticker: ticker.to_uppercase(),
            form_type: form,
            filed_at: filed,
            url: format!("stub://filings/{ticker}"),
        }])
    }

    async fn macro_series(
        &self,
        series_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EngineResult<MacroSeries> {
        let mut rng = StdRng::seed_from_u64(Self::seed_for(series_id) ^ 0xacc0);
        let base: f64 = rng.gen_range(1.0..6.0);
        let mut points = Vec::new();
        let mut day = from;
        while day <= to {
            points.push(SeriesPoint {
                date: day,
                value: Some(base + rng.gen_range(-0.1..0.1)),
            });
            day += Duration::days(7);
        }
        Ok(MacroSeries {
            series_id: series_id.to_string(),
            points,
        })
    }

    fn supports_pit_fundamentals(&self) -> bool {
        true
    }
}

/// The stub doubles as a full data layer for tests and offline runs:
/// the same capabilities behind the `engine_core::DataFetcher` surface,
/// with the point-in-time filter the production service applies.
#[async_trait]
impl engine_core::DataFetcher for StubProvider {
    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<PriceSeries> {
        cancel.check()?;
        MarketDataProvider::price_history(self, ticker, interval, period_days).await
    }

    async fn quote(
        &self,
        ticker: &str,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<MarketQuote> {
        cancel.check()?;
        MarketDataProvider::quote(self, ticker).await
    }

    async fn fundamentals(
        &self,
        ticker: &str,
        period_type: PeriodType,
        as_of: Option<NaiveDate>,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<Vec<FundamentalSnapshot>> {
        cancel.check()?;
        let snapshots = MarketDataProvider::fundamentals(self, ticker, period_type).await?;
        match as_of {
            Some(cutoff) => Ok(snapshots
                .into_iter()
                .filter(|s| s.reported_at.map(|r| r <= cutoff).unwrap_or(false))
                .collect()),
            None => Ok(snapshots),
        }
    }

    async fn options_chain(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<OptionsChain> {
        cancel.check()?;
        MarketDataProvider::options_chain(self, ticker, expiry).await
    }

    async fn filings(
        &self,
        ticker: &str,
        form_types: &[String],
        from: NaiveDate,
        to: NaiveDate,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<Vec<FilingRef>> {
        cancel.check()?;
        MarketDataProvider::filings(self, ticker, form_types, from, to).await
    }

    async fn macro_series(
        &self,
        series_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &engine_core::CancelToken,
    ) -> EngineResult<MacroSeries> {
        cancel.check()?;
        MarketDataProvider::macro_series(self, series_id, from, to).await
    }

    fn supports_pit_fundamentals(&self) -> bool {
        true
    }
}
