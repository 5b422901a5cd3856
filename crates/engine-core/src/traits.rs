use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::cancel::CancelToken;
use crate::error::EngineResult;
use crate::types::{
    FilingRef, FundamentalSnapshot, Interval, MacroSeries, MarketQuote, OptionsChain, PeriodType,
    PriceSeries,
};

/// Uniform access to upstream market data. Implementations own caching,
/// retry, fallback and rate control; callers only see the capability surface.
#[async_trait]
pub trait DataFetcher: Send + Sync {
    /// Historical bars for `ticker` covering the trailing `period_days`.
    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
        cancel: &CancelToken,
    ) -> EngineResult<PriceSeries>;

    /// Current quote.
    async fn quote(&self, ticker: &str, cancel: &CancelToken) -> EngineResult<MarketQuote>;

    /// Financial snapshots, most recent first. When `as_of` is set only
    /// snapshots reported on or before that date are returned; implementations
    /// that cannot filter must say so via `supports_pit_fundamentals`.
    async fn fundamentals(
        &self,
        ticker: &str,
        period_type: PeriodType,
        as_of: Option<NaiveDate>,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<FundamentalSnapshot>>;

    /// Options chain snapshot, optionally restricted to one expiry.
    async fn options_chain(
        &self,
        ticker: &str,
        expiry: Option<NaiveDate>,
        cancel: &CancelToken,
    ) -> EngineResult<OptionsChain>;

    /// Regulatory filings in a date range.
    async fn filings(
        &self,
        ticker: &str,
        form_types: &[String],
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<FilingRef>>;

    /// Macro series (rates, CPI, ...) by provider series id.
    async fn macro_series(
        &self,
        series_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelToken,
    ) -> EngineResult<MacroSeries>;

    /// Whether `fundamentals` honors the `as_of` filter. Rating paths use
    /// this to report current-as-proxy inputs instead of silently leaking
    /// future data into historical scores.
    fn supports_pit_fundamentals(&self) -> bool {
        false
    }

    /// Cumulative (cache_hits, cache_misses). The dispatcher diffs this
    /// around an invocation to fill the `cached` field of result metadata.
    fn cache_stats(&self) -> (u64, u64) {
        (0, 0)
    }
}

/// Wall-clock abstraction so tests can pin "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// System clock used outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for deterministic tests.
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
