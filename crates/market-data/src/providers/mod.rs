use async_trait::async_trait;
use chrono::NaiveDate;
use engine_core::{
    EngineError, EngineResult, FilingRef, FundamentalSnapshot, Interval, MacroSeries, MarketQuote,
    OptionsChain, PeriodType, PriceSeries,
};

pub mod edgar;
pub mod fred;
pub mod stooq;
pub mod stub;
pub mod yahoo;

/// One upstream feed. Providers implement the capabilities they actually
/// serve; the rest fall through to the next provider in the chain.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn price_history(
        &self,
        _ticker: &str,
        _interval: Interval,
        _period_days: i64,
    ) -> EngineResult<PriceSeries> {
        Err(self.unsupported("price_history"))
    }

    async fn quote(&self, _ticker: &str) -> EngineResult<MarketQuote> {
        Err(self.unsupported("quote"))
    }

    async fn fundamentals(
        &self,
        _ticker: &str,
        _period_type: PeriodType,
    ) -> EngineResult<Vec<FundamentalSnapshot>> {
        Err(self.unsupported("fundamentals"))
    }

    async fn options_chain(
        &self,
        _ticker: &str,
        _expiry: Option<NaiveDate>,
    ) -> EngineResult<OptionsChain> {
        Err(self.unsupported("options_chain"))
    }

    async fn filings(
        &self,
        _ticker: &str,
        _form_types: &[String],
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> EngineResult<Vec<FilingRef>> {
        Err(self.unsupported("filings"))
    }

    async fn macro_series(
        &self,
        _series_id: &str,
        _from: NaiveDate,
        _to: NaiveDate,
    ) -> EngineResult<MacroSeries> {
        Err(self.unsupported("macro_series"))
    }

    /// Whether fundamentals from this feed carry reliable report dates,
    /// making point-in-time filtering trustworthy.
    fn supports_pit_fundamentals(&self) -> bool {
        false
    }

    fn unsupported(&self, capability: &str) -> EngineError {
        EngineError::Upstream(format!("{} does not serve {capability}", self.name()))
    }
}
