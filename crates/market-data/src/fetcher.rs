use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use engine_core::{
    CancelToken, DataFetcher, EngineError, EngineResult, FilingRef, FundamentalSnapshot, Interval,
    MacroSeries, MarketQuote, OptionsChain, PeriodType, PriceSeries, RuntimeConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::providers::edgar::EdgarProvider;
use crate::providers::fred::FredProvider;
use crate::providers::stooq::StooqProvider;
use crate::providers::yahoo::YahooProvider;
use crate::providers::MarketDataProvider;
use crate::rate_limit::TokenBucket;
use crate::retry::{with_retry, RetryPolicy};

const DEFAULT_PROVIDER_RPS: f64 = 5.0;

/// The data layer: a provider chain behind tier-based TTL caches, retry with
/// exponential backoff, and per-provider token buckets. Providers are tried
/// in registration order; the first non-error wins.
pub struct MarketDataService {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    buckets: HashMap<&'static str, TokenBucket>,
    retry: RetryPolicy,
    rate_limits: HashMap<String, f64>,
    intraday_prices: TtlCache<PriceSeries>,
    eod_prices: TtlCache<PriceSeries>,
    quotes: TtlCache<MarketQuote>,
    fundamentals: TtlCache<Vec<FundamentalSnapshot>>,
    options: TtlCache<OptionsChain>,
    filings: TtlCache<Vec<FilingRef>>,
    macros: TtlCache<MacroSeries>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl MarketDataService {
    pub fn new(config: &RuntimeConfig) -> Self {
        let ttl = &config.cache_ttl;
        Self {
            providers: Vec::new(),
            buckets: HashMap::new(),
            retry: RetryPolicy {
                max_attempts: config.retry_max_attempts,
                backoff_base_ms: config.retry_backoff_base_ms,
            },
            rate_limits: config.rate_limits.clone(),
            intraday_prices: TtlCache::new(Duration::from_secs(ttl.intraday)),
            eod_prices: TtlCache::new(Duration::from_secs(ttl.eod)),
            quotes: TtlCache::new(Duration::from_secs(ttl.intraday)),
            fundamentals: TtlCache::new(Duration::from_secs(ttl.fundamentals)),
            options: TtlCache::new(Duration::from_secs(ttl.intraday)),
            filings: TtlCache::new(Duration::from_secs(ttl.reference)),
            macros: TtlCache::new(Duration::from_secs(ttl.reference)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Append a provider to the fallback chain (earlier wins).
    pub fn with_provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        let rps = self
            .rate_limits
            .get(provider.name())
            .copied()
            .unwrap_or(DEFAULT_PROVIDER_RPS);
        self.buckets.insert(provider.name(), TokenBucket::new(rps));
        self.providers.push(provider);
        self
    }

    /// The production chain: Yahoo first, Stooq for EOD fallback, FRED for
    /// macro series and EDGAR for filings.
    pub fn with_default_providers(self) -> Self {
        self.with_provider(Arc::new(YahooProvider::new()))
            .with_provider(Arc::new(StooqProvider::new()))
            .with_provider(Arc::new(FredProvider::new()))
            .with_provider(Arc::new(EdgarProvider::new()))
    }

    /// (hits, misses) counters; the dispatcher diffs these around an
    /// invocation to report whether it was served from cache.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Walk the provider chain, retrying transient failures per provider.
    /// Keeps the most meaningful error: NotFound beats a generic upstream
    /// failure since it names the offending symbol.
    async fn try_chain<'p, T, F>(&'p self, cancel: &'p CancelToken, call: F) -> EngineResult<T>
    where
        F: Fn(
            &'p dyn MarketDataProvider,
        )
            -> std::pin::Pin<Box<dyn std::future::Future<Output = EngineResult<T>> + Send + 'p>>,
    {
        if self.providers.is_empty() {
            return Err(EngineError::Internal("no data providers registered".to_string()));
        }

        let mut best_err: Option<EngineError> = None;
        for provider in &self.providers {
            cancel.check()?;
            if let Some(bucket) = self.buckets.get(provider.name()) {
                bucket.acquire().await;
            }
            let result = with_retry(self.retry, cancel, || call(provider.as_ref())).await;
            match result {
                Ok(value) => return Ok(value),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) => {
                    tracing::warn!(provider = provider.name(), "provider failed: {err}");
                    best_err = Some(match (best_err.take(), err) {
                        (Some(EngineError::NotFound(m)), _) => EngineError::NotFound(m),
                        (_, err) => err,
                    });
                }
            }
        }
        Err(best_err.unwrap_or_else(|| EngineError::Internal("empty provider chain".to_string())))
    }
}

#[async_trait]
impl DataFetcher for MarketDataService {
    async fn price_history(
        &self,
        ticker: &str,
        interval: Interval,
        period_days: i64,
        cancel: &CancelToken,
    ) -> EngineResult<PriceSeries> {
        let cache = match interval {
            Interval::Minute | Interval::Hour => &self.intraday_prices,
            _ => &self.eod_prices,
        };
        let key = format!("{}:{}:{}", ticker.to_uppercase(), interval.as_str(), period_days);
        let now = Utc::now();
        if let Some(entry) = cache.get(&key, now) {
            self.record_hit();
            return Ok(entry.data);
        }
        self.record_miss();

        let series = self
            .try_chain(cancel, |p| {
                Box::pin(p.price_history(ticker, interval, period_days))
            })
            .await?;
        cache.insert(key, series.clone(), Utc::now());
        Ok(series)
    }

    async fn quote(&self, ticker: &str, cancel: &CancelToken) -> EngineResult<MarketQuote> {
        let key = ticker.to_uppercase();
        let now = Utc::now();
        if let Some(entry) = self.quotes.get(&key, now) {
            self.record_hit();
            return Ok(entry.data);
        }
        self.record_miss();

        let quote = self.try_chain(cancel, |p| Box::pin(p.quote(ticker))).await?;
        self.quotes.insert(key, quote.clone(), Utc::now());
        Ok(quote)
    }

    async fn fundamentals(
        &self,
        ticker: &str,
        period_type: PeriodType,
        as_of: Option<NaiveDate>,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<FundamentalSnapshot>> {
        let key = format!("{}:{:?}", ticker.to_uppercase(), period_type);
        let now = Utc::now();
        let snapshots = if let Some(entry) = self.fundamentals.get(&key, now) {
            self.record_hit();
            entry.data
        } else {
            self.record_miss();
            let fetched = self
                .try_chain(cancel, |p| Box::pin(p.fundamentals(ticker, period_type)))
                .await?;
            self.fundamentals.insert(key, fetched.clone(), Utc::now());
            fetched
        };

        // Point-in-time filter: a snapshot is visible only once reported.
        // Snapshots without a report date cannot be filtered faithfully and
        // are dropped from as-of views; callers consult
        // `supports_pit_fundamentals` to report proxy usage instead.
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
        cancel: &CancelToken,
    ) -> EngineResult<OptionsChain> {
        let key = format!(
            "{}:{}",
            ticker.to_uppercase(),
            expiry.map(|d| d.to_string()).unwrap_or_else(|| "front".to_string())
        );
        let now = Utc::now();
        if let Some(entry) = self.options.get(&key, now) {
            self.record_hit();
            return Ok(entry.data);
        }
        self.record_miss();

        let chain = self
            .try_chain(cancel, |p| Box::pin(p.options_chain(ticker, expiry)))
            .await?;
        self.options.insert(key, chain.clone(), Utc::now());
        Ok(chain)
    }

    async fn filings(
        &self,
        ticker: &str,
        form_types: &[String],
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelToken,
    ) -> EngineResult<Vec<FilingRef>> {
        let key = format!("{}:{}:{from}:{to}", ticker.to_uppercase(), form_types.join("|"));
        let now = Utc::now();
        if let Some(entry) = self.filings.get(&key, now) {
            self.record_hit();
            return Ok(entry.data);
        }
        self.record_miss();

        let refs = self
            .try_chain(cancel, |p| Box::pin(p.filings(ticker, form_types, from, to)))
            .await?;
        self.filings.insert(key, refs.clone(), Utc::now());
        Ok(refs)
    }

    async fn macro_series(
        &self,
        series_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        cancel: &CancelToken,
    ) -> EngineResult<MacroSeries> {
        let key = format!("{series_id}:{from}:{to}");
        let now = Utc::now();
        if let Some(entry) = self.macros.get(&key, now) {
            self.record_hit();
            return Ok(entry.data);
        }
        self.record_miss();

        let series = self
            .try_chain(cancel, |p| Box::pin(p.macro_series(series_id, from, to)))
            .await?;
        self.macros.insert(key, series.clone(), Utc::now());
        Ok(series)
    }

    fn supports_pit_fundamentals(&self) -> bool {
        self.providers.iter().any(|p| p.supports_pit_fundamentals())
    }

    fn cache_stats(&self) -> (u64, u64) {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::stub::StubProvider;
    use engine_core::Bar;
    use chrono::TimeZone;

    fn daily_series(ticker: &str, closes: &[f64]) -> PriceSeries {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 86_400, 0).unwrap(),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                adj_close: Some(c),
                volume: 1.0e6,
            })
            .collect();
        PriceSeries {
            ticker: ticker.to_string(),
            interval: Interval::Day,
            bars,
        }
    }

    fn service_with_stub(stub: StubProvider) -> MarketDataService {
        MarketDataService::new(&RuntimeConfig::default()).with_provider(Arc::new(stub))
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let stub = StubProvider::new().with_series(daily_series("AAPL", &[100.0, 101.0, 102.0]));
        let service = service_with_stub(stub);
        let cancel = CancelToken::new();

        let first = service
            .price_history("AAPL", Interval::Day, 30, &cancel)
            .await
            .unwrap();
        let (h0, m0) = service.stats();
        let second = service
            .price_history("AAPL", Interval::Day, 30, &cancel)
            .await
            .unwrap();
        let (h1, m1) = service.stats();

        assert_eq!(first.bars.len(), second.bars.len());
        assert_eq!(m0, m1, "second fetch must not miss");
        assert_eq!(h1, h0 + 1);
    }

    #[tokio::test]
    async fn fallback_chain_skips_failing_provider() {
        // strict stub with no data fails; generating stub succeeds
        let service = MarketDataService::new(&RuntimeConfig::default())
            .with_provider(Arc::new(StubProvider::strict()))
            .with_provider(Arc::new(StubProvider::new()));
        let cancel = CancelToken::new();
        let series = service
            .price_history("MSFT", Interval::Day, 60, &cancel)
            .await
            .unwrap();
        assert!(!series.bars.is_empty());
    }

    #[tokio::test]
    async fn unknown_symbol_surfaces_not_found() {
        let service = MarketDataService::new(&RuntimeConfig::default())
            .with_provider(Arc::new(StubProvider::strict()));
        let cancel = CancelToken::new();
        let err = service
            .price_history("ZZZZ", Interval::Day, 30, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[tokio::test]
    async fn pit_filter_hides_unreported_snapshots() {
        let service = service_with_stub(StubProvider::new());
        let cancel = CancelToken::new();
        let cutoff = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let snaps = service
            .fundamentals("AAPL", PeriodType::Quarterly, Some(cutoff), &cancel)
            .await
            .unwrap();
        assert!(!snaps.is_empty());
        for snap in &snaps {
            assert!(snap.reported_at.unwrap() <= cutoff);
        }
    }

    #[tokio::test]
    async fn cancelled_invocation_never_reaches_providers() {
        let service = service_with_stub(StubProvider::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = service
            .price_history("AAPL", Interval::Day, 30, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Cancelled");
    }
}
