//! Data layer: uniform access to upstream feeds with caching, retry,
//! fallback chains and per-provider rate control. Components above this
//! crate only see the `engine_core::DataFetcher` capability surface.

pub mod cache;
pub mod fetcher;
pub mod providers;
pub mod rate_limit;
pub mod retry;

pub use cache::TtlCache;
pub use fetcher::MarketDataService;
pub use providers::stub::StubProvider;
pub use providers::MarketDataProvider;
