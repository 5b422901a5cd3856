//! HTTP surface: a thin axum layer that adapts requests into dispatcher
//! invocations and serializes the result envelope back. All domain logic
//! lives behind the dispatcher.

use anyhow::Result;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use backtest_engine::BacktestStore;
use dispatcher::{build_registry, Dispatcher, Invocation};
use engine_core::{RuntimeConfig, RuntimeContext};
use market_data::{MarketDataService, StubProvider};
use paper_trader::{PaperStore, PaperTrader, RebalanceSettings};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api_server=info,tower_http=info,warn".into()),
        )
        .init();

    let dispatcher = Arc::new(bootstrap().await?);

    let app = Router::new()
        .route("/health", get(health))
        .route("/v1/modules", get(list_modules))
        .route("/v1/invoke/:module/:capability", post(invoke))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher);

    let addr = std::env::var("QUANTDESK_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    tracing::info!("api-server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn bootstrap() -> Result<Dispatcher> {
    let config = RuntimeConfig::default();
    let service = if std::env::var("QUANTDESK_OFFLINE").ok().as_deref() == Some("1") {
        MarketDataService::new(&config).with_provider(Arc::new(StubProvider::new()))
    } else {
        MarketDataService::new(&config).with_default_providers()
    };
    let fetcher: Arc<dyn engine_core::DataFetcher> = Arc::new(service);

    let backtest_url = std::env::var("QUANTDESK_BACKTEST_DB")
        .unwrap_or_else(|_| "sqlite:quantdesk_backtests.db".to_string());
    let paper_url = std::env::var("QUANTDESK_PAPER_DB")
        .unwrap_or_else(|_| "sqlite:quantdesk_paper.db".to_string());

    let backtest_store = BacktestStore::new(&backtest_url)
        .await
        .map_err(|e| anyhow::anyhow!("open backtest store: {e}"))?;
    let paper_store = PaperStore::new(&paper_url)
        .await
        .map_err(|e| anyhow::anyhow!("open paper store: {e}"))?;
    let paper = Arc::new(PaperTrader::new(
        paper_store,
        RebalanceSettings::from_config(&config),
    ));

    let registry = build_registry(backtest_store, paper)
        .map_err(|e| anyhow::anyhow!("build registry: {e}"))?;
    Ok(Dispatcher::new(registry, RuntimeContext::new(fetcher, config)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_modules(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Value> {
    let modules: Vec<Value> = dispatcher
        .registry()
        .list()
        .into_iter()
        .map(|(module, capabilities)| json!({ "module": module, "capabilities": capabilities }))
        .collect();
    Json(json!({ "modules": modules }))
}

async fn invoke(
    State(dispatcher): State<Arc<Dispatcher>>,
    Path((module, capability)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Json<Invocation> {
    let params = body
        .and_then(|Json(v)| v.as_object().cloned())
        .unwrap_or_default();
    Json(dispatcher.invoke(&module, &capability, &params).await)
}
