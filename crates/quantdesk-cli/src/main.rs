//! Command-line surface: `quantdesk <module> <capability> [key=value ...]`.
//! Arguments are handed to the dispatcher untyped; coercion and validation
//! happen against each capability's declared schema.

use anyhow::{bail, Context, Result};
use backtest_engine::BacktestStore;
use dispatcher::{build_registry, Dispatcher};
use engine_core::{RuntimeConfig, RuntimeContext};
use market_data::{MarketDataService, StubProvider};
use paper_trader::{PaperStore, PaperTrader, RebalanceSettings};
use serde_json::Value;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quantdesk=info,warn".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let dispatcher = bootstrap().await?;

    match args.first().map(String::as_str) {
        None | Some("modules") | Some("--help") | Some("-h") => {
            print_modules(&dispatcher);
            Ok(())
        }
        Some(module) => {
            let capability = args
                .get(1)
                .context("usage: quantdesk <module> <capability> [key=value ...]")?;
            let params = parse_params(&args[2..])?;
            let result = dispatcher.invoke(module, capability, &params).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.ok {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn bootstrap() -> Result<Dispatcher> {
    let config = RuntimeConfig::default();

    // QUANTDESK_OFFLINE=1 swaps the provider chain for the deterministic
    // stub; useful for demos and air-gapped runs.
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
    let ctx = RuntimeContext::new(fetcher, config);
    Ok(Dispatcher::new(registry, ctx))
}

/// `key=value` pairs into a JSON map. Values that parse as JSON (numbers,
/// arrays, objects) pass through typed; everything else stays a string for
/// the dispatcher to coerce.
fn parse_params(pairs: &[String]) -> Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("argument {pair:?} is not key=value"))?;
        if key.is_empty() {
            bail!("argument {pair:?} has an empty key");
        }
        let value = match raw.trim() {
            t if t.starts_with('{') || t.starts_with('[') => {
                serde_json::from_str(t).with_context(|| format!("argument {key}: bad JSON"))?
            }
            t => Value::String(t.to_string()),
        };
        map.insert(key.to_string(), value);
    }
    Ok(map)
}

fn print_modules(dispatcher: &Dispatcher) {
    println!("Available modules:");
    for (module, capabilities) in dispatcher.registry().list() {
        println!("  {module}: {}", capabilities.join(", "));
    }
    println!("\nusage: quantdesk <module> <capability> [key=value ...]");
}

#[cfg(test)]
mod tests {
    use super::parse_params;

    #[test]
    fn key_value_pairs_parse_with_json_passthrough() {
        let pairs = vec![
            "ticker=AAPL".to_string(),
            "paths=5000".to_string(),
            "grid={\"fast\":[5,10]}".to_string(),
        ];
        let map = parse_params(&pairs).unwrap();
        assert_eq!(map["ticker"], "AAPL");
        assert_eq!(map["paths"], "5000");
        assert!(map["grid"].is_object());
    }

    #[test]
    fn malformed_pair_is_an_error() {
        assert!(parse_params(&["nope".to_string()]).is_err());
        assert!(parse_params(&["=x".to_string()]).is_err());
    }
}
