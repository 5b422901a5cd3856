use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};

/// Cache TTLs per data tier, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtls {
    pub intraday: u64,
    pub eod: u64,
    pub fundamentals: u64,
    pub reference: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            intraday: 60,
            eod: 6 * 3600,
            fundamentals: 24 * 3600,
            reference: 7 * 24 * 3600,
        }
    }
}

/// Runtime configuration threaded through the dispatcher. Built from a flat
/// key/value map; unrecognized keys are rejected up front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub cache_ttl: CacheTtls,
    pub dispatcher_timeout_seconds: u64,
    pub dispatcher_worker_pool_size: usize,
    /// Requests per second per provider name.
    pub rate_limits: HashMap<String, f64>,
    pub retry_max_attempts: u32,
    pub retry_backoff_base_ms: u64,
    pub backtest_default_commission_bps: f64,
    pub backtest_default_slippage_bps: f64,
    pub paper_stop_loss_pct: f64,
    pub paper_pyramid_levels: Vec<f64>,
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_ttl: CacheTtls::default(),
            dispatcher_timeout_seconds: 60,
            dispatcher_worker_pool_size: 2 * num_cpus(),
            rate_limits: HashMap::new(),
            retry_max_attempts: 3,
            retry_backoff_base_ms: 500,
            backtest_default_commission_bps: 0.0,
            backtest_default_slippage_bps: 5.0,
            paper_stop_loss_pct: 0.15,
            paper_pyramid_levels: vec![0.15, 0.30],
            rng_seed: None,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl RuntimeConfig {
    /// Build a config from a flat key/value map. Unknown keys reject with
    /// `InvalidArgument` naming the offender.
    pub fn from_map(entries: &HashMap<String, String>) -> EngineResult<Self> {
        let mut cfg = Self::default();
        for (key, value) in entries {
            cfg.apply(key, value)?;
        }
        Ok(cfg)
    }

    fn apply(&mut self, key: &str, value: &str) -> EngineResult<()> {
        match key {
            "cache.ttl.intraday" => self.cache_ttl.intraday = parse(key, value)?,
            "cache.ttl.eod" => self.cache_ttl.eod = parse(key, value)?,
            "cache.ttl.fundamentals" => self.cache_ttl.fundamentals = parse(key, value)?,
            "cache.ttl.reference" => self.cache_ttl.reference = parse(key, value)?,
            "dispatcher.timeout_seconds" => self.dispatcher_timeout_seconds = parse(key, value)?,
            "dispatcher.worker_pool_size" => self.dispatcher_worker_pool_size = parse(key, value)?,
            "retry.max_attempts" => self.retry_max_attempts = parse(key, value)?,
            "retry.backoff_base_ms" => self.retry_backoff_base_ms = parse(key, value)?,
            "backtest.default_commission_bps" => {
                self.backtest_default_commission_bps = parse(key, value)?
            }
            "backtest.default_slippage_bps" => {
                self.backtest_default_slippage_bps = parse(key, value)?
            }
            "paper.stop_loss_pct" => self.paper_stop_loss_pct = parse(key, value)?,
            "paper.pyramid_levels" => {
                let levels: Result<Vec<f64>, _> =
                    value.split(',').map(|v| v.trim().parse::<f64>()).collect();
                self.paper_pyramid_levels = levels.map_err(|_| {
                    EngineError::InvalidArgument(format!("{key}: expected comma-separated floats"))
                })?;
            }
            "rng.seed" => self.rng_seed = Some(parse(key, value)?),
            _ => {
                if let Some(rest) = key.strip_prefix("rate_limit.") {
                    if let Some(provider) = rest.strip_suffix(".requests_per_second") {
                        self.rate_limits.insert(provider.to_string(), parse(key, value)?);
                        return Ok(());
                    }
                }
                return Err(EngineError::InvalidArgument(format!(
                    "unrecognized config key: {key}"
                )));
            }
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("{key}: cannot parse {value:?}")))
}
