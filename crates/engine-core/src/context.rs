use std::sync::Arc;

use self::rand_seed::derive_seed;

use crate::config::RuntimeConfig;
use crate::traits::{Clock, DataFetcher, SystemClock};

/// Everything an invocation needs: the data layer, configuration and a
/// clock. Tests build isolated contexts with stub fetchers and fixed clocks
/// instead of reaching for process-wide state.
#[derive(Clone)]
pub struct RuntimeContext {
    pub fetcher: Arc<dyn DataFetcher>,
    pub config: Arc<RuntimeConfig>,
    pub clock: Arc<dyn Clock>,
}

impl RuntimeContext {
    pub fn new(fetcher: Arc<dyn DataFetcher>, config: RuntimeConfig) -> Self {
        Self {
            fetcher,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed for a stochastic computation: an explicit per-call seed wins,
    /// then the configured global seed, then a fixed fallback so repeated
    /// runs without any seed still agree with each other.
    pub fn seed_for(&self, explicit: Option<u64>, label: &str) -> u64 {
        match (explicit, self.config.rng_seed) {
            (Some(seed), _) => seed,
            (None, Some(global)) => derive_seed(global, label),
            (None, None) => derive_seed(0x51ed_ba5e, label),
        }
    }
}

mod rand_seed {
    /// Mix a label into a base seed so independent computations sharing one
    /// global seed do not see identical streams. FNV-1a over the label.
    pub fn derive_seed(base: u64, label: &str) -> u64 {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in label.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        base ^ hash
    }
}
