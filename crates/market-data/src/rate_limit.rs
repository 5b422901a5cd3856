use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket shared across workers. `acquire` blocks cooperatively until
/// a token is available; there is no fairness guarantee beyond the tokio
/// mutex queue.
#[derive(Clone)]
pub struct TokenBucket {
    state: Arc<Mutex<BucketState>>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_second: f64) -> Self {
        let capacity = requests_per_second.max(1.0);
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_per_sec: requests_per_second.max(0.1),
        }
    }

    /// Take one token, sleeping until the bucket refills when empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.refill_per_sec
            };
            tracing::debug!("rate limiter: waiting {:.2}s for a token", wait);
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
        }
    }
}
