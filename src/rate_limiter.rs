use std::time::Duration;
use tokio::{
    sync::Mutex,
    time::{Instant, sleep_until},
};
use tracing::debug;

///
/// RateLimiter
///
/// Keeps consecutive upstream calls at least `min_interval` apart.
///
/// Every branch of a crawl shares one limiter, passed in by reference. Two limiters
/// never affect each other, so independent crawls keep their own pacing.
///
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_acquired: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_acquired: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the interval since the previous acquisition has passed.
    ///
    /// The first acquisition returns immediately. Dropping the future before it
    /// completes leaves the previous acquisition time untouched.
    pub async fn acquire(&self) {
        let mut last = self.last_acquired.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if Instant::now() < ready_at {
                debug!(wait_ms = (ready_at - Instant::now()).as_millis() as u64, "pacing upstream call");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
