use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Early-termination signal for a crawl: an external token, an optional deadline, or both.
///
/// Cancellation is not a failure. The crawl stops and hands back what it has.
#[derive(Debug, Clone, Default)]
pub struct CrawlCancellation {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CrawlCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Resolves once the token fires or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cancellation_is_inactive() {
        assert!(!CrawlCancellation::new().is_cancelled());
    }

    #[test]
    fn token_cancels_every_clone() {
        let cancellation = CrawlCancellation::new();
        let observer = cancellation.clone();
        cancellation.cancel();
        assert!(observer.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires() {
        let cancellation = CrawlCancellation::new().with_timeout(Duration::from_secs(3));
        assert!(!cancellation.is_cancelled());
        cancellation.cancelled().await;
        assert!(cancellation.is_cancelled());
    }
}
