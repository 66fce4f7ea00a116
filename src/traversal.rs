use crate::{
    cancellation::CrawlCancellation, data_sources::*, error::BranchError,
    rate_limiter::RateLimiter, types::*, visit::VisitTracker,
};
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, warn};

///
/// CrawlOutcome
///
/// Everything a crawl found, the failures it stepped around, and whether it was
/// cut short by cancellation. A crawl with no errors and no cancellation is complete.
///
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub tree: TransactionTree,
    pub errors: Vec<BranchError>,
    pub cancelled: bool,
}

impl CrawlOutcome {
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.errors.is_empty()
    }

    /// Nothing was found and nothing stopped the crawl early.
    pub fn found_nothing(&self) -> bool {
        self.tree.is_empty() && !self.cancelled
    }
}

// State owned by one crawl
struct Crawl {
    tracker: VisitTracker,
    outcome: CrawlOutcome,
}

///
/// TreeBuilder
///
/// Depth-first, pre-order crawl from a seed transaction: outputs of a transaction,
/// then the transactions spending from each of those addresses, and so on until
/// the depth budget runs out.
///
/// Failed lookups are recorded against the node and the crawl moves on.
///
pub struct TreeBuilder<'a, D: TransactionSource + ?Sized> {
    source: &'a D,
    limiter: &'a RateLimiter,
    cancellation: CrawlCancellation,
}

impl<'a, D: TransactionSource + ?Sized> TreeBuilder<'a, D> {
    pub fn new(source: &'a D, limiter: &'a RateLimiter) -> Self {
        Self {
            source,
            limiter,
            cancellation: CrawlCancellation::default(),
        }
    }

    pub fn with_cancellation(mut self, cancellation: CrawlCancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Crawls from `root` with a fresh `VisitTracker`.
    pub async fn build(&self, root: &TransactionId, depth: DepthBudget) -> CrawlOutcome {
        info!(%root, depth, "Starting crawl");
        let mut crawl = Crawl {
            tracker: VisitTracker::new(),
            outcome: CrawlOutcome::default(),
        };

        self.expand(&mut crawl, root.clone(), depth).await;

        let outcome = crawl.outcome;
        info!(
            transactions = outcome.tree.len(),
            errors = outcome.errors.len(),
            cancelled = outcome.cancelled,
            "Crawl finished"
        );
        outcome
    }

    fn expand<'b>(
        &'b self,
        crawl: &'b mut Crawl,
        tx: TransactionId,
        depth: DepthBudget,
    ) -> BoxFuture<'b, ()> {
        async move {
            if self.cancellation.is_cancelled() {
                crawl.outcome.cancelled = true;
                return;
            }
            if !crawl.tracker.should_expand(&tx) {
                debug!(%tx, "Already expanded");
                return;
            }

            if !self.pace(crawl).await {
                return;
            }
            let outputs = match self.source.fetch_outputs(&tx).await {
                Ok(outputs) => outputs,
                Err(err) => {
                    warn!(%tx, error = %err, "Failed to fetch transaction outputs");
                    crawl.outcome.tree.insert(tx.clone(), Vec::new());
                    crawl.outcome.errors.push(BranchError::new(tx, &err));
                    return;
                }
            };
            info!(%tx, depth, outputs = outputs.len(), "Expanded transaction");
            crawl.outcome.tree.insert(tx.clone(), outputs.clone());

            if depth == 0 {
                return;
            }

            for address in outputs {
                if !crawl.tracker.should_query(&address) {
                    debug!(%address, "Outgoing activity already fetched");
                    continue;
                }
                if !self.pace(crawl).await {
                    return;
                }
                let children = match self.source.fetch_outgoing(&address).await {
                    Ok(children) => children,
                    Err(err) => {
                        warn!(%address, error = %err, "Failed to fetch outgoing activity");
                        crawl.outcome.errors.push(BranchError::new(address, &err));
                        continue;
                    }
                };
                if children.is_empty() {
                    continue;
                }
                crawl.outcome.tree.record_spends(address, children.clone());

                for child in children {
                    self.expand(crawl, child, depth - 1).await;
                    if crawl.outcome.cancelled {
                        return;
                    }
                }
            }
        }
        .boxed()
    }

    // Waits for the limiter unless cancelled first; false means stop.
    async fn pace(&self, crawl: &mut Crawl) -> bool {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => {
                info!("Crawl cancelled, returning partial tree");
                crawl.outcome.cancelled = true;
                false
            }
            _ = self.limiter.acquire() => true,
        }
    }
}

/// Crawls from `root` without external cancellation.
pub async fn build_transaction_tree<D: TransactionSource + ?Sized>(
    source: &D,
    limiter: &RateLimiter,
    root: &TransactionId,
    depth: DepthBudget,
) -> CrawlOutcome {
    TreeBuilder::new(source, limiter).build(root, depth).await
}
