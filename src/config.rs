use crate::{blockchain_info::BLOCKCHAIN_INFO_URL, types::*};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use tracing::warn;

/// Depth beyond which a crawl of a busy address graph gets very large.
pub const MAX_RECOMMENDED_DEPTH: DepthBudget = 5;

/// Crawl parameters, loadable from TOML.
///
/// ```toml
/// seed_transaction_id = "b6f6991d03df0e2e04dafffcd6bc418aac66049e2cd74b80f14ac86db1e3f0da"
/// depth_budget = 2
/// min_request_interval_ms = 1000
/// crawl_timeout_secs = 600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CrawlConfig {
    /// Transaction to start from
    #[serde(default)]
    pub seed_transaction_id: Option<TransactionId>,

    /// Recursion levels below the seed (default: 1)
    #[serde(default = "default_depth_budget")]
    pub depth_budget: DepthBudget,

    /// Minimum spacing between upstream calls (default: 1000ms)
    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_ms: u64,

    /// Stop and keep the partial result after this long
    #[serde(default)]
    pub crawl_timeout_secs: Option<u64>,

    /// Block explorer API root
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            seed_transaction_id: None,
            depth_budget: default_depth_budget(),
            min_request_interval_ms: default_min_request_interval(),
            crawl_timeout_secs: None,
            base_url: default_base_url(),
        }
    }
}

impl CrawlConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse crawl config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn crawl_timeout(&self) -> Option<Duration> {
        self.crawl_timeout_secs.map(Duration::from_secs)
    }

    /// The seed transaction; a crawl can't start without one.
    pub fn seed(&self) -> Result<&TransactionId> {
        let seed = self
            .seed_transaction_id
            .as_ref()
            .context("No seed transaction id given")?;
        if self.depth_budget > MAX_RECOMMENDED_DEPTH {
            warn!(
                depth_budget = self.depth_budget,
                "Depth budget above {MAX_RECOMMENDED_DEPTH}; expect a long crawl"
            );
        }
        Ok(seed)
    }
}

fn default_depth_budget() -> DepthBudget {
    1
}
fn default_min_request_interval() -> u64 {
    1000
}
fn default_base_url() -> String {
    BLOCKCHAIN_INFO_URL.to_string()
}
