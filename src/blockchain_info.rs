use crate::{
    data_sources::TransactionSource, error::SourceError, rate_limiter::RateLimiter, types::*,
};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, de::DeserializeOwned};
use std::{str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, warn};

pub const BLOCKCHAIN_INFO_URL: &str = "https://blockchain.info";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
// `/rawaddr` serves at most 50 transactions per page
const ADDRESS_PAGE_SIZE: usize = 50;
const MAX_ADDRESS_PAGES: usize = 20;

/// True for a 64 character hex string, the only shape a Bitcoin txid takes.
pub fn is_valid_transaction_hash_btc(tx_hash: &str) -> bool {
    tx_hash.len() == 64 && B256::from_str(tx_hash).is_ok()
}

/// BlockchainInfoSource
///
/// Bitcoin connector for the blockchain.info raw JSON API:
/// - `/rawtx/{txid}` for the outputs of a transaction
/// - `/rawaddr/{address}` for the transactions touching an address
///
/// Only transactions that spend from the address (it appears among their
/// inputs) count as its outgoing activity.
///
/// Busy addresses are paged with `offset`. The crawler paces the first page of
/// each lookup; later pages wait on the limiter given to `with_limiter`.
#[derive(Debug, Clone)]
pub struct BlockchainInfoSource {
    client: reqwest::Client,
    base_url: String,
    limiter: Option<Arc<RateLimiter>>,
    page_size: usize,
}

impl BlockchainInfoSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("fundtrace/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: None,
            page_size: ADDRESS_PAGE_SIZE,
        })
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String, what: &str) -> Result<T, SourceError> {
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, what));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Transient(format!("{what}: undecodable response: {e}")))
    }
}

#[async_trait]
impl TransactionSource for BlockchainInfoSource {
    async fn fetch_outputs(&self, tx: &TransactionId) -> Result<TransactionOutputs, SourceError> {
        if !is_valid_transaction_hash_btc(tx.as_str()) {
            return Err(SourceError::Malformed(format!(
                "{tx} is not a 64 character hex transaction hash"
            )));
        }
        let raw: RawTransaction = self
            .get_json(format!("{}/rawtx/{}", self.base_url, tx), &format!("transaction {tx}"))
            .await?;
        Ok(raw.output_addresses())
    }

    async fn fetch_outgoing(&self, address: &Address) -> Result<OutgoingActivity, SourceError> {
        if address.as_str().is_empty() || !address.as_str().chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SourceError::Malformed(format!("{address:?} is not a Bitcoin address")));
        }
        let what = format!("address {address}");
        let mut spending = Vec::new();
        let mut offset = 0;
        let mut total = 0;
        for page in 0..MAX_ADDRESS_PAGES {
            if page > 0 {
                if let Some(limiter) = &self.limiter {
                    limiter.acquire().await;
                }
            }
            let raw: RawAddress = self
                .get_json(
                    format!(
                        "{}/rawaddr/{}?limit={}&offset={}",
                        self.base_url, address, self.page_size, offset
                    ),
                    &what,
                )
                .await?;
            spending.extend(raw.spending_transactions(address));
            offset += raw.txs.len();
            total = raw.n_tx;
            if raw.txs.is_empty() || offset >= total {
                return Ok(spending);
            }
        }
        warn!(%address, fetched = offset, total, "Outgoing activity truncated");
        Ok(spending)
    }
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    #[serde(default)]
    inputs: Vec<RawInput>,
    #[serde(default)]
    out: Vec<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawInput {
    prev_out: Option<RawOutput>,
}

#[derive(Debug, Deserialize)]
struct RawOutput {
    addr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAddress {
    #[serde(default)]
    n_tx: usize,
    #[serde(default)]
    txs: Vec<RawTransaction>,
}

impl RawTransaction {
    // Outputs without an address (OP_RETURN and friends) are skipped
    fn output_addresses(&self) -> TransactionOutputs {
        self.out
            .iter()
            .filter_map(|output| output.addr.as_deref())
            .map(Address::from)
            .collect()
    }

    fn spends_from(&self, address: &Address) -> bool {
        self.inputs.iter().any(|input| {
            input
                .prev_out
                .as_ref()
                .and_then(|prev| prev.addr.as_deref())
                == Some(address.as_str())
        })
    }
}

impl RawAddress {
    fn spending_transactions(&self, address: &Address) -> OutgoingActivity {
        self.txs
            .iter()
            .filter(|tx| tx.spends_from(address))
            .map(|tx| TransactionId::from(tx.hash.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use axum::{
        Json, Router,
        extract::{Path, Query, State},
        routing::get,
    };
    use serde_json::{Value, json};
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tokio::net::TcpListener;

    type PageState = (usize, Arc<AtomicUsize>);

    // Serves `count` transactions spending from any address, one page per request
    async fn serve_address_pages(count: usize) -> (String, Arc<AtomicUsize>) {
        let requests = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/rawaddr/{address}", get(address_page))
            .with_state((count, requests.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (url, requests)
    }

    async fn address_page(
        State((count, requests)): State<PageState>,
        Path(address): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Json<Value> {
        requests.fetch_add(1, Ordering::SeqCst);
        let limit: usize = params["limit"].parse().unwrap();
        let offset: usize = params["offset"].parse().unwrap();
        let txs: Vec<Value> = (offset..count.min(offset + limit))
            .map(|i| {
                json!({
                    "hash": format!("spend{i}"),
                    "inputs": [{"prev_out": {"addr": address}}],
                    "out": []
                })
            })
            .collect();
        Json(json!({"address": address, "n_tx": count, "txs": txs}))
    }

    const TXID: &str = "b6f6991d03df0e2e04dafffcd6bc418aac66049e2cd74b80f14ac86db1e3f0da";

    #[test]
    fn validates_btc_hashes() {
        assert!(is_valid_transaction_hash_btc(TXID));
        assert!(!is_valid_transaction_hash_btc(&TXID[1..]));
        assert!(!is_valid_transaction_hash_btc(&format!("0x{}", &TXID[2..])));
        assert!(!is_valid_transaction_hash_btc(&TXID.replace('b', "z")));
    }

    #[test]
    fn outputs_skip_entries_without_address() {
        let raw: RawTransaction = serde_json::from_str(
            r#"{
                "hash": "r",
                "inputs": [],
                "out": [
                    {"addr": "1A", "value": 100, "n": 0},
                    {"script": "6a", "value": 0, "n": 1},
                    {"addr": "1B", "value": 50, "n": 2}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(raw.output_addresses(), vec![Address::from("1A"), Address::from("1B")]);
    }

    #[test]
    fn outgoing_activity_only_counts_spends() {
        let raw: RawAddress = serde_json::from_str(
            r#"{
                "address": "1A",
                "n_tx": 3,
                "txs": [
                    {"hash": "spend1", "inputs": [{"prev_out": {"addr": "1A"}}], "out": [{"addr": "1C"}]},
                    {"hash": "receive", "inputs": [{"prev_out": {"addr": "1Z"}}], "out": [{"addr": "1A"}]},
                    {"hash": "coinbase", "inputs": [{}], "out": [{"addr": "1A"}]},
                    {"hash": "spend2", "inputs": [{"prev_out": {"addr": "1Q"}}, {"prev_out": {"addr": "1A"}}], "out": []}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(
            raw.spending_transactions(&Address::from("1A")),
            vec![TransactionId::from("spend1"), TransactionId::from("spend2")]
        );
    }

    #[tokio::test]
    async fn malformed_ids_never_reach_the_network() {
        // Unroutable base URL: any request would fail as Transient, not Malformed.
        let source = BlockchainInfoSource::new("http://127.0.0.1:9").unwrap();
        let err = source
            .fetch_outputs(&TransactionId::from("not-a-hash"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);

        let err = source
            .fetch_outgoing(&Address::from("1A/../../x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn busy_addresses_are_paged_to_the_end() {
        let (url, requests) = serve_address_pages(120).await;
        let source = BlockchainInfoSource::new(url)
            .unwrap()
            .with_limiter(Arc::new(RateLimiter::unlimited()));

        let spends = source.fetch_outgoing(&Address::from("1A")).await.unwrap();

        assert_eq!(spends.len(), 120);
        assert_eq!(spends[0], TransactionId::from("spend0"));
        assert_eq!(spends[119], TransactionId::from("spend119"));
        assert_eq!(requests.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn paging_stops_at_the_page_cap() {
        let (url, requests) = serve_address_pages(MAX_ADDRESS_PAGES + 5).await;
        let mut source = BlockchainInfoSource::new(url).unwrap();
        source.page_size = 1;

        let spends = source.fetch_outgoing(&Address::from("1A")).await.unwrap();

        assert_eq!(spends.len(), MAX_ADDRESS_PAGES);
        assert_eq!(requests.load(Ordering::SeqCst), MAX_ADDRESS_PAGES);
    }
}
