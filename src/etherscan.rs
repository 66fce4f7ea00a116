use crate::{
    error::{BranchError, SourceError},
    graph_utils::assemble_transfer_graph,
    rate_limiter::RateLimiter,
    types::*,
};
use alloy_primitives::{
    B256, U256,
    aliases::{BlockNumber, TxHash},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, de::DeserializeOwned};
use std::{str::FromStr, time::Duration};
use tracing::{debug, info, warn};

pub const ETHERSCAN_URL: &str = "https://api.etherscan.io/api";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ETHER_DECIMALS: u8 = 18;

/// True for `0x` followed by 64 hex characters.
pub fn is_valid_transaction_hash_eth(tx_hash: &str) -> bool {
    tx_hash.len() == 66 && tx_hash.starts_with("0x") && B256::from_str(tx_hash).is_ok()
}

/// EtherscanClient
///
/// The handful of Etherscan endpoints the single-hop flow needs. Callers pace
/// requests themselves; see `trace_first_hop`.
#[derive(Debug, Clone)]
pub struct EtherscanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// A transaction as returned by `eth_getTransactionByHash`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcTransaction {
    pub hash: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    pub from: String,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: serde_json::Value,
    // JSON-RPC proxy failures come back here, without a `result`
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockReward {
    #[serde(rename = "timeStamp")]
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountTx {
    hash: String,
    block_number: String,
    time_stamp: String,
    from: String,
    to: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTx {
    hash: String,
    block_number: String,
    time_stamp: String,
    from: String,
    to: String,
    value: String,
    contract_address: String,
    token_symbol: String,
    token_decimal: String,
}

impl ApiResponse {
    fn failed(&self) -> bool {
        self.status.as_deref() == Some("0") || self.error.is_some()
    }

    // Etherscan puts the reason in `result` when a call fails
    fn error(&self, what: &str) -> SourceError {
        if let Some(rpc) = &self.error {
            return if rpc.message.to_ascii_lowercase().contains("rate limit") {
                SourceError::RateLimited(format!("{what}: {}", rpc.message))
            } else {
                SourceError::Transient(format!("{what}: JSON-RPC error {}: {}", rpc.code, rpc.message))
            };
        }
        let message = self.message.as_deref().unwrap_or_default();
        let reason = self.result.as_str().unwrap_or(message);
        if reason.to_ascii_lowercase().contains("rate limit") {
            SourceError::RateLimited(format!("{what}: {reason}"))
        } else {
            SourceError::Transient(format!("{what}: {message} {reason}"))
        }
    }

    /// List results; "No transactions found" is an empty list, not an error.
    fn into_list<T: DeserializeOwned>(self, what: &str) -> Result<Vec<T>, SourceError> {
        if self.failed() {
            let message = self.message.as_deref().unwrap_or_default();
            if message.starts_with("No transactions found")
                || self.result.as_str().is_some_and(|r| r.starts_with("No transactions found"))
            {
                return Ok(Vec::new());
            }
            return Err(self.error(what));
        }
        decode(self.result, what)
    }
}

fn decode<T: DeserializeOwned>(value: serde_json::Value, what: &str) -> Result<T, SourceError> {
    serde_json::from_value(value)
        .map_err(|e| SourceError::Transient(format!("{what}: undecodable response: {e}")))
}

fn parse_u64(value: &str, what: &str) -> Result<u64, SourceError> {
    let parsed = match value.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| SourceError::Transient(format!("{what}: bad number {value:?}: {e}")))
}

fn parse_address(value: &str, what: &str) -> Result<EthAddress, SourceError> {
    EthAddress::from_str(value)
        .map_err(|e| SourceError::Transient(format!("{what}: bad address {value:?}: {e}")))
}

fn parse_hash(value: &str, what: &str) -> Result<TxHash, SourceError> {
    B256::from_str(value)
        .map_err(|e| SourceError::Transient(format!("{what}: bad hash {value:?}: {e}")))
}

fn parse_amount(value: &str, what: &str) -> Result<U256, SourceError> {
    U256::from_str(value)
        .map_err(|e| SourceError::Transient(format!("{what}: bad amount {value:?}: {e}")))
}

impl AccountTx {
    fn into_transfer(self, what: &str) -> Result<Transfer, SourceError> {
        Ok(Transfer {
            tx_hash: parse_hash(&self.hash, what)?,
            block_number: parse_u64(&self.block_number, what)?,
            timestamp: parse_u64(&self.time_stamp, what)?,
            from_address: parse_address(&self.from, what)?,
            to_address: parse_address(&self.to, what)?,
            token: None,
            symbol: "ETH".to_string(),
            decimals: ETHER_DECIMALS,
            amount: parse_amount(&self.value, what)?,
        })
    }
}

impl TokenTx {
    fn into_transfer(self, what: &str) -> Result<Transfer, SourceError> {
        let decimals = self
            .token_decimal
            .parse::<u8>()
            .map_err(|e| SourceError::Transient(format!("{what}: bad token decimals: {e}")))?;
        Ok(Transfer {
            tx_hash: parse_hash(&self.hash, what)?,
            block_number: parse_u64(&self.block_number, what)?,
            timestamp: parse_u64(&self.time_stamp, what)?,
            from_address: parse_address(&self.from, what)?,
            to_address: parse_address(&self.to, what)?,
            token: Some(parse_address(&self.contract_address, what)?),
            symbol: self.token_symbol,
            decimals,
            amount: parse_amount(&self.value, what)?,
        })
    }
}

// Keeps transfers sent by `address` strictly after `after`
fn outgoing_after(transfers: Vec<Transfer>, address: EthAddress, after: u64) -> Vec<Transfer> {
    transfers
        .into_iter()
        .filter(|transfer| transfer.timestamp > after && transfer.from_address == address)
        .collect()
}

impl EtherscanClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    async fn call(&self, params: &[(&str, &str)], what: &str) -> Result<ApiResponse, SourceError> {
        debug!(?params, "Etherscan call");
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status, what));
        }
        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| SourceError::Transient(format!("{what}: undecodable response: {e}")))
    }

    pub async fn transaction(&self, tx_hash: &str) -> Result<RpcTransaction, SourceError> {
        if !is_valid_transaction_hash_eth(tx_hash) {
            return Err(SourceError::Malformed(format!(
                "{tx_hash} is not a 0x-prefixed 64 character hex hash"
            )));
        }
        let what = format!("transaction {tx_hash}");
        let response = self
            .call(
                &[
                    ("module", "proxy"),
                    ("action", "eth_getTransactionByHash"),
                    ("txhash", tx_hash),
                ],
                &what,
            )
            .await?;
        if response.failed() {
            return Err(response.error(&what));
        }
        if response.result.is_null() {
            return Err(SourceError::NotFound(what));
        }
        decode(response.result, &what)
    }

    pub async fn block_timestamp(&self, block_number: BlockNumber) -> Result<u64, SourceError> {
        let what = format!("block {block_number}");
        let block = block_number.to_string();
        let response = self
            .call(
                &[("module", "block"), ("action", "getblockreward"), ("blockno", &block)],
                &what,
            )
            .await?;
        if response.failed() {
            return Err(response.error(&what));
        }
        let reward: BlockReward = decode(response.result, &what)?;
        parse_u64(&reward.timestamp, &what)
    }

    /// Ether transactions sent from `address` strictly after `after` (unix seconds).
    pub async fn outgoing_transactions(
        &self,
        address: EthAddress,
        after: u64,
    ) -> Result<Vec<Transfer>, SourceError> {
        let what = format!("transactions of {address}");
        let transfers = self
            .account_list::<AccountTx>(address, "txlist", &what)
            .await?
            .into_iter()
            // contract creations have no recipient
            .filter(|tx| !tx.to.is_empty())
            .map(|tx| tx.into_transfer(&what))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outgoing_after(transfers, address, after))
    }

    /// ERC-20 transfers sent from `address` strictly after `after` (unix seconds).
    pub async fn token_transfers(
        &self,
        address: EthAddress,
        after: u64,
    ) -> Result<Vec<Transfer>, SourceError> {
        let what = format!("token transfers of {address}");
        let transfers = self
            .account_list::<TokenTx>(address, "tokentx", &what)
            .await?
            .into_iter()
            .map(|tx| tx.into_transfer(&what))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(outgoing_after(transfers, address, after))
    }

    async fn account_list<T: DeserializeOwned>(
        &self,
        address: EthAddress,
        action: &str,
        what: &str,
    ) -> Result<Vec<T>, SourceError> {
        let address = format!("{address:#x}");
        self.call(
            &[
                ("module", "account"),
                ("action", action),
                ("address", &address),
                ("startblock", "0"),
                ("endblock", "99999999"),
                ("sort", "asc"),
            ],
            what,
        )
        .await?
        .into_list(what)
    }
}

///
/// FirstHop
///
/// Where the receiver of a transaction sent funds afterwards.
///
/// A failed transfer list is left empty and its failure kept in `errors`.
///
#[derive(Debug, Clone)]
pub struct FirstHop {
    pub tx_hash: TxHash,
    pub receiver: EthAddress,
    pub block_number: BlockNumber,
    pub timestamp: u64,
    pub ether_transfers: Vec<Transfer>,
    pub token_transfers: Vec<Transfer>,
    pub errors: Vec<BranchError>,
}

impl FirstHop {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp as i64, 0)
    }

    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.ether_transfers.iter().chain(self.token_transfers.iter())
    }

    pub fn transfer_graph(&self) -> TransferGraph {
        let transfers: Vec<Transfer> = self.transfers().cloned().collect();
        assemble_transfer_graph(self.receiver, &transfers)
    }
}

/// Looks up `tx_hash`, its block time, then everything its receiver sent out after that.
///
/// Four paced calls, no recursion.
pub async fn trace_first_hop(
    client: &EtherscanClient,
    limiter: &RateLimiter,
    tx_hash: &str,
) -> Result<FirstHop, SourceError> {
    limiter.acquire().await;
    let tx = client.transaction(tx_hash).await?;
    let what = format!("transaction {tx_hash}");

    let block_number = match tx.block_number.as_deref() {
        Some(block) => parse_u64(block, &what)?,
        None => return Err(SourceError::NotFound(format!("{what} is still pending"))),
    };
    let receiver = match tx.to.as_deref() {
        Some(to) if !to.is_empty() => parse_address(to, &what)?,
        _ => {
            return Err(SourceError::NotFound(format!(
                "{what} has no receiver (contract creation)"
            )));
        }
    };

    limiter.acquire().await;
    let timestamp = client.block_timestamp(block_number).await?;
    info!(%receiver, block_number, timestamp, "Resolved first hop receiver");

    let mut errors = Vec::new();
    let node = Address::new(format!("{receiver:#x}"));

    limiter.acquire().await;
    let ether_transfers = match client.outgoing_transactions(receiver, timestamp).await {
        Ok(transfers) => transfers,
        Err(err) => {
            warn!(%receiver, error = %err, "Failed to fetch outgoing transactions");
            errors.push(BranchError::new(node.clone(), &err));
            Vec::new()
        }
    };
    limiter.acquire().await;
    let token_transfers = match client.token_transfers(receiver, timestamp).await {
        Ok(transfers) => transfers,
        Err(err) => {
            warn!(%receiver, error = %err, "Failed to fetch token transfers");
            errors.push(BranchError::new(node, &err));
            Vec::new()
        }
    };

    Ok(FirstHop {
        tx_hash: parse_hash(tx_hash, &what)?,
        receiver,
        block_number,
        timestamp,
        ether_transfers,
        token_transfers,
        errors,
    })
}
