pub use alloy_primitives::Address as EthAddress;
use alloy_primitives::{
    U256,
    aliases::{BlockNumber, TxHash},
};
use petgraph::{Directed, graph::Graph};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{Debug, Display},
};

///
/// TransactionId
///
/// Opaque identifier of a transaction as the upstream source spells it
/// (64 hex characters for Bitcoin).
///
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransactionId({})", self.0)
    }
}

impl Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

///
/// Address
///
/// Opaque recipient of funds. Lives in its own namespace: an `Address` never
/// compares equal to a `TransactionId`, even when the strings match.
///
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Destination addresses of a transaction, in output order.
pub type TransactionOutputs = Vec<Address>;

/// Transactions spending from an address, in the order the source lists them.
pub type OutgoingActivity = Vec<TransactionId>;

/// Remaining recursion levels. Each level down costs exactly one.
pub type DepthBudget = usize;

///
/// TransactionTree
///
/// What a crawl discovered: for every expanded transaction, the addresses it pays,
/// plus the spend relation (address -> transactions spending from it) observed on the way.
///
/// Keys keep their discovery order so that graphs and printouts come out stable.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionTree {
    outputs: HashMap<TransactionId, TransactionOutputs>,
    order: Vec<TransactionId>,
    spends: HashMap<Address, OutgoingActivity>,
    spend_order: Vec<Address>,
}

impl TransactionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outputs of `tx`. An existing entry is kept and `false` is returned.
    pub fn insert(&mut self, tx: TransactionId, outputs: TransactionOutputs) -> bool {
        if self.outputs.contains_key(&tx) {
            return false;
        }
        self.order.push(tx.clone());
        self.outputs.insert(tx, outputs);
        true
    }

    /// Records that `children` spend from `address`. A transaction is listed at most
    /// once per address, whether repeated within `children` or across calls.
    pub fn record_spends(&mut self, address: Address, children: OutgoingActivity) {
        if !self.spends.contains_key(&address) {
            self.spend_order.push(address.clone());
        }
        let listed = self.spends.entry(address).or_default();
        for child in children {
            if !listed.contains(&child) {
                listed.push(child);
            }
        }
    }

    pub fn get(&self, tx: &TransactionId) -> Option<&[Address]> {
        self.outputs.get(tx).map(Vec::as_slice)
    }

    pub fn contains(&self, tx: &TransactionId) -> bool {
        self.outputs.contains_key(tx)
    }

    pub fn spent_in(&self, address: &Address) -> Option<&[TransactionId]> {
        self.spends.get(address).map(Vec::as_slice)
    }

    /// Number of transactions recorded as keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Transactions and their outputs, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (&TransactionId, &[Address])> {
        self.order
            .iter()
            .map(move |tx| (tx, self.outputs[tx].as_slice()))
    }

    /// Addresses and the transactions spending from them, in discovery order.
    pub fn spends(&self) -> impl Iterator<Item = (&Address, &[TransactionId])> {
        self.spend_order
            .iter()
            .map(move |address| (address, self.spends[address].as_slice()))
    }
}

///
/// FlowNode
///
/// A node of the fund-flow graph. Transactions and addresses are tagged so the two
/// namespaces never collide.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FlowNode {
    Transaction(TransactionId),
    Address(Address),
}

impl FlowNode {
    pub fn as_str(&self) -> &str {
        match self {
            FlowNode::Transaction(tx) => tx.as_str(),
            FlowNode::Address(address) => address.as_str(),
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, FlowNode::Transaction(_))
    }
}

impl Display for FlowNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowNode::Transaction(tx) => write!(f, "tx:{tx}"),
            FlowNode::Address(address) => write!(f, "addr:{address}"),
        }
    }
}

impl From<TransactionId> for FlowNode {
    fn from(tx: TransactionId) -> Self {
        FlowNode::Transaction(tx)
    }
}

impl From<Address> for FlowNode {
    fn from(address: Address) -> Self {
        FlowNode::Address(address)
    }
}

///
/// FlowEdge
///
/// `Pays` runs from a transaction to one of its output addresses, `SpentIn` from an
/// address to a transaction spending from it.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowEdge {
    Pays,
    SpentIn,
}

impl Display for FlowEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowEdge::Pays => f.write_str("pays"),
            FlowEdge::SpentIn => f.write_str("spent in"),
        }
    }
}

///
/// FlowGraph
///
/// Directed multigraph handed to the renderer. Paths alternate between
/// transaction and address nodes.
pub type FlowGraph = Graph<FlowNode, FlowEdge, Directed>;

///
/// TransferGraph
///
/// Single-hop Ethereum view: nodes are EVM addresses, edges are transfers out of
/// the receiver. For edges, see `TransferEdge`.
pub type TransferGraph = Graph<EthAddress, TransferEdge, Directed>;

///
/// TransferEdge
///
/// The edge is a transfer with certain characteristics. `token` is `None` for ether.
///
#[derive(Clone)]
pub struct TransferEdge {
    pub amount: U256,
    pub decimals: u8,
    pub symbol: String,
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub token: Option<EthAddress>,
}

impl TransferEdge {
    /// Human readable amount, e.g. `1.500000 ETH`.
    pub fn label(&self) -> String {
        format!("{} {}", format_amount(self.amount, self.decimals), self.symbol)
    }
}

impl Debug for TransferEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TransferEdge {{ amount: {}, symbol: {}, tx_hash: {}, block_number: {} }}",
            self.amount, self.symbol, self.tx_hash, self.block_number
        )
    }
}

impl Display for TransferEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.label(), self.tx_hash)
    }
}

///
/// Transfer
///
/// A single outgoing ether or token transfer observed after the reference time.
///
#[derive(Clone)]
pub struct Transfer {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub timestamp: u64,
    pub from_address: EthAddress,
    pub to_address: EthAddress,
    pub token: Option<EthAddress>,
    pub symbol: String,
    pub decimals: u8,
    pub amount: U256,
}

impl Transfer {
    pub fn is_ether(&self) -> bool {
        self.token.is_none()
    }

    pub fn edge(&self) -> TransferEdge {
        TransferEdge {
            amount: self.amount,
            decimals: self.decimals,
            symbol: self.symbol.clone(),
            tx_hash: self.tx_hash,
            block_number: self.block_number,
            token: self.token,
        }
    }
}

impl Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Transfer {{ tx_hash: {}, block_number: {}, from_address: {}, to_address: {}, symbol: {}, amount: {} }}",
            self.tx_hash,
            self.block_number,
            self.from_address,
            self.to_address,
            self.symbol,
            self.amount
        )
    }
}

impl Display for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}: {} {}",
            self.from_address,
            self.to_address,
            format_amount(self.amount, self.decimals),
            self.symbol
        )
    }
}

/// Formats a raw integer amount with `decimals` implied decimal places, truncated to six.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    const SHOWN: usize = 6;
    let base = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / base;
    let fraction = (amount % base).to_string();
    let fraction = format!("{:0>width$}", fraction, width = decimals as usize);
    let mut shown: String = fraction.chars().take(SHOWN).collect();
    while shown.len() < SHOWN {
        shown.push('0');
    }
    format!("{whole}.{shown}")
}
