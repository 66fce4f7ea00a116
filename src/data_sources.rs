use crate::{error::*, types::*};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// TransactionSource
///
/// A generic trait across different data sources.
///
/// Both lookups are pure reads and safe to repeat. Retrying is left to the
/// implementation; the crawler calls each at most once per node.
///
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Destination addresses of `tx`, in output order.
    async fn fetch_outputs(&self, tx: &TransactionId) -> Result<TransactionOutputs, SourceError>;

    /// Transactions spending from `address`.
    async fn fetch_outgoing(&self, address: &Address) -> Result<OutgoingActivity, SourceError>;
}

/// ScriptedSource
///
/// In-memory source answering from canned responses, with a log of every lookup.
///
/// Unknown transactions are `NotFound`; unknown addresses have no outgoing activity.
///
#[derive(Debug, Default)]
pub struct ScriptedSource {
    outputs: HashMap<TransactionId, Result<TransactionOutputs, ErrorKind>>,
    outgoing: HashMap<Address, Result<OutgoingActivity, ErrorKind>>,
    calls: Mutex<Vec<FlowNode>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outputs(mut self, tx: &str, outputs: &[&str]) -> Self {
        let outputs = outputs.iter().map(|address| Address::from(*address)).collect();
        self.outputs.insert(tx.into(), Ok(outputs));
        self
    }

    pub fn with_outgoing(mut self, address: &str, txs: &[&str]) -> Self {
        let txs = txs.iter().map(|tx| TransactionId::from(*tx)).collect();
        self.outgoing.insert(address.into(), Ok(txs));
        self
    }

    pub fn with_outputs_error(mut self, tx: &str, kind: ErrorKind) -> Self {
        self.outputs.insert(tx.into(), Err(kind));
        self
    }

    pub fn with_outgoing_error(mut self, address: &str, kind: ErrorKind) -> Self {
        self.outgoing.insert(address.into(), Err(kind));
        self
    }

    /// Every lookup made so far, in call order.
    pub fn calls(&self) -> Vec<FlowNode> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// How many times the outputs of `tx` were fetched.
    pub fn output_fetches(&self, tx: &str) -> usize {
        let node = FlowNode::Transaction(tx.into());
        self.calls().iter().filter(|call| **call == node).count()
    }

    fn log(&self, node: FlowNode) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node);
    }
}

#[async_trait]
impl TransactionSource for ScriptedSource {
    async fn fetch_outputs(&self, tx: &TransactionId) -> Result<TransactionOutputs, SourceError> {
        self.log(FlowNode::Transaction(tx.clone()));
        match self.outputs.get(tx) {
            Some(Ok(outputs)) => Ok(outputs.clone()),
            Some(Err(kind)) => Err(SourceError::new(*kind, format!("scripted failure for {tx}"))),
            None => Err(SourceError::NotFound(format!("no scripted transaction {tx}"))),
        }
    }

    async fn fetch_outgoing(&self, address: &Address) -> Result<OutgoingActivity, SourceError> {
        self.log(FlowNode::Address(address.clone()));
        match self.outgoing.get(address) {
            Some(Ok(txs)) => Ok(txs.clone()),
            Some(Err(kind)) => Err(SourceError::new(
                *kind,
                format!("scripted failure for {address}"),
            )),
            None => Ok(Vec::new()),
        }
    }
}
