use crate::{
    error::ErrorKind,
    etherscan::FirstHop,
    graph_utils::find_closed_loops,
    traversal::CrawlOutcome,
    types::*,
};
use std::collections::BTreeMap;
use std::fmt::Display;

/// CrawlSummary
///
/// Counts a presentation layer can show instead of the raw graph: how much was found,
/// what failed (by kind), and how many closed loops the flow contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub transactions: usize,
    pub addresses: usize,
    pub edges: usize,
    pub closed_loops: usize,
    pub errors_by_kind: BTreeMap<ErrorKind, usize>,
    pub failed_nodes: Vec<String>,
    pub cancelled: bool,
}

impl CrawlSummary {
    pub fn new(outcome: &CrawlOutcome, graph: &FlowGraph) -> Self {
        let transactions = graph
            .node_weights()
            .filter(|node| node.is_transaction())
            .count();

        let mut errors_by_kind = BTreeMap::new();
        for error in &outcome.errors {
            *errors_by_kind.entry(error.kind).or_insert(0) += 1;
        }

        Self {
            transactions,
            addresses: graph.node_count() - transactions,
            edges: graph.edge_count(),
            closed_loops: find_closed_loops(graph).len(),
            errors_by_kind,
            failed_nodes: outcome.errors.iter().map(|error| error.to_string()).collect(),
            cancelled: outcome.cancelled,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors_by_kind.values().sum()
    }
}

impl Display for CrawlSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} transactions, {} addresses, {} edges",
            self.transactions, self.addresses, self.edges
        )?;
        if self.closed_loops > 0 {
            writeln!(f, "{} closed loop(s) in the flow", self.closed_loops)?;
        }
        if self.cancelled {
            writeln!(f, "Crawl was cancelled; the tree is partial")?;
        }
        if !self.errors_by_kind.is_empty() {
            let counts: Vec<String> = self
                .errors_by_kind
                .iter()
                .map(|(kind, count)| format!("{count} {kind}"))
                .collect();
            writeln!(f, "{} branch error(s): {}", self.error_count(), counts.join(", "))?;
            for failed in &self.failed_nodes {
                writeln!(f, "  {failed}")?;
            }
        }
        Ok(())
    }
}

/// HopSummary
///
/// Printable account of a `FirstHop`.
pub struct HopSummary<'a>(pub &'a FirstHop);

impl Display for HopSummary<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hop = self.0;
        match hop.datetime() {
            Some(datetime) => writeln!(f, "Original transaction timestamp: {datetime}")?,
            None => writeln!(f, "Original transaction timestamp: {}", hop.timestamp)?,
        }
        writeln!(f, "Original receiver (R1) address: {}", hop.receiver)?;
        writeln!(
            f,
            "Outgoing ether transactions from R1 after the original timestamp: {}",
            hop.ether_transfers.len()
        )?;
        writeln!(
            f,
            "Outgoing token transfers from R1 after the original timestamp: {}",
            hop.token_transfers.len()
        )?;
        for transfer in hop.transfers() {
            writeln!(f, "  {transfer}")?;
        }
        if !hop.is_complete() {
            writeln!(f, "{} lookup(s) failed; the lists above are partial", hop.errors.len())?;
            for error in &hop.errors {
                writeln!(f, "  {error}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::BranchError, error::SourceError, graph_utils::assemble_flow_graph};

    #[test]
    fn counts_nodes_edges_and_errors() {
        let mut outcome = CrawlOutcome::default();
        outcome.tree.insert("R".into(), vec!["A".into(), "B".into()]);
        outcome.tree.record_spends("B".into(), vec!["C".into()]);
        outcome.tree.insert("C".into(), vec![]);
        outcome.errors.push(BranchError::new(
            TransactionId::from("C"),
            &SourceError::NotFound("gone".into()),
        ));
        outcome.errors.push(BranchError::new(
            Address::from("A"),
            &SourceError::RateLimited("slow down".into()),
        ));

        let graph = assemble_flow_graph(&outcome.tree);
        let summary = CrawlSummary::new(&outcome, &graph);

        assert_eq!(summary.transactions, 2);
        assert_eq!(summary.addresses, 2);
        assert_eq!(summary.edges, 3);
        assert_eq!(summary.closed_loops, 0);
        assert_eq!(summary.error_count(), 2);
        assert_eq!(summary.errors_by_kind[&ErrorKind::NotFound], 1);

        let printed = summary.to_string();
        assert!(printed.contains("2 transactions, 2 addresses, 3 edges"));
        assert!(printed.contains("1 not found, 1 rate limited"));
    }

    #[test]
    fn hop_summary_lists_failed_lookups() {
        let hop = FirstHop {
            tx_hash: Default::default(),
            receiver: EthAddress::ZERO,
            block_number: 1,
            timestamp: 0,
            ether_transfers: Vec::new(),
            token_transfers: Vec::new(),
            errors: vec![BranchError::new(
                Address::from("0x0000000000000000000000000000000000000000"),
                &SourceError::RateLimited("Max rate limit reached".into()),
            )],
        };

        let printed = HopSummary(&hop).to_string();
        assert!(printed.contains("1 lookup(s) failed"));
        assert!(printed.contains("(rate limited): Max rate limit reached"));
    }
}
