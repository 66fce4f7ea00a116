use crate::types::*;
use anyhow::{Context, Result};
use petgraph::{algo::tarjan_scc, graph::NodeIndex, visit::EdgeRef};
use std::{
    collections::HashMap,
    fmt::Display,
    fs,
    hash::Hash,
    path::Path,
};

/// Turns a crawled `TransactionTree` into a `FlowGraph`.
///
/// Each output becomes a `Pays` edge from the transaction to the address, each
/// recorded spend a `SpentIn` edge from the address to the spending transaction,
/// so paths alternate between the two node kinds. A root without outputs ends up
/// as a lone node.
pub fn assemble_flow_graph(tree: &TransactionTree) -> FlowGraph {
    let mut graph = FlowGraph::new();
    let mut node_idx_map: HashMap<FlowNode, NodeIndex> = HashMap::new();

    for (tx, outputs) in tree.iter() {
        let tx_idx = node_index(&mut graph, &mut node_idx_map, FlowNode::Transaction(tx.clone()));
        for address in outputs {
            let address_idx =
                node_index(&mut graph, &mut node_idx_map, FlowNode::Address(address.clone()));
            graph.add_edge(tx_idx, address_idx, FlowEdge::Pays);
        }
    }

    for (address, children) in tree.spends() {
        let address_idx =
            node_index(&mut graph, &mut node_idx_map, FlowNode::Address(address.clone()));
        for child in children {
            let child_idx =
                node_index(&mut graph, &mut node_idx_map, FlowNode::Transaction(child.clone()));
            graph.add_edge(address_idx, child_idx, FlowEdge::SpentIn);
        }
    }

    graph
}

/// Builds the single-hop Ethereum view: one edge per transfer out of `receiver`.
pub fn assemble_transfer_graph(receiver: EthAddress, transfers: &[Transfer]) -> TransferGraph {
    let mut graph = TransferGraph::new();
    let mut node_idx_map: HashMap<EthAddress, NodeIndex> = HashMap::new();

    let receiver_idx = node_index(&mut graph, &mut node_idx_map, receiver);
    for transfer in transfers {
        let to_idx = node_index(&mut graph, &mut node_idx_map, transfer.to_address);
        graph.add_edge(receiver_idx, to_idx, transfer.edge());
    }

    graph
}

// Looks a node up, adding it to the graph the first time it's seen
fn node_index<N: Clone + Eq + Hash, E>(
    graph: &mut petgraph::Graph<N, E>,
    node_idx_map: &mut HashMap<N, NodeIndex>,
    node: N,
) -> NodeIndex {
    *node_idx_map
        .entry(node.clone())
        .or_insert_with(|| graph.add_node(node))
}

/// DOT rendering of a `FlowGraph`: transactions as boxes, addresses as ellipses.
///
/// Paste into `https://dreampuf.github.io/GraphvizOnline/?engine=dot` or feed to `dot`.
pub struct FlowGraphDot<'a>(pub &'a FlowGraph);

impl Display for FlowGraphDot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph FlowGraph {{")?;
        writeln!(f, "  edge [dir=forward];")?;
        writeln!(f)?;

        for node_idx in graph.node_indices() {
            let node = &graph[node_idx];
            let shape = if node.is_transaction() { "box" } else { "ellipse" };
            writeln!(
                f,
                "  \"{}\" [label=\"{}\" shape={} tooltip=\"{}\"];",
                node,
                short_label(node.as_str()),
                shape,
                node.as_str()
            )?;
        }

        writeln!(f)?;

        for edge in graph.edge_references() {
            writeln!(
                f,
                "  \"{}\" -> \"{}\" [label=\"{}\"];",
                graph[edge.source()],
                graph[edge.target()],
                edge.weight()
            )?;
        }

        writeln!(f, "}}")
    }
}

/// DOT rendering of a `TransferGraph`, edges labelled with amounts.
pub struct TransferGraphDot<'a>(pub &'a TransferGraph);

impl Display for TransferGraphDot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = self.0;
        writeln!(f, "digraph TransferGraph {{")?;
        writeln!(f, "  node [shape=ellipse];")?;
        writeln!(f, "  edge [dir=forward];")?;
        writeln!(f)?;

        for node_idx in graph.node_indices() {
            let address = graph[node_idx];
            writeln!(f, "  \"{:#x}\" [label=\"{:.12}...\"];", address, address.to_string())?;
        }

        writeln!(f)?;

        for edge in graph.edge_references() {
            let transfer = edge.weight();
            writeln!(
                f,
                "  \"{:#x}\" -> \"{:#x}\" [label=\"{}\\nBlock {}\" tooltip=\"Tx: {}\"];",
                graph[edge.source()],
                graph[edge.target()],
                transfer.label(),
                transfer.block_number,
                transfer.tx_hash
            )?;
        }

        writeln!(f, "}}")
    }
}

pub fn write_graph_to_dot(graph: &FlowGraph) -> String {
    FlowGraphDot(graph).to_string()
}

pub fn write_transfer_graph_to_dot(graph: &TransferGraph) -> String {
    TransferGraphDot(graph).to_string()
}

/// Writes a DOT string to `path`.
pub fn save_dot(dot: &str, path: &Path) -> Result<()> {
    fs::write(path, dot).with_context(|| format!("Failed to write DOT to {}", path.display()))
}

fn short_label(id: &str) -> String {
    const KEEP: usize = 12;
    if id.chars().count() <= KEEP + 4 {
        return id.to_string();
    }
    let mut label: String = id.chars().take(KEEP).collect();
    label.push_str("...");
    label
}

/// Strongly connected parts of the flow with more than one node: funds that came
/// back to where they had already been.
pub fn find_closed_loops(graph: &FlowGraph) -> Vec<FlowGraph> {
    let mut closed_loops = Vec::new();

    let mut components = tarjan_scc(graph);
    components.retain(|scc| scc.len() > 1);

    for scc in components {
        let mut index_mapping = HashMap::new();
        let mut loop_graph = FlowGraph::new();

        for node in &scc {
            let new_idx = loop_graph.add_node(graph[*node].clone());
            index_mapping.insert(*node, new_idx);
        }

        for edge in graph.edge_references() {
            if let (Some(source), Some(target)) =
                (index_mapping.get(&edge.source()), index_mapping.get(&edge.target()))
            {
                loop_graph.add_edge(*source, *target, *edge.weight());
            }
        }

        closed_loops.push(loop_graph);
    }

    closed_loops
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use std::collections::HashSet;

    fn edges(graph: &FlowGraph) -> HashSet<(String, String, FlowEdge)> {
        graph
            .edge_references()
            .map(|edge| {
                (
                    graph[edge.source()].to_string(),
                    graph[edge.target()].to_string(),
                    *edge.weight(),
                )
            })
            .collect()
    }

    #[test]
    fn alternates_transactions_and_addresses() {
        let mut tree = TransactionTree::new();
        tree.insert("R".into(), vec!["A".into(), "B".into()]);
        tree.record_spends("B".into(), vec!["C".into()]);
        tree.insert("C".into(), vec![]);

        let graph = assemble_flow_graph(&tree);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(
            edges(&graph),
            HashSet::from([
                ("tx:R".to_string(), "addr:A".to_string(), FlowEdge::Pays),
                ("tx:R".to_string(), "addr:B".to_string(), FlowEdge::Pays),
                ("addr:B".to_string(), "tx:C".to_string(), FlowEdge::SpentIn),
            ])
        );
    }

    #[test]
    fn root_without_outputs_is_a_lone_node() {
        let mut tree = TransactionTree::new();
        tree.insert("R".into(), vec![]);
        let graph = assemble_flow_graph(&tree);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn same_string_in_both_namespaces_gives_two_nodes() {
        let mut tree = TransactionTree::new();
        tree.insert("X".into(), vec!["X".into()]);
        let graph = assemble_flow_graph(&tree);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn repeated_outputs_are_parallel_edges() {
        let mut tree = TransactionTree::new();
        tree.insert("R".into(), vec!["A".into(), "A".into()]);
        let graph = assemble_flow_graph(&tree);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn finds_flow_that_returns_to_an_address() {
        let mut tree = TransactionTree::new();
        tree.insert("R".into(), vec!["A".into()]);
        tree.record_spends("A".into(), vec!["X".into()]);
        tree.insert("X".into(), vec!["A".into(), "B".into()]);

        let graph = assemble_flow_graph(&tree);
        let loops = find_closed_loops(&graph);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].node_count(), 2);
        assert_eq!(loops[0].edge_count(), 2);
    }

    #[test]
    fn dot_output_shapes_nodes_by_kind() {
        let mut tree = TransactionTree::new();
        let long_tx = "f".repeat(64);
        tree.insert(long_tx.clone().into(), vec!["1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into()]);
        let dot = write_graph_to_dot(&assemble_flow_graph(&tree));

        assert!(dot.starts_with("digraph FlowGraph {"));
        assert!(dot.contains(&format!("\"tx:{long_tx}\" [label=\"ffffffffffff...\" shape=box")));
        assert!(dot.contains("shape=ellipse"));
        assert!(dot.contains(&format!(
            "\"tx:{long_tx}\" -> \"addr:1BoatSLRHtKNngkdXEeobR76b53LETtpyT\" [label=\"pays\"];"
        )));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn transfer_graph_has_one_edge_per_transfer() {
        let receiver = EthAddress::repeat_byte(0x11);
        let to = EthAddress::repeat_byte(0x22);
        let transfer = Transfer {
            tx_hash: B256::repeat_byte(0xab),
            block_number: 7,
            timestamp: 100,
            from_address: receiver,
            to_address: to,
            token: None,
            symbol: "ETH".to_string(),
            decimals: 18,
            amount: U256::from(2_000_000_000_000_000_000u128),
        };
        let graph = assemble_transfer_graph(receiver, &[transfer.clone(), transfer]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);

        let dot = write_transfer_graph_to_dot(&graph);
        assert!(dot.contains("2.000000 ETH\\nBlock 7"));
    }
}
