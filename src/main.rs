use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use fundtrace::{
    blockchain_info::*, cancellation::*, config::*, etherscan::*, graph_utils::*,
    rate_limiter::RateLimiter, summary::*, traversal::*, types::TransactionId,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fundtrace", version, about = "Follow where the funds of a transaction went next")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the spends of a Bitcoin transaction's outputs, level by level
    Btc(BtcArgs),
    /// Show what the receiver of an Ethereum transaction sent out afterwards
    Eth(EthArgs),
}

#[derive(clap::Args, Debug)]
struct BtcArgs {
    /// Seed transaction (64 hex characters); may also come from the config file
    tx_hash: Option<String>,
    #[arg(short = 'd', long = "depth")]
    depth: Option<usize>,
    #[arg(long)]
    min_interval_ms: Option<u64>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the flow graph as Graphviz DOT to this file
    #[arg(long)]
    dot: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct EthArgs {
    /// Transaction hash, 0x followed by 64 hex characters
    tx_hash: String,
    #[arg(long, env = "ETHERSCAN_API_KEY", hide_env_values = true)]
    api_key: String,
    #[arg(long, default_value = ETHERSCAN_URL)]
    base_url: String,
    #[arg(long, default_value = "1000")]
    min_interval_ms: u64,
    #[arg(long)]
    dot: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting fundtrace");
    let args = Args::parse();
    match args.command {
        Command::Btc(args) => run_btc(args).await,
        Command::Eth(args) => run_eth(args).await,
    }
}

async fn run_btc(args: BtcArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CrawlConfig::load(path)?,
        None => CrawlConfig::default(),
    };
    if let Some(tx_hash) = args.tx_hash {
        config.seed_transaction_id = Some(TransactionId::from(tx_hash));
    }
    if let Some(depth) = args.depth {
        config.depth_budget = depth;
    }
    if let Some(interval) = args.min_interval_ms {
        config.min_request_interval_ms = interval;
    }
    if let Some(timeout) = args.timeout_secs {
        config.crawl_timeout_secs = Some(timeout);
    }

    let seed = config.seed()?.clone();
    if !is_valid_transaction_hash_btc(seed.as_str()) {
        bail!("Invalid Bitcoin transaction hash format: {seed}");
    }
    info!(%seed, depth = config.depth_budget, interval_ms = config.min_request_interval_ms, "Crawl parameters");

    let limiter = Arc::new(RateLimiter::new(config.min_request_interval()));
    let source = BlockchainInfoSource::new(config.base_url.clone())?.with_limiter(limiter.clone());
    let mut cancellation = CrawlCancellation::new();
    if let Some(timeout) = config.crawl_timeout() {
        cancellation = cancellation.with_timeout(timeout);
    }

    let token = cancellation.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing with the partial tree");
            token.cancel();
        }
    });

    let outcome = TreeBuilder::new(&source, &limiter)
        .with_cancellation(cancellation)
        .build(&seed, config.depth_budget)
        .await;

    let graph = assemble_flow_graph(&outcome.tree);
    info!(
        "Graph has {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    for (tx, outputs) in outcome.tree.iter() {
        println!("{tx}");
        for address in outputs {
            println!("  -> {address}");
        }
    }
    print!("{}", CrawlSummary::new(&outcome, &graph));

    if let Some(path) = &args.dot {
        save_dot(&write_graph_to_dot(&graph), path)?;
        info!("Wrote DOT graph to {}", path.display());
    }

    if outcome.found_nothing() {
        bail!("Failed to build the transaction tree");
    }
    Ok(())
}

async fn run_eth(args: EthArgs) -> Result<()> {
    if !is_valid_transaction_hash_eth(&args.tx_hash) {
        bail!(
            "Invalid Ethereum transaction hash format: {} (expected 0x followed by 64 hex characters)",
            args.tx_hash
        );
    }

    let client = EtherscanClient::new(args.base_url, args.api_key)?;
    let limiter = RateLimiter::new(std::time::Duration::from_millis(args.min_interval_ms));
    let hop = trace_first_hop(&client, &limiter, &args.tx_hash).await?;

    print!("{}", HopSummary(&hop));

    if let Some(path) = &args.dot {
        save_dot(&write_transfer_graph_to_dot(&hop.transfer_graph()), path)?;
        info!("Wrote DOT graph to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn btc_depth_flag() {
        let args = Args::try_parse_from(["fundtrace", "btc", "abc", "--depth", "3"]).unwrap();
        let Command::Btc(btc) = args.command else {
            panic!("expected the btc subcommand");
        };
        assert_eq!(btc.depth, Some(3));

        let args = Args::try_parse_from(["fundtrace", "btc", "abc", "-d", "2"]).unwrap();
        let Command::Btc(btc) = args.command else {
            panic!("expected the btc subcommand");
        };
        assert_eq!(btc.depth, Some(2));
    }
}
