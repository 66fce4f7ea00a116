// Basic types used throughout fundtrace
pub mod types;
// Error taxonomy shared by every upstream source
pub mod error;

// Pacing, cancellation and visit bookkeeping for a single crawl
pub mod cancellation;
pub mod rate_limiter;
pub mod visit;

// Main data source trait with a scripted in-memory source
pub mod data_sources;
// The blockchain.info connector lives in a separate module
pub mod blockchain_info;
// Module for building the transaction tree from a TransactionSource
pub mod traversal;

// Single-hop Ethereum flow against Etherscan
pub mod etherscan;

// Crawl configuration, loadable from TOML
pub mod config;

// Types and functions for summarizing a crawl
pub mod summary;

// Module with utility functions for assembling, exporting and measuring flow graphs
pub mod graph_utils;
