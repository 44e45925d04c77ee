//! A multi-chain ERC-20 `Transfer` event indexer.
//!
//! The indexer tails one or more EVM-compatible chains, decodes `Transfer` log events for a
//! configured token per chain, maintains per-chain holder balances incrementally in an
//! embedded SQLite store, classifies holder addresses as externally-owned or contract, and
//! serves the resulting state over a small read-only HTTP API.
//!
//! # Modules
//!
//! - [`types`] — canonical address/amount wrapper types and the `Transfer` record.
//! - [`config`] — environment-driven configuration, chain-list resolution.
//! - [`store`] — the embedded relational store: transfers, balances, address types, sync state.
//! - [`rpc`] — JSON-RPC transport to the upstream node: block number, logs, batched `eth_getCode`.
//! - [`classifier`] — EOA/contract classification of addresses, smart-wallet allowlist.
//! - [`indexer`] — the per-chain backfill/tail-follow state machine.
//! - [`supervisor`] — launches and coordinates one indexer per configured chain.
//! - [`api`] — HTTP routes, handlers, and Prometheus metrics.
//! - [`telemetry`] — tracing/logging initialization.
//! - [`sig_down`] — graceful shutdown signal handling.

pub mod api;
pub mod classifier;
pub mod config;
pub mod indexer;
pub mod rpc;
pub mod sig_down;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod types;
