//! Multi-chain ERC-20 `Transfer` indexer entrypoint.
//!
//! This binary:
//! - loads configuration (chain list, database path, batch size, bind address),
//! - opens the embedded store and registers every configured chain,
//! - launches one `ChainIndexer` per chain concurrently under a `Supervisor`,
//! - spawns a background task refreshing Prometheus gauges every 15 s, and
//! - serves the read-only HTTP API until a shutdown signal is received, then waits for every
//!   chain indexer to reach `STOPPED`.

use std::collections::HashMap;
use std::net::SocketAddr;

use clap::Parser;

use erc20_indexer::api::{self, AppState};
use erc20_indexer::config::{CliArgs, Config};
use erc20_indexer::rpc::RpcClient;
use erc20_indexer::sig_down::SigDown;
use erc20_indexer::store::Store;
use erc20_indexer::supervisor::Supervisor;
use erc20_indexer::telemetry::Telemetry;

const METRICS_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();
    let _ = dotenvy::from_path(&cli_args.env_file);
    let telemetry = Telemetry::new().register();

    let config = Config::load()?;
    let store = Store::open(&config.database_path).await?;

    let mut supervisor = Supervisor::new(store.clone());
    supervisor.initialize(&config).await?;

    let rpc_clients: HashMap<i64, RpcClient> = config
        .chains
        .iter()
        .map(|chain| (chain.chain_id, RpcClient::new(chain.chain_id, chain.rpc_url.clone())))
        .collect();

    let sig_down = SigDown::try_new()?;
    let cancellation = sig_down.cancellation_token();

    supervisor.sync_all(config.default_batch_size, cancellation.clone());

    let state = AppState::new(store.clone(), rpc_clients);
    let metrics_task = {
        let state = state.clone();
        let chain_ids = supervisor.chain_ids();
        let cancellation = cancellation.clone();
        tokio::spawn(async move { run_metrics_refresh(state, chain_ids, cancellation).await })
    };

    let app = api::routes(state).layer(telemetry.http_tracing());
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, %addr, "failed to bind");
        std::process::exit(1);
    });

    let shutdown_signal = {
        let cancellation = cancellation.clone();
        async move { cancellation.cancelled().await }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    supervisor.stop(&cancellation).await;
    let _ = metrics_task.await;

    Ok(())
}

/// Refreshes the per-chain Prometheus gauges every 15 s.
async fn run_metrics_refresh(
    state: AppState,
    chain_ids: Vec<i64>,
    cancellation: tokio_util::sync::CancellationToken,
) {
    loop {
        for &chain_id in &chain_ids {
            let holders = state.store.get_holder_count(chain_id, false).await.unwrap_or(0);
            let transfers = state.store.get_transfer_count(chain_id).await.unwrap_or(0);
            let last_indexed = state.store.get_last_indexed_block(chain_id).await.unwrap_or(-1);
            let syncing = state.store.is_syncing(chain_id).await.unwrap_or(false);
            let head = match state.rpc_clients.get(&chain_id) {
                Some(client) => client.get_current_block().await.ok(),
                None => None,
            };
            let behind = head.map(|h| (h as i64 - last_indexed).max(0)).unwrap_or(0);
            state
                .metrics
                .set_chain_gauges(chain_id, holders, transfers, last_indexed, behind, syncing);
        }

        tokio::select! {
            _ = tokio::time::sleep(METRICS_REFRESH_INTERVAL) => {}
            _ = cancellation.cancelled() => break,
        }
    }
}
