//! Launches and coordinates one [`ChainIndexer`] per configured chain.
//!
//! `initialize()` registers every chain and builds one indexer per chain; `sync_all()` runs
//! them concurrently and isolates failures — one chain's indexer failing is logged, not
//! propagated to its siblings; `stop()` cancels all of them and waits for completion.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::classifier::AddressClassifier;
use crate::config::{ChainSettings, Config};
use crate::indexer::ChainIndexer;
use crate::rpc::RpcClient;
use crate::store::Store;

pub struct Supervisor {
    store: Store,
    chains: HashMap<i64, ChainSettings>,
    tracker: TaskTracker,
}

impl Supervisor {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            chains: HashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Registers every configured chain into the store.
    pub async fn initialize(&mut self, config: &Config) -> Result<(), crate::store::StoreError> {
        for chain in &config.chains {
            self.store
                .register_chain(
                    chain.chain_id,
                    &chain.chain_name,
                    &chain.rpc_url,
                    chain.token_address,
                    chain.start_block,
                )
                .await?;
            self.chains.insert(chain.chain_id, chain.clone());
        }
        Ok(())
    }

    pub fn chain_ids(&self) -> Vec<i64> {
        self.chains.keys().copied().collect()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Launches one task per registered chain and returns immediately; each task runs until
    /// `cancellation` fires. A chain's failure is logged and does not stop its siblings.
    pub fn sync_all(&mut self, default_batch_size: u64, cancellation: CancellationToken) {
        for (chain_id, settings) in self.chains.clone() {
            let store = self.store.clone();
            let token = settings.token_address;
            let start_block = settings.start_block;
            let rpc = RpcClient::new(chain_id, settings.rpc_url.clone());
            let classifier = AddressClassifier::new(
                rpc.clone(),
                store.clone(),
                crate::types::default_smart_wallet_patterns(),
            );
            let cancellation = cancellation.clone();
            self.tracker.spawn(async move {
                let mut indexer = ChainIndexer::new(
                    chain_id,
                    token,
                    start_block,
                    store,
                    rpc,
                    classifier,
                    default_batch_size,
                );
                info!(chain_id, "starting chain indexer");
                if let Err(err) = indexer.sync(cancellation).await {
                    error!(chain_id, error = %err, "chain indexer exited with an error");
                }
            });
        }
        self.tracker.close();
    }

    /// Waits for every chain indexer task to observe cancellation and finish.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    /// Signals every indexer via `cancellation` and waits for all of them to reach `STOPPED`.
    pub async fn stop(&self, cancellation: &CancellationToken) {
        cancellation.cancel();
        self.wait().await;
    }
}
