//! Per-chain backfill/tail-follow indexing state machine.
//!
//! Adaptive batch sizing with one-way shrink, atomic per-batch writes with the checkpoint
//! written last, and a crash-recovery rebuild invoked from `INITIALIZING` when the balances
//! table is empty but the checkpoint has already advanced past `start_block`.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classifier::AddressClassifier;
use crate::rpc::{MIN_BATCH, RpcClient, RpcError};
use crate::store::{Store, StoreError};
use crate::types::EvmAddress;

const TAIL_POLL_INTERVAL: Duration = Duration::from_secs(12);
const INTER_BATCH_PACING: Duration = Duration::from_millis(50);
const RANGE_ERROR_PAUSE: Duration = Duration::from_secs(1);
const GENERAL_ERROR_PAUSE: Duration = Duration::from_secs(5);
const CONSECUTIVE_ERROR_THRESHOLD: u32 = 3;

/// Recommended per-chain default batch sizes, observed from real provider limits.
pub fn default_batch_size(chain_id: i64, fallback: u64) -> u64 {
    match chain_id {
        1 => 1000,
        369 => 2000,
        8453 => 10000,
        146 => 10000,
        _ => fallback,
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexerState {
    Initializing,
    Backfill,
    TailFollow,
    Stopped,
}

pub struct ChainIndexer {
    chain_id: i64,
    token_address: EvmAddress,
    start_block: i64,
    store: Store,
    rpc: RpcClient,
    classifier: AddressClassifier,
    batch_size: u64,
    state: IndexerState,
}

impl ChainIndexer {
    pub fn new(
        chain_id: i64,
        token_address: EvmAddress,
        start_block: i64,
        store: Store,
        rpc: RpcClient,
        classifier: AddressClassifier,
        default_batch: u64,
    ) -> Self {
        Self {
            chain_id,
            token_address,
            start_block,
            store,
            rpc,
            classifier,
            batch_size: default_batch_size(chain_id, default_batch),
            state: IndexerState::Initializing,
        }
    }

    pub fn state(&self) -> IndexerState {
        self.state
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Runs until `cancellation` is triggered, observed only at safe points (between batches,
    /// between classification sub-batches). Never exits on a recoverable error category.
    pub async fn sync(&mut self, cancellation: CancellationToken) -> Result<(), IndexerError> {
        self.store.set_syncing(self.chain_id, true).await?;
        let result = self.run(&cancellation).await;
        // Best-effort: failing to clear the flag on the way out is not worse than the crash
        // this flag exists to detect.
        let _ = self.store.set_syncing(self.chain_id, false).await;
        self.state = IndexerState::Stopped;
        result
    }

    async fn run(&mut self, cancellation: &CancellationToken) -> Result<(), IndexerError> {
        self.initialize().await?;

        let mut consecutive_errors: u32 = 0;
        loop {
            if cancellation.is_cancelled() {
                break;
            }

            let current_block = match self.rpc.get_current_block().await {
                Ok(block) => block,
                Err(err) => {
                    warn!(chain_id = self.chain_id, error = %err, "failed to read chain head");
                    tokio::time::sleep(GENERAL_ERROR_PAUSE).await;
                    continue;
                }
            };
            let last_indexed = self.store.get_last_indexed_block(self.chain_id).await?;

            if (last_indexed as i128) < current_block as i128 {
                self.state = IndexerState::Backfill;
                match self
                    .index_blocks(last_indexed + 1, current_block as i64, &mut consecutive_errors, cancellation)
                    .await
                {
                    Ok(()) => {
                        self.classifier
                            .check_and_cache_address_types(self.chain_id, cancellation)
                            .await?;
                        self.classifier
                            .recheck_smart_wallets(self.chain_id, cancellation)
                            .await?;
                    }
                    Err(err) => {
                        warn!(chain_id = self.chain_id, error = %err, "backfill iteration failed");
                    }
                }
            } else {
                self.state = IndexerState::TailFollow;
                info!(chain_id = self.chain_id, last_indexed, "caught up, tail-following");
            }

            if cancellation.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(TAIL_POLL_INTERVAL) => {}
                _ = cancellation.cancelled() => {}
            }
        }
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), IndexerError> {
        let last_indexed = self.store.get_last_indexed_block(self.chain_id).await?;
        if last_indexed < self.start_block - 1 {
            self.store
                .update_last_indexed_block(self.chain_id, self.start_block - 1)
                .await?;
        }
        let last_indexed = self.store.get_last_indexed_block(self.chain_id).await?;
        let holder_count = self.store.get_holder_count(self.chain_id, false).await?;
        if holder_count == 0 && last_indexed >= self.start_block {
            info!(chain_id = self.chain_id, "rebuilding balances after suspected crash");
            self.store.rebuild_all_balances(self.chain_id).await?;
        }
        self.state = IndexerState::Backfill;
        Ok(())
    }

    /// Processes successive block ranges from `start` through `end_block`, each range sized by
    /// the current adaptive batch size. Returns once `last_indexed_block == end_block` or
    /// cancellation is observed between batches.
    async fn index_blocks(
        &mut self,
        start: i64,
        end_block: i64,
        consecutive_errors: &mut u32,
        cancellation: &CancellationToken,
    ) -> Result<(), IndexerError> {
        let mut current = start;
        while current <= end_block {
            if cancellation.is_cancelled() {
                return Ok(());
            }
            let batch_end = std::cmp::min(current + self.batch_size as i64 - 1, end_block);

            match self.process_batch(current, batch_end).await {
                Ok(()) => {
                    *consecutive_errors = 0;
                    current = batch_end + 1;
                    tokio::time::sleep(INTER_BATCH_PACING).await;
                }
                Err(IndexerError::Rpc(RpcError::RangeTooLarge(msg))) => {
                    self.batch_size = (self.batch_size / 2).max(MIN_BATCH);
                    warn!(chain_id = self.chain_id, new_batch_size = self.batch_size, error = %msg, "range too large, shrinking batch");
                    tokio::time::sleep(RANGE_ERROR_PAUSE).await;
                }
                Err(err) => {
                    *consecutive_errors += 1;
                    warn!(chain_id = self.chain_id, error = %err, consecutive_errors = *consecutive_errors, "batch failed");
                    if *consecutive_errors >= CONSECUTIVE_ERROR_THRESHOLD && self.batch_size > MIN_BATCH {
                        self.batch_size = (self.batch_size / 2).max(MIN_BATCH);
                    }
                    tokio::time::sleep(GENERAL_ERROR_PAUSE).await;
                }
            }
        }
        Ok(())
    }

    /// Steps 1-5 of §4.4's batch processing. The checkpoint (step 5) is written last so an
    /// interrupted batch is simply re-processed idempotently from step 3 on restart.
    async fn process_batch(&self, from_block: i64, to_block: i64) -> Result<(), IndexerError> {
        let logs = self
            .rpc
            .get_logs(from_block as u64, to_block as u64, self.token_address)
            .await?;
        self.store
            .insert_transfers(self.chain_id, &logs.transfers)
            .await?;
        self.store
            .update_balances_from_transfers(self.chain_id, &logs.transfers)
            .await?;
        self.store
            .update_last_indexed_block(self.chain_id, to_block)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_sizes_match_recommended_table() {
        assert_eq!(default_batch_size(1, 10000), 1000);
        assert_eq!(default_batch_size(369, 10000), 2000);
        assert_eq!(default_batch_size(8453, 10000), 10000);
        assert_eq!(default_batch_size(146, 10000), 10000);
        assert_eq!(default_batch_size(999, 7000), 7000);
    }

    #[tokio::test]
    async fn initialize_rebuilds_balances_after_suspected_crash() {
        let store = Store::open_in_memory().await.unwrap();
        let token = EvmAddress(alloy_primitives::Address::from([9u8; 20]));
        store
            .register_chain(1, "Ethereum", "http://localhost", token, 100)
            .await
            .unwrap();

        let zero = EvmAddress(crate::types::ZERO_ADDRESS);
        let mut bytes = [0u8; 20];
        bytes[19] = 1;
        let holder = EvmAddress(alloy_primitives::Address::from(bytes));
        let transfer = crate::types::Transfer {
            block_number: 100,
            tx_hash: "0xaa".to_string(),
            log_index: 0,
            from: zero,
            to: holder,
            value: crate::types::TokenAmount(alloy_primitives::U256::from(42u64)),
        };
        store.insert_transfers(1, &[transfer]).await.unwrap();
        // Simulate a crash between the transfer write and the balance write: checkpoint
        // advanced past start_block but balances table is still empty.
        store.update_last_indexed_block(1, 150).await.unwrap();

        let rpc = RpcClient::new(1, "http://localhost".to_string());
        let classifier =
            AddressClassifier::new(rpc.clone(), store.clone(), crate::types::default_smart_wallet_patterns());
        let mut indexer = ChainIndexer::new(1, token, 100, store.clone(), rpc, classifier, 10000);
        indexer.initialize().await.unwrap();

        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].balance.to_string(), "42");
    }
}
