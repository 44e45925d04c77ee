//! The embedded relational store.
//!
//! Backed by a single SQLite file opened in WAL journal mode (`journal_mode=WAL`,
//! `synchronous=NORMAL`, `cache_size=-64000`, `temp_store=MEMORY`). One [`sqlx::SqlitePool`] is
//! shared by every chain indexer and the HTTP read path; writes are serialized by the pool's
//! single writer connection, readers proceed concurrently under WAL.
//!
//! Schema: `chains`, `transfers`, `address_types`, `balances`, `sync_state`, plus indexes on
//! `transfers(chain_id, from)`, `transfers(chain_id, to)`, `transfers(chain_id, block_number)`,
//! and `balances(chain_id, balance)`.

use std::str::FromStr;

use alloy_primitives::Address;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::types::{EvmAddress, TokenAmount, Transfer, ZERO_ADDRESS};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid address stored: {0}")]
    InvalidAddress(String),
    #[error("invalid balance stored: {0}")]
    InvalidBalance(String),
}

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone, Debug)]
pub struct ChainRecord {
    pub chain_id: i64,
    pub name: String,
    pub rpc_url: String,
    pub token_address: EvmAddress,
    pub start_block: i64,
    pub is_active: bool,
}

#[derive(Clone, Debug)]
pub struct HolderRow {
    pub address: EvmAddress,
    pub balance: TokenAmount,
}

#[derive(Clone, Debug, Default)]
pub struct SyncStateRow {
    pub last_indexed_block: i64,
    pub is_syncing: bool,
    pub last_balance_update_block: i64,
}

/// The embedded store. Clone is cheap: [`sqlx::SqlitePool`] is an `Arc`-backed connection pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if absent) the SQLite database at `path`, applies WAL pragmas, and runs
    /// the schema migration. `path` may be `:memory:`-style via [`Store::open_in_memory`] for
    /// tests.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let options = SqliteConnectOptions::from_str(path)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// An in-memory store for tests: no file, no WAL (SQLite memory DBs don't support it), but
    /// otherwise the same schema and operations.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chains (
                chain_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                rpc_url TEXT NOT NULL,
                token_address TEXT NOT NULL,
                start_block INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfers (
                chain_id INTEGER NOT NULL,
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (chain_id, tx_hash, log_index)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(chain_id, from_address);",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(chain_id, to_address);",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers(chain_id, block_number);",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS address_types (
                chain_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                is_eoa INTEGER NOT NULL,
                PRIMARY KEY (chain_id, address)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                chain_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                balance TEXT NOT NULL,
                PRIMARY KEY (chain_id, address)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_balances_sort ON balances(chain_id, CAST(balance AS INTEGER) DESC);",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_state (
                chain_id INTEGER PRIMARY KEY,
                last_indexed_block INTEGER NOT NULL,
                is_syncing INTEGER NOT NULL DEFAULT 0,
                last_balance_update_block INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- Chain operations ----------------------------------------------------------------

    pub async fn register_chain(
        &self,
        chain_id: i64,
        name: &str,
        rpc_url: &str,
        token_address: EvmAddress,
        start_block: i64,
    ) -> Result<()> {
        let token = token_address.to_string();
        sqlx::query(
            r#"
            INSERT INTO chains (chain_id, name, rpc_url, token_address, start_block, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            ON CONFLICT(chain_id) DO UPDATE SET
                name = excluded.name,
                rpc_url = excluded.rpc_url,
                token_address = excluded.token_address,
                start_block = excluded.start_block,
                is_active = 1
            "#,
        )
        .bind(chain_id)
        .bind(name)
        .bind(rpc_url)
        .bind(&token)
        .bind(start_block)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_state (chain_id, last_indexed_block, is_syncing, last_balance_update_block)
            VALUES (?1, ?2, 0, 0)
            ON CONFLICT(chain_id) DO NOTHING
            "#,
        )
        .bind(chain_id)
        .bind(start_block - 1)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_all_chains(&self) -> Result<Vec<ChainRecord>> {
        let rows = sqlx::query(
            "SELECT chain_id, name, rpc_url, token_address, start_block, is_active FROM chains WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_chain).collect()
    }

    pub async fn get_chain_config(&self, chain_id: i64) -> Result<Option<ChainRecord>> {
        let row = sqlx::query(
            "SELECT chain_id, name, rpc_url, token_address, start_block, is_active FROM chains WHERE chain_id = ?1",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_chain).transpose()
    }

    fn row_to_chain(row: sqlx::sqlite::SqliteRow) -> Result<ChainRecord> {
        let token_address: String = row.try_get("token_address")?;
        let token_address = Address::from_str(&token_address)
            .map(EvmAddress)
            .map_err(|_| StoreError::InvalidAddress(token_address))?;
        Ok(ChainRecord {
            chain_id: row.try_get("chain_id")?,
            name: row.try_get("name")?,
            rpc_url: row.try_get("rpc_url")?,
            token_address,
            start_block: row.try_get("start_block")?,
            is_active: row.try_get::<i64, _>("is_active")? != 0,
        })
    }

    // ---- Transfer operations ---------------------------------------------------------------

    /// Bulk, idempotent insert keyed by `(chain_id, tx_hash, log_index)`. Does not touch
    /// balances — callers must also call [`Store::update_balances_from_transfers`] in the same
    /// batch to preserve I1.
    pub async fn insert_transfers(&self, chain_id: i64, items: &[Transfer]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO transfers
                    (chain_id, tx_hash, log_index, block_number, from_address, to_address, value)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(chain_id)
            .bind(&item.tx_hash)
            .bind(item.log_index as i64)
            .bind(item.block_number as i64)
            .bind(item.from.to_string())
            .bind(item.to.to_string())
            .bind(item.value.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Applies the net per-address delta of `items` (skipping ZERO on either side) to
    /// `balances`: `new = current + delta`; deletes the row if `new <= 0`, else upserts.
    pub async fn update_balances_from_transfers(
        &self,
        chain_id: i64,
        items: &[Transfer],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        use std::collections::HashMap;
        use num_bigint::BigInt;

        // `value` is an unbounded-width uint256 (up to `U256::MAX`), so the signed per-address
        // delta is accumulated in `BigInt` rather than a fixed-width signed integer — a 256-bit
        // signed type would clamp or overflow on values in the top half of `U256`'s range.
        let mut deltas: HashMap<EvmAddress, BigInt> = HashMap::new();
        for item in items {
            let value = BigInt::from_str(&item.value.to_string())
                .expect("TokenAmount always renders as decimal digits");
            if item.to.0 != ZERO_ADDRESS {
                *deltas.entry(item.to).or_insert_with(|| BigInt::from(0)) += value.clone();
            }
            if item.from.0 != ZERO_ADDRESS {
                *deltas.entry(item.from).or_insert_with(|| BigInt::from(0)) -= value;
            }
        }

        let mut tx = self.pool.begin().await?;
        for (address, delta) in deltas {
            let current: Option<String> =
                sqlx::query_scalar("SELECT balance FROM balances WHERE chain_id = ?1 AND address = ?2")
                    .bind(chain_id)
                    .bind(address.to_string())
                    .fetch_optional(&mut *tx)
                    .await?;
            let current = match current {
                Some(text) => BigInt::from_str(&text)
                    .map_err(|_| StoreError::InvalidBalance(text.clone()))?,
                None => BigInt::from(0),
            };
            let new_balance = current + delta;
            if new_balance <= BigInt::from(0) {
                sqlx::query("DELETE FROM balances WHERE chain_id = ?1 AND address = ?2")
                    .bind(chain_id)
                    .bind(address.to_string())
                    .execute(&mut *tx)
                    .await?;
            } else {
                sqlx::query(
                    r#"
                    INSERT INTO balances (chain_id, address, balance) VALUES (?1, ?2, ?3)
                    ON CONFLICT(chain_id, address) DO UPDATE SET balance = excluded.balance
                    "#,
                )
                .bind(chain_id)
                .bind(address.to_string())
                .bind(new_balance.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Recomputes `balances` for `chain_id` from scratch via signed sum over all transfers
    /// (excluding ZERO on both sides), retaining only strictly positive balances. Used by the
    /// crash-recovery path in `INITIALIZING`.
    pub async fn rebuild_all_balances(&self, chain_id: i64) -> Result<()> {
        use std::collections::HashMap;
        use num_bigint::BigInt;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM balances WHERE chain_id = ?1")
            .bind(chain_id)
            .execute(&mut *tx)
            .await?;

        let rows = sqlx::query("SELECT from_address, to_address, value FROM transfers WHERE chain_id = ?1")
            .bind(chain_id)
            .fetch_all(&mut *tx)
            .await?;

        let mut balances: HashMap<String, BigInt> = HashMap::new();
        for row in rows {
            let from: String = row.try_get("from_address")?;
            let to: String = row.try_get("to_address")?;
            let value_text: String = row.try_get("value")?;
            // Parsed straight from the stored decimal text into an unbounded-width `BigInt` —
            // no fixed-width signed intermediate, so no value in `U256`'s range is ever clamped.
            let value = BigInt::from_str(&value_text)
                .map_err(|_| StoreError::InvalidBalance(value_text.clone()))?;
            let zero = EvmAddress(ZERO_ADDRESS).to_string();
            if to != zero {
                *balances.entry(to).or_insert_with(|| BigInt::from(0)) += value.clone();
            }
            if from != zero {
                *balances.entry(from).or_insert_with(|| BigInt::from(0)) -= value;
            }
        }

        for (address, balance) in balances {
            if balance > BigInt::from(0) {
                sqlx::query(
                    "INSERT INTO balances (chain_id, address, balance) VALUES (?1, ?2, ?3)",
                )
                .bind(chain_id)
                .bind(&address)
                .bind(balance.to_string())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    // ---- Sync state -------------------------------------------------------------------------

    pub async fn get_last_indexed_block(&self, chain_id: i64) -> Result<i64> {
        let block: Option<i64> =
            sqlx::query_scalar("SELECT last_indexed_block FROM sync_state WHERE chain_id = ?1")
                .bind(chain_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(block.unwrap_or(-1))
    }

    /// Updates `last_indexed_block` only if `n` is not smaller than the current value (I3).
    pub async fn update_last_indexed_block(&self, chain_id: i64, n: i64) -> Result<()> {
        sqlx::query(
            "UPDATE sync_state SET last_indexed_block = ?2 WHERE chain_id = ?1 AND last_indexed_block <= ?2",
        )
        .bind(chain_id)
        .bind(n)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_syncing(&self, chain_id: i64, syncing: bool) -> Result<()> {
        sqlx::query("UPDATE sync_state SET is_syncing = ?2 WHERE chain_id = ?1")
            .bind(chain_id)
            .bind(syncing as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn is_syncing(&self, chain_id: i64) -> Result<bool> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT is_syncing FROM sync_state WHERE chain_id = ?1")
                .bind(chain_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.unwrap_or(0) != 0)
    }

    pub async fn is_any_syncing(&self) -> Result<bool> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM sync_state WHERE is_syncing = 1 LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.is_some())
    }

    // ---- Address classification ------------------------------------------------------------

    /// Distinct addresses appearing as `from` or `to` in this chain's transfers, excluding
    /// ZERO, with no row yet in `address_types`.
    pub async fn get_unchecked_addresses(&self, chain_id: i64) -> Result<Vec<EvmAddress>> {
        let zero = EvmAddress(ZERO_ADDRESS).to_string();
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT addr FROM (
                SELECT from_address AS addr FROM transfers WHERE chain_id = ?1
                UNION
                SELECT to_address AS addr FROM transfers WHERE chain_id = ?1
            )
            WHERE addr != ?2
            AND addr NOT IN (SELECT address FROM address_types WHERE chain_id = ?1)
            "#,
        )
        .bind(chain_id)
        .bind(&zero)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let addr: String = row.try_get("addr")?;
                Address::from_str(&addr)
                    .map(EvmAddress)
                    .map_err(|_| StoreError::InvalidAddress(addr))
            })
            .collect()
    }

    pub async fn batch_set_address_types(
        &self,
        chain_id: i64,
        items: &[(EvmAddress, bool)],
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (address, is_eoa) in items {
            sqlx::query(
                r#"
                INSERT INTO address_types (chain_id, address, is_eoa) VALUES (?1, ?2, ?3)
                ON CONFLICT(chain_id, address) DO UPDATE SET is_eoa = excluded.is_eoa
                "#,
            )
            .bind(chain_id)
            .bind(address.to_string())
            .bind(*is_eoa as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Addresses classified as contract, for [`crate::classifier::AddressClassifier::recheck`].
    pub async fn get_contract_addresses(&self, chain_id: i64) -> Result<Vec<EvmAddress>> {
        let rows = sqlx::query(
            "SELECT address FROM address_types WHERE chain_id = ?1 AND is_eoa = 0",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let addr: String = row.try_get("address")?;
                Address::from_str(&addr)
                    .map(EvmAddress)
                    .map_err(|_| StoreError::InvalidAddress(addr))
            })
            .collect()
    }

    // ---- Read queries -------------------------------------------------------------------------

    /// Holders ordered by balance descending (numeric, not lexicographic).
    pub async fn get_holders_with_balances(
        &self,
        chain_id: i64,
        eoa_only: bool,
    ) -> Result<Vec<HolderRow>> {
        let rows = if eoa_only {
            sqlx::query(
                r#"
                SELECT b.address AS address, b.balance AS balance
                FROM balances b
                INNER JOIN address_types a ON a.chain_id = b.chain_id AND a.address = b.address
                WHERE b.chain_id = ?1 AND a.is_eoa = 1
                ORDER BY CAST(b.balance AS INTEGER) DESC
                "#,
            )
            .bind(chain_id)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT address, balance FROM balances
                WHERE chain_id = ?1
                ORDER BY CAST(balance AS INTEGER) DESC
                "#,
            )
            .bind(chain_id)
            .fetch_all(&self.pool)
            .await?
        };
        rows.into_iter()
            .map(|row| {
                let address: String = row.try_get("address")?;
                let balance: String = row.try_get("balance")?;
                let address = Address::from_str(&address)
                    .map(EvmAddress)
                    .map_err(|_| StoreError::InvalidAddress(address))?;
                let balance = TokenAmount::from_str(&balance)
                    .map_err(|_| StoreError::InvalidBalance(balance))?;
                Ok(HolderRow { address, balance })
            })
            .collect()
    }

    pub async fn get_holder_count(&self, chain_id: i64, eoa_only: bool) -> Result<i64> {
        let count: i64 = if eoa_only {
            sqlx::query_scalar(
                r#"
                SELECT COUNT(*) FROM balances b
                INNER JOIN address_types a ON a.chain_id = b.chain_id AND a.address = b.address
                WHERE b.chain_id = ?1 AND a.is_eoa = 1
                "#,
            )
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM balances WHERE chain_id = ?1")
                .bind(chain_id)
                .fetch_one(&self.pool)
                .await?
        };
        Ok(count)
    }

    pub async fn get_transfer_count(&self, chain_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers WHERE chain_id = ?1")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_checked_address_count(&self, chain_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM address_types WHERE chain_id = ?1")
                .bind(chain_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_eoa_count(&self, chain_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM address_types WHERE chain_id = ?1 AND is_eoa = 1",
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenAmount as Amt;
    use alloy_primitives::U256;

    fn addr(tail: u8) -> EvmAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = tail;
        EvmAddress(Address::from(bytes))
    }

    fn transfer(
        tx_hash: &str,
        log_index: u64,
        block_number: u64,
        from: EvmAddress,
        to: EvmAddress,
        value: u64,
    ) -> Transfer {
        Transfer {
            block_number,
            tx_hash: tx_hash.to_string(),
            log_index,
            from,
            to,
            value: Amt(U256::from(value)),
        }
    }

    #[tokio::test]
    async fn mint_then_transfer_preserves_balance_equation() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let b = addr(2);
        let zero = EvmAddress(ZERO_ADDRESS);
        let items = vec![
            transfer("0xaa", 0, 10, zero, a, 100),
            transfer("0xbb", 0, 11, a, b, 30),
        ];
        store.insert_transfers(1, &items).await.unwrap();
        store.update_balances_from_transfers(1, &items).await.unwrap();

        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        let a_balance = holders.iter().find(|h| h.address == a).unwrap();
        let b_balance = holders.iter().find(|h| h.address == b).unwrap();
        assert_eq!(a_balance.balance.to_string(), "70");
        assert_eq!(b_balance.balance.to_string(), "30");
        assert!(holders.iter().all(|h| h.address != zero));
        assert_eq!(store.get_holder_count(1, false).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn burn_to_zero_removes_holder_row() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let b = addr(2);
        let zero = EvmAddress(ZERO_ADDRESS);
        let batch1 = vec![
            transfer("0xaa", 0, 10, zero, a, 100),
            transfer("0xbb", 0, 11, a, b, 30),
        ];
        store.insert_transfers(1, &batch1).await.unwrap();
        store.update_balances_from_transfers(1, &batch1).await.unwrap();

        let batch2 = vec![transfer("0xcc", 0, 12, b, zero, 30)];
        store.insert_transfers(1, &batch2).await.unwrap();
        store.update_balances_from_transfers(1, &batch2).await.unwrap();

        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].address, a);
        assert_eq!(holders[0].balance.to_string(), "70");
    }

    #[tokio::test]
    async fn net_zero_transfer_removes_sender_row() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let b = addr(2);
        let zero = EvmAddress(ZERO_ADDRESS);
        let batch1 = vec![transfer("0xaa", 0, 10, zero, a, 70)];
        store.insert_transfers(1, &batch1).await.unwrap();
        store.update_balances_from_transfers(1, &batch1).await.unwrap();

        let batch2 = vec![transfer("0xdd", 0, 13, a, b, 70)];
        store.insert_transfers(1, &batch2).await.unwrap();
        store.update_balances_from_transfers(1, &batch2).await.unwrap();

        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].address, b);
    }

    #[tokio::test]
    async fn reinserting_same_batch_is_a_no_op() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let zero = EvmAddress(ZERO_ADDRESS);
        let items = vec![transfer("0xaa", 0, 10, zero, a, 100)];
        store.insert_transfers(1, &items).await.unwrap();
        store.update_balances_from_transfers(1, &items).await.unwrap();
        store.insert_transfers(1, &items).await.unwrap();
        store.update_balances_from_transfers(1, &items).await.unwrap();

        assert_eq!(store.get_transfer_count(1).await.unwrap(), 1);
        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].balance.to_string(), "100");
    }

    #[tokio::test]
    async fn rebuild_matches_incremental_path() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let b = addr(2);
        let zero = EvmAddress(ZERO_ADDRESS);
        let items = vec![
            transfer("0xaa", 0, 10, zero, a, 100),
            transfer("0xbb", 0, 11, a, b, 30),
        ];
        store.insert_transfers(1, &items).await.unwrap();
        store.update_balances_from_transfers(1, &items).await.unwrap();
        let incremental = store.get_holders_with_balances(1, false).await.unwrap();

        store.rebuild_all_balances(1).await.unwrap();
        let rebuilt = store.get_holders_with_balances(1, false).await.unwrap();

        let mut incremental_set: Vec<(EvmAddress, String)> = incremental
            .into_iter()
            .map(|h| (h.address, h.balance.to_string()))
            .collect();
        let mut rebuilt_set: Vec<(EvmAddress, String)> = rebuilt
            .into_iter()
            .map(|h| (h.address, h.balance.to_string()))
            .collect();
        incremental_set.sort();
        rebuilt_set.sort();
        assert_eq!(incremental_set, rebuilt_set);
    }

    #[tokio::test]
    async fn checkpoint_never_decreases() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 100)
            .await
            .unwrap();
        assert_eq!(store.get_last_indexed_block(1).await.unwrap(), 99);
        store.update_last_indexed_block(1, 200).await.unwrap();
        store.update_last_indexed_block(1, 150).await.unwrap();
        assert_eq!(store.get_last_indexed_block(1).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn unchecked_addresses_excludes_zero_and_classified() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let b = addr(2);
        let zero = EvmAddress(ZERO_ADDRESS);
        let items = vec![transfer("0xaa", 0, 10, zero, a, 100), transfer("0xbb", 0, 11, a, b, 30)];
        store.insert_transfers(1, &items).await.unwrap();

        let unchecked = store.get_unchecked_addresses(1).await.unwrap();
        assert!(unchecked.contains(&a));
        assert!(unchecked.contains(&b));
        assert!(!unchecked.contains(&zero));

        store.batch_set_address_types(1, &[(a, true)]).await.unwrap();
        let unchecked = store.get_unchecked_addresses(1).await.unwrap();
        assert!(!unchecked.contains(&a));
        assert!(unchecked.contains(&b));
    }

    /// A transfer value above `I256::MAX` (but still a valid `U256`) must not be clamped or
    /// overflow; the stored balance must reflect the exact value.
    #[tokio::test]
    async fn balance_update_preserves_precision_for_values_above_i256_max() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .register_chain(1, "Ethereum", "http://rpc", addr(9), 0)
            .await
            .unwrap();
        let a = addr(1);
        let zero = EvmAddress(ZERO_ADDRESS);
        // U256::MAX is ~1.16e77; this value (1e77) is above I256::MAX (~5.79e76) but still
        // well within U256's range.
        let huge = "100000000000000000000000000000000000000000000000000000000000000000000000000000";
        let item = Transfer {
            block_number: 10,
            tx_hash: "0xaa".to_string(),
            log_index: 0,
            from: zero,
            to: a,
            value: Amt::from_str(huge).unwrap(),
        };
        store.insert_transfers(1, &[item.clone()]).await.unwrap();
        store
            .update_balances_from_transfers(1, &[item])
            .await
            .unwrap();

        let holders = store.get_holders_with_balances(1, false).await.unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].balance.to_string(), huge);
    }
}
