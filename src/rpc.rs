//! JSON-RPC transport to a single chain's upstream node.
//!
//! Three operations: [`RpcClient::get_current_block`], [`RpcClient::get_logs`], and
//! [`RpcClient::batch_get_code`], each with retry/backoff and error classification into
//! range-too-large / transient / fatal.

use std::time::Duration;

use alloy_primitives::{Address, B256, U256, keccak256};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::types::{EvmAddress, TokenAmount, Transfer, TRANSFER_TOPIC0};

/// Floor for the adaptive batch size; never shrinks below this.
pub const MIN_BATCH: u64 = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("block range too large or request timed out: {0}")]
    RangeTooLarge(String),
    #[error("transient RPC failure: {0}")]
    Transient(String),
    #[error("RPC call failed after retries: {0}")]
    Fatal(String),
    #[error("failed to decode RPC response: {0}")]
    Decode(String),
}

fn classify(message: &str) -> RpcErrorClass {
    let lower = message.to_lowercase();
    if ["range", "too large", "timeout", "exceeded"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        RpcErrorClass::RangeTooLarge
    } else {
        RpcErrorClass::Transient
    }
}

enum RpcErrorClass {
    RangeTooLarge,
    Transient,
}

/// A raw decoded `Transfer` log plus whatever malformed-log warnings were skipped.
pub struct LogsResult {
    pub transfers: Vec<Transfer>,
}

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    rpc_url: String,
    chain_id: i64,
}

impl RpcClient {
    pub fn new(chain_id: i64, rpc_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with static config always builds");
        Self {
            http,
            rpc_url,
            chain_id,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transient(e.to_string()))?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_string();
            return Err(match classify(&message) {
                RpcErrorClass::RangeTooLarge => RpcError::RangeTooLarge(message),
                RpcErrorClass::Transient => RpcError::Transient(message),
            });
        }
        value
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("response missing `result`".to_string()))
    }

    /// Retries "transient" failures with exponential backoff (`min(30, 2^attempt)` seconds) up
    /// to 5 attempts.
    async fn call_with_retry(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut attempt = 0u32;
        loop {
            match self.call(method, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(RpcError::RangeTooLarge(msg)) => return Err(RpcError::RangeTooLarge(msg)),
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(RpcError::Fatal(err.to_string()));
                    }
                    let wait = Duration::from_secs(2u64.saturating_pow(attempt).min(30));
                    warn!(chain_id = self.chain_id, attempt, error = %err, "RPC call failed, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// `eth_blockNumber` → the current chain head.
    pub async fn get_current_block(&self) -> Result<u64, RpcError> {
        let result = self.call_with_retry("eth_blockNumber", json!([])).await?;
        let hex = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("eth_blockNumber result not a string".to_string()))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// `eth_getLogs` for the configured token's `Transfer` events over `[from_block, to_block]`.
    /// Malformed individual logs are skipped with a warning rather than failing the batch.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        address: EvmAddress,
    ) -> Result<LogsResult, RpcError> {
        let params = json!([{
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "address": address.to_string(),
            "topics": [TRANSFER_TOPIC0],
        }]);
        let result = self.call_with_retry("eth_getLogs", params).await?;
        let logs = result
            .as_array()
            .ok_or_else(|| RpcError::Decode("eth_getLogs result not an array".to_string()))?;

        let mut transfers = Vec::with_capacity(logs.len());
        for log in logs {
            match Self::decode_log(log) {
                Ok(transfer) => transfers.push(transfer),
                Err(err) => {
                    warn!(chain_id = self.chain_id, error = %err, "skipping malformed log");
                }
            }
        }
        Ok(LogsResult { transfers })
    }

    fn decode_log(log: &Value) -> Result<Transfer, RpcError> {
        let topics = log
            .get("topics")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::Decode("log missing topics".to_string()))?;
        if topics.len() < 3 {
            return Err(RpcError::Decode("log has fewer than 3 topics".to_string()));
        }
        let from = Self::address_from_topic(topics[1].as_str().unwrap_or_default())?;
        let to = Self::address_from_topic(topics[2].as_str().unwrap_or_default())?;

        let data = log
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("log missing data".to_string()))?;
        let value = U256::from_str_radix(data.trim_start_matches("0x"), 16)
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        let tx_hash = log
            .get("transactionHash")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("log missing transactionHash".to_string()))?
            .to_string();
        let log_index = log
            .get("logIndex")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("log missing logIndex".to_string()))
            .and_then(|s| {
                u64::from_str_radix(s.trim_start_matches("0x"), 16)
                    .map_err(|e| RpcError::Decode(e.to_string()))
            })?;
        let block_number = log
            .get("blockNumber")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Decode("log missing blockNumber".to_string()))
            .and_then(|s| {
                u64::from_str_radix(s.trim_start_matches("0x"), 16)
                    .map_err(|e| RpcError::Decode(e.to_string()))
            })?;

        Ok(Transfer {
            block_number,
            tx_hash,
            log_index,
            from,
            to,
            value: TokenAmount(value),
        })
    }

    fn address_from_topic(topic: &str) -> Result<EvmAddress, RpcError> {
        let hex = topic.trim_start_matches("0x");
        if hex.len() < 40 {
            return Err(RpcError::Decode("topic too short for an address".to_string()));
        }
        let tail = &hex[hex.len() - 40..];
        let address = format!("0x{tail}")
            .parse::<Address>()
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        Ok(EvmAddress(address))
    }

    /// A single JSON-RPC 2.0 batch of `eth_getCode`, with per-item `id = index`, correlating
    /// responses by `id` since providers may reorder them. Falls back to sequential calls with
    /// a 20 ms pacing delay on whole-request failure.
    pub async fn batch_get_code(
        &self,
        addresses: &[EvmAddress],
    ) -> Vec<(EvmAddress, Option<String>)> {
        match self.batch_get_code_inner(addresses).await {
            Ok(results) => results,
            Err(err) => {
                warn!(chain_id = self.chain_id, error = %err, "batch eth_getCode failed, falling back to sequential");
                self.sequential_get_code(addresses).await
            }
        }
    }

    async fn batch_get_code_inner(
        &self,
        addresses: &[EvmAddress],
    ) -> Result<Vec<(EvmAddress, Option<String>)>, RpcError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let batch: Vec<Value> = addresses
            .iter()
            .enumerate()
            .map(|(id, address)| {
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "eth_getCode",
                    "params": [address.to_string(), "latest"],
                })
            })
            .collect();

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&batch)
            .send()
            .await
            .map_err(|e| RpcError::Transient(e.to_string()))?;
        let values: Vec<Value> = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        let mut by_id: std::collections::HashMap<u64, Value> = std::collections::HashMap::new();
        for value in values {
            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                by_id.insert(id, value);
            }
        }

        let mut results = Vec::with_capacity(addresses.len());
        for (id, address) in addresses.iter().enumerate() {
            let code = by_id
                .get(&(id as u64))
                .and_then(|entry| entry.get("result"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
            results.push((*address, code));
        }
        Ok(results)
    }

    async fn sequential_get_code(&self, addresses: &[EvmAddress]) -> Vec<(EvmAddress, Option<String>)> {
        let mut results = Vec::with_capacity(addresses.len());
        for address in addresses {
            let code = self
                .call("eth_getCode", json!([address.to_string(), "latest"]))
                .await
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()));
            results.push((*address, code));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        results
    }
}

/// keccak256("Transfer(address,address,uint256)") — used by tests and to sanity-check
/// [`TRANSFER_TOPIC0`] at the definition site rather than re-deriving it at call sites.
pub fn transfer_topic0() -> B256 {
    keccak256(b"Transfer(address,address,uint256)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_topic0_matches_constant() {
        assert_eq!(format!("0x{:x}", transfer_topic0()), TRANSFER_TOPIC0);
    }

    #[test]
    fn classify_range_too_large_messages() {
        for msg in [
            "query returned more than 10000 results, range too large",
            "block range is too large",
            "request timeout",
            "response size exceeded",
        ] {
            assert!(matches!(classify(msg), RpcErrorClass::RangeTooLarge));
        }
    }

    #[test]
    fn classify_transient_messages() {
        assert!(matches!(
            classify("connection reset by peer"),
            RpcErrorClass::Transient
        ));
    }

    #[test]
    fn decode_log_extracts_address_from_topic_tail() {
        let log = json!({
            "topics": [
                TRANSFER_TOPIC0,
                "0x0000000000000000000000000000000000000000000000000000000000000001",
                "0x0000000000000000000000000000000000000000000000000000000000000002",
            ],
            "data": "0x0000000000000000000000000000000000000000000000000000000000000064",
            "transactionHash": "0xaaaa",
            "logIndex": "0x0",
            "blockNumber": "0xa",
        });
        let transfer = RpcClient::decode_log(&log).unwrap();
        assert_eq!(transfer.value.to_string(), "100");
        assert_eq!(transfer.block_number, 10);
    }

    #[test]
    fn decode_log_rejects_too_few_topics() {
        let log = json!({
            "topics": [TRANSFER_TOPIC0],
            "data": "0x0",
            "transactionHash": "0xaaaa",
            "logIndex": "0x0",
            "blockNumber": "0xa",
        });
        assert!(RpcClient::decode_log(&log).is_err());
    }
}
