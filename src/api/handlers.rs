//! Route handlers for the read-only HTTP API.
//!
//! Each route takes an optional or required `chain_id` query parameter and serves
//! already-computed state from the store.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::instrument;

use super::AppState;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown chain_id {0}")]
    UnknownChain(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("upstream RPC unavailable: {0}")]
    RpcUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::UnknownChain(id) => (StatusCode::NOT_FOUND, format!("unknown chain_id {id}")),
            ApiError::Store(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::RpcUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChainIdQuery {
    pub chain_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct HoldersQuery {
    pub chain_id: i64,
    #[serde(default)]
    pub include_contracts: bool,
}

#[derive(Debug, Serialize)]
struct ChainSummary {
    chain_id: i64,
    name: String,
    token_address: String,
    start_block: i64,
}

/// `GET /chains`: lists every registered chain.
#[instrument(skip_all)]
pub async fn get_chains(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chains = state.store.get_all_chains().await?;
    let body: Vec<ChainSummary> = chains
        .into_iter()
        .map(|c| ChainSummary {
            chain_id: c.chain_id,
            name: c.name,
            token_address: c.token_address.to_string(),
            start_block: c.start_block,
        })
        .collect();
    Ok(Json(json!({ "chains": body })))
}

/// `GET /health`: overall health, including per-chain sync state.
#[instrument(skip_all)]
pub async fn get_health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let chains = state.store.get_all_chains().await?;
    let mut summaries = Vec::with_capacity(chains.len());
    for chain in &chains {
        let syncing = state.store.is_syncing(chain.chain_id).await?;
        summaries.push(json!({ "chain_id": chain.chain_id, "is_syncing": syncing }));
    }
    let any_syncing = state.store.is_any_syncing().await?;
    Ok(Json(
        json!({ "status": "ok", "chains": summaries, "any_syncing": any_syncing }),
    ))
}

/// `GET /holders?chain_id=&include_contracts=false`: ordered holder list for one chain.
#[instrument(skip_all)]
pub async fn get_holders(
    State(state): State<AppState>,
    Query(query): Query<HoldersQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let cache_key = format!(
        "holders_{}_{}",
        query.chain_id,
        if query.include_contracts { "all" } else { "eoa" }
    );
    if let Some(cached) = state.cache.get(&cache_key) {
        return Ok(Json(cached));
    }

    let chain = state
        .store
        .get_chain_config(query.chain_id)
        .await?
        .ok_or(ApiError::UnknownChain(query.chain_id))?;
    let eoa_only = !query.include_contracts;
    let holders = state
        .store
        .get_holders_with_balances(query.chain_id, eoa_only)
        .await?;
    let last_indexed_block = state.store.get_last_indexed_block(query.chain_id).await?;
    let sync_in_progress = state.store.is_syncing(query.chain_id).await?;

    let body = json!({
        "chain_id": query.chain_id,
        "chain_name": chain.name,
        "token_address": chain.token_address.to_string(),
        "holder_count": holders.len(),
        "last_indexed_block": last_indexed_block,
        "sync_in_progress": sync_in_progress,
        "holders": holders.iter().map(|h| json!({
            "address": h.address.to_string(),
            "balance": h.balance.to_string(),
        })).collect::<Vec<_>>(),
    });
    state.cache.put(cache_key, body.clone());
    Ok(Json(body))
}

/// `GET /status?chain_id=`: sync progress, for one chain or all registered chains.
#[instrument(skip_all)]
pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<ChainIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let chains = match query.chain_id {
        Some(id) => vec![
            state
                .store
                .get_chain_config(id)
                .await?
                .ok_or(ApiError::UnknownChain(id))?,
        ],
        None => state.store.get_all_chains().await?,
    };

    let mut statuses = Vec::with_capacity(chains.len());
    for chain in chains {
        let last_indexed_block = state.store.get_last_indexed_block(chain.chain_id).await?;
        let is_syncing = state.store.is_syncing(chain.chain_id).await?;
        let addresses_checked = state.store.get_checked_address_count(chain.chain_id).await?;
        let chain_head_block = match state.rpc_clients.get(&chain.chain_id) {
            Some(client) => client.get_current_block().await.ok(),
            None => None,
        };
        let blocks_behind = chain_head_block
            .map(|head| (head as i64 - last_indexed_block).max(0))
            .unwrap_or(0);
        statuses.push(json!({
            "chain_id": chain.chain_id,
            "last_indexed_block": last_indexed_block,
            "chain_head_block": chain_head_block,
            "blocks_behind": blocks_behind,
            "is_syncing": is_syncing,
            "addresses_checked": addresses_checked,
        }));
    }
    Ok(Json(json!({ "status": statuses })))
}

/// `GET /stats?chain_id=`: aggregate per-chain counters.
#[instrument(skip_all)]
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<ChainIdQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(cached) = query
        .chain_id
        .and_then(|id| state.cache.get(&format!("stats_{id}")))
    {
        return Ok(Json(cached));
    }

    let chains = match query.chain_id {
        Some(id) => vec![
            state
                .store
                .get_chain_config(id)
                .await?
                .ok_or(ApiError::UnknownChain(id))?,
        ],
        None => state.store.get_all_chains().await?,
    };

    let mut stats = Vec::with_capacity(chains.len());
    for chain in chains {
        let total_transfers_indexed = state.store.get_transfer_count(chain.chain_id).await?;
        let total_addresses_checked = state.store.get_checked_address_count(chain.chain_id).await?;
        let total_eoa_addresses = state.store.get_eoa_count(chain.chain_id).await?;
        let total_contract_addresses = total_addresses_checked - total_eoa_addresses;
        let eoa_holder_count = state.store.get_holder_count(chain.chain_id, true).await?;
        let last_indexed_block = state.store.get_last_indexed_block(chain.chain_id).await?;
        let sync_in_progress = state.store.is_syncing(chain.chain_id).await?;
        let entry = json!({
            "chain_id": chain.chain_id,
            "token_address": chain.token_address.to_string(),
            "total_transfers_indexed": total_transfers_indexed,
            "eoa_holder_count": eoa_holder_count,
            "total_addresses_checked": total_addresses_checked,
            "total_eoa_addresses": total_eoa_addresses,
            "total_contract_addresses": total_contract_addresses,
            "last_indexed_block": last_indexed_block,
            "sync_in_progress": sync_in_progress,
            "start_block": chain.start_block,
        });
        if let Some(id) = query.chain_id {
            state.cache.put(format!("stats_{id}"), entry.clone());
        }
        stats.push(entry);
    }
    Ok(Json(json!({ "stats": stats })))
}

/// `GET /metrics`: Prometheus text exposition.
#[instrument(skip_all)]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
