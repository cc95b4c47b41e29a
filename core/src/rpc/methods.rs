//! HTTP/RPC handlers. Write paths (`submit_tx`) go through `State` exactly
//! as the network's gossip callback does; read paths query the chain and
//! mempools directly. No block-template or premine routes exist here — this
//! ledger has no proof-of-work and no premine.

use axum::extract::{Path, State as AxumState};
use axum::Json;

use crate::state::State;
use crate::tx::Transaction;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn stats(AxumState(state): AxumState<State>) -> Json<serde_json::Value> {
    let health = state.metrics.health_check();
    let (height, peer_best_height) = state.sync_snapshot();
    Json(serde_json::json!({
        "height": height,
        "tip": state.chain.tip(),
        "peers_connected": health.peers_connected,
        "mempool_size": health.mempool_size,
        "time_since_last_block": health.time_since_last_block,
        "status": health.status,
        "peer_best_height": peer_best_height,
    }))
}

pub async fn submit_tx(AxumState(state): AxumState<State>, Json(tx): Json<Transaction>) -> Json<serde_json::Value> {
    let tx_id = tx.id_hex();
    let self_id = state.net.self_id();
    match state.process_transaction(tx, &self_id) {
        Ok(()) => Json(serde_json::json!({"status": "ok", "tx_id": tx_id})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn get_block_by_hash(
    AxumState(state): AxumState<State>,
    Path(hash): Path<String>,
) -> Json<serde_json::Value> {
    match state.chain.find_block(&hash) {
        Ok(Some(block)) => Json(serde_json::json!({"status": "ok", "block": block})),
        Ok(None) => Json(serde_json::json!({"status": "error", "message": "block not found"})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn get_block_by_height(
    AxumState(state): AxumState<State>,
    Path(height): Path<u64>,
) -> Json<serde_json::Value> {
    match state.chain.find_blocks_in_range(height, height) {
        Ok(blocks) => match blocks.into_iter().next() {
            Some(block) => Json(serde_json::json!({"status": "ok", "block": block})),
            None => Json(serde_json::json!({"status": "error", "message": "block not found"})),
        },
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

/// GET /api/blocks/range/:start/:end — inclusive height range.
pub async fn get_blocks_range(
    AxumState(state): AxumState<State>,
    Path((start, end)): Path<(u64, u64)>,
) -> Json<serde_json::Value> {
    match state.chain.find_blocks_in_range(start, end) {
        Ok(blocks) => Json(serde_json::json!({"status": "ok", "count": blocks.len(), "blocks": blocks})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn get_tx(AxumState(state): AxumState<State>, Path(id_hex): Path<String>) -> Json<serde_json::Value> {
    if let Some(tx) = state.tx_mempool.get_all().get(&id_hex) {
        return Json(serde_json::json!({"status": "ok", "tx": tx, "in_mempool": true}));
    }
    match state.chain.find_transaction(&id_hex) {
        Ok(Some(tx)) => Json(serde_json::json!({"status": "ok", "tx": tx, "in_mempool": false})),
        Ok(None) => Json(serde_json::json!({"status": "error", "message": "transaction not found"})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn get_mempool_info(AxumState(state): AxumState<State>) -> Json<serde_json::Value> {
    let txs = state.tx_mempool.get_all();
    Json(serde_json::json!({
        "status": "ok",
        "size": txs.len(),
        "transactions": txs.keys().collect::<Vec<_>>(),
    }))
}

pub async fn get_address_balance(
    AxumState(state): AxumState<State>,
    Path(address): Path<String>,
) -> Json<serde_json::Value> {
    if !crate::address::is_valid(&address) {
        return Json(serde_json::json!({"status": "error", "message": "invalid address"}));
    }
    match state.chain.balance(&address) {
        Ok(balance) => Json(serde_json::json!({"status": "ok", "address": address, "balance": balance})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}

pub async fn get_sync_status(AxumState(state): AxumState<State>) -> Json<serde_json::Value> {
    let (height, peer_best_height) = state.sync_snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "height": height,
        "peer_best_height": peer_best_height,
        "syncing": peer_best_height > height,
    }))
}
