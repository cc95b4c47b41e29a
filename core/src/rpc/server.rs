use axum::{middleware, routing::get, routing::post, Router};

use crate::metrics;
use crate::rpc::auth;
use crate::rpc::methods;
use crate::state::State;

pub fn build(state: State) -> Router {
    let metrics_router = metrics::endpoints::metrics_router(state.metrics.clone());

    let protected = Router::new()
        .route("/rpc/submit_tx", post(methods::submit_tx))
        .layer(middleware::from_fn(auth::require_bearer_token))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(methods::health))
        .route("/stats", get(methods::stats))
        .route("/api/block/hash/:hash", get(methods::get_block_by_hash))
        .route("/api/block/height/:height", get(methods::get_block_by_height))
        .route("/api/blocks/range/:start/:end", get(methods::get_blocks_range))
        .route("/api/tx/:id", get(methods::get_tx))
        .route("/api/mempool/info", get(methods::get_mempool_info))
        .route("/api/address/:address/balance", get(methods::get_address_balance))
        .route("/api/sync/status", get(methods::get_sync_status))
        .with_state(state);

    public.merge(protected).merge(metrics_router)
}
