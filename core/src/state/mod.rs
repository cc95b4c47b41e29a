//! Shared node state: the chain, mempools, network adapter, and (on
//! consensus nodes) the PBFT engine, plus the orchestration glue that wires
//! network callbacks into mempool inserts and drives block sync. One `Inner`
//! is built once at startup and handed out as `State` (an `Arc`) to the RPC
//! handlers, the CLI, and the network layer.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::blockchain::block::Block;
use crate::blockchain::chain::Chain;
use crate::consensus::PBFTEngine;
use crate::error::NodeError;
use crate::mempool::block_pool::BlockMempool;
use crate::mempool::pool::TxMempool;
use crate::metrics::Metrics;
use crate::network::{Adapter, MessageType, NetworkMessage, PeerId};
use crate::tx::{self, Transaction};

/// Tracks the best height any peer has claimed, and who claimed it, so the
/// sync ticker knows where to send its next `BlockRequest`.
struct SyncWatermark {
    peer_best_height: u64,
    best_peer_id: Option<PeerId>,
}

pub struct Inner {
    pub chain: Arc<Chain>,
    pub tx_mempool: Arc<TxMempool>,
    pub block_mempool: Arc<BlockMempool>,
    pub net: Arc<dyn Adapter>,
    pub engine: Option<Arc<PBFTEngine>>,
    pub metrics: Arc<Metrics>,
    pub shutdown: broadcast::Sender<()>,
    watermark: Mutex<SyncWatermark>,
}

pub type State = Arc<Inner>;

impl Inner {
    pub fn new(
        chain: Arc<Chain>,
        tx_mempool: Arc<TxMempool>,
        block_mempool: Arc<BlockMempool>,
        net: Arc<dyn Adapter>,
        engine: Option<Arc<PBFTEngine>>,
        metrics: Arc<Metrics>,
    ) -> State {
        let (shutdown, _) = broadcast::channel(1);
        let state = Arc::new(Self {
            chain,
            tx_mempool,
            block_mempool,
            net,
            engine,
            metrics,
            shutdown,
            watermark: Mutex::new(SyncWatermark { peer_best_height: 0, best_peer_id: None }),
        });
        register_network_callbacks(state.clone());
        state
    }

    /// Accept a transaction from RPC or the network's tx-gossip channel:
    /// verify, insert into the mempool if not already known, and broadcast
    /// to every peer except `from`. Re-submitting a transaction already in
    /// the mempool is a silent no-op, not an error.
    pub fn process_transaction(&self, tx: Transaction, from: &PeerId) -> Result<(), NodeError> {
        if self.tx_mempool.contains(&tx.id_hex()) {
            return Ok(());
        }
        if !tx.has_valid_id() {
            return Err(NodeError::ChainMismatch);
        }
        self.metrics.txs_submitted.fetch_add(1, Ordering::Relaxed);
        if !tx.is_coinbase() && !tx::verify_batch(&self.chain, std::slice::from_ref(&tx)) {
            self.metrics.txs_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(NodeError::SignatureInvalid);
        }

        self.tx_mempool.add(tx.clone());
        self.metrics.txs_accepted.fetch_add(1, Ordering::Relaxed);
        self.metrics.txs_in_mempool.store(self.tx_mempool.count(), Ordering::Relaxed);
        self.net.broadcast_except(&NetworkMessage::Transaction(tx), from);
        Ok(())
    }

    /// Accept a block obtained outside the consensus engine's own commit
    /// path, i.e. one pulled in by block sync: validate its hash and
    /// transaction batch, then hand it to the block mempool, which appends
    /// it directly or holds it as an orphan.
    pub fn process_block(&self, block: Block) -> Result<(u64, String), NodeError> {
        if !block.has_valid_hash() {
            return Err(NodeError::ChainMismatch);
        }
        if !block.is_genesis() && !tx::verify_batch(&self.chain, &block.transactions) {
            self.metrics.blocks_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(NodeError::SignatureInvalid);
        }

        let ids: Vec<String> = block.transactions.iter().map(|t| t.id_hex()).collect();
        self.block_mempool
            .receive_block(block)
            .map_err(|e| NodeError::StoreIo(e.to_string()))?;
        self.tx_mempool.remove_many(&ids);

        self.metrics.blocks_processed.fetch_add(1, Ordering::Relaxed);
        self.metrics.current_height.store(self.chain.height(), Ordering::Relaxed);
        self.metrics.last_block_time.store(
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs(),
            Ordering::Relaxed,
        );
        self.metrics.txs_in_mempool.store(self.tx_mempool.count(), Ordering::Relaxed);
        Ok((self.chain.height(), self.chain.tip().unwrap_or_default()))
    }

    /// Ask the consensus engine (if this node runs one) to propose a block
    /// from whatever is currently in the tx mempool. A no-op on non-primary
    /// or non-consensus nodes.
    pub fn try_propose(&self) {
        if let Some(engine) = &self.engine {
            engine.propose();
        }
    }

    /// `(local_height, best_known_peer_height)`, for the RPC/CLI sync status
    /// report.
    pub fn sync_snapshot(&self) -> (u64, u64) {
        let wm = self.watermark.lock();
        (self.chain.height(), wm.peer_best_height)
    }
}

/// Register this state's handlers for inbound transaction gossip and
/// block-sync envelopes. Consensus messages are handled entirely inside
/// `PBFTEngine::new`, which registers its own callback.
fn register_network_callbacks(state: State) {
    let tx_state = state.clone();
    state.net.register_callback(
        MessageType::Transaction,
        Box::new(move |_, bytes, from| {
            if let Ok(NetworkMessage::Transaction(tx)) = serde_json::from_slice::<NetworkMessage>(&bytes) {
                let _ = tx_state.process_transaction(tx, &from);
            }
        }),
    );

    let block_state = state.clone();
    state.net.register_callback(
        MessageType::Block,
        Box::new(move |_, bytes, from| {
            let Ok(msg) = serde_json::from_slice::<NetworkMessage>(&bytes) else { return };
            handle_sync_message(&block_state, msg, from);
        }),
    );
}

fn handle_sync_message(state: &State, msg: NetworkMessage, from: PeerId) {
    match msg {
        NetworkMessage::SyncRequest { from_height } => {
            let tip_height = state.chain.height();
            if tip_height >= from_height {
                state.net.broadcast_to(&NetworkMessage::SyncResponse { tip_height }, &from);
            }
        }
        NetworkMessage::SyncResponse { tip_height } => {
            let mut wm = state.watermark.lock();
            if tip_height > wm.peer_best_height {
                wm.peer_best_height = tip_height;
                wm.best_peer_id = Some(from);
            }
        }
        NetworkMessage::BlockRequest { from_height, limit } => {
            let to_height = from_height + limit as u64;
            let blocks = state.chain.find_blocks_in_range(from_height, to_height).unwrap_or_default();
            state.net.broadcast_to(&NetworkMessage::BlockResponse { blocks }, &from);
        }
        NetworkMessage::BlockResponse { blocks } => {
            for block in blocks {
                let _ = state.process_block(block);
            }
        }
        NetworkMessage::NewBlockBroadcast { height, .. } => {
            let mut wm = state.watermark.lock();
            if height > wm.peer_best_height {
                wm.peer_best_height = height;
                wm.best_peer_id = Some(from);
            }
        }
        NetworkMessage::Transaction(_) | NetworkMessage::Consensus(_) => {}
    }
}

/// Periodically broadcast `SyncRequest`; once a peer is known to be ahead,
/// switch to asking it directly for the missing range. Runs until the
/// shutdown signal fires.
pub async fn run_sync_driver(state: State, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut shutdown = state.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let best_height = state.chain.height();
                let (peer_best_height, best_peer_id) = {
                    let wm = state.watermark.lock();
                    (wm.peer_best_height, wm.best_peer_id.clone())
                };
                if peer_best_height > best_height {
                    if let Some(peer) = best_peer_id {
                        let limit = (peer_best_height - best_height).min(500) as u32;
                        state.net.broadcast_to(
                            &NetworkMessage::BlockRequest { from_height: best_height + 1, limit },
                            &peer,
                        );
                    }
                } else {
                    state.net.broadcast(&NetworkMessage::SyncRequest { from_height: best_height + 1 });
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::FakeAdapter;
    use crate::tx::{TxInput, TxOutput};
    use tempfile::tempdir;

    fn addr() -> (crate::crypto::keys::PrivateKey, String) {
        let sk = crate::crypto::keys::PrivateKey::generate();
        let a = crate::address::from_public_key(&sk.public_key().to_bytes());
        (sk, a)
    }

    fn test_state() -> (State, crate::crypto::keys::PrivateKey, String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let (sk, a) = addr();
        let chain = Arc::new(Chain::create(&a, dir.path(), 114_514, 1).unwrap());
        let (tx_mempool, _rx) = TxMempool::new(100);
        let block_mempool = Arc::new(BlockMempool::new(chain.clone(), 100));
        let net = FakeAdapter::new("node-a".to_string());
        let state = Inner::new(chain, Arc::new(tx_mempool), block_mempool, net, None, Metrics::new());
        (state, sk, a, dir)
    }

    fn signed_spend(state: &State, sk: &crate::crypto::keys::PrivateKey, from_addr: &str, to_addr: &str, amount: u64) -> Transaction {
        let genesis = state.chain.find_block(&state.chain.tip().unwrap()).unwrap().unwrap();
        let gtx = genesis.transactions[0].clone();
        let input = TxInput {
            prev_tx_id: gtx.id.clone(),
            out_index: 0,
            from_address: from_addr.as_bytes().to_vec(),
            signature: sk.sign(&gtx.calculate_hash()),
            pubkey: sk.public_key().to_bytes(),
        };
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![TxOutput::new(amount, to_addr).unwrap()],
        };
        tx.id = tx.calculate_hash().to_vec();
        tx
    }

    #[test]
    fn process_transaction_accepts_a_valid_spend_and_updates_mempool_metrics() {
        let (state, sk, a, _dir) = test_state();
        let (_, recipient) = addr();
        let tx = signed_spend(&state, &sk, &a, &recipient, 1_000);

        state.process_transaction(tx.clone(), &"node-a".to_string()).unwrap();
        assert!(state.tx_mempool.contains(&tx.id_hex()));
        assert_eq!(state.metrics.txs_accepted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn process_transaction_rejects_bad_signature() {
        let (state, sk, a, _dir) = test_state();
        let (_, recipient) = addr();
        let mut tx = signed_spend(&state, &sk, &a, &recipient, 1_000);
        tx.inputs[0].signature[0] ^= 0xFF;

        let err = state.process_transaction(tx, &"node-a".to_string()).unwrap_err();
        assert!(matches!(err, NodeError::SignatureInvalid));
    }

    #[test]
    fn process_transaction_ignores_resubmission_of_a_known_tx() {
        let (state, sk, a, _dir) = test_state();
        let (_, recipient) = addr();
        let tx = signed_spend(&state, &sk, &a, &recipient, 1_000);
        state.process_transaction(tx.clone(), &"node-a".to_string()).unwrap();
        state.process_transaction(tx.clone(), &"node-a".to_string()).unwrap();
        assert_eq!(state.metrics.txs_accepted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn process_block_extends_chain_and_updates_metrics() {
        let (state, sk, a, _dir) = test_state();
        let (_, recipient) = addr();
        let tx = signed_spend(&state, &sk, &a, &recipient, 1_000);
        let genesis = state.chain.find_block(&state.chain.tip().unwrap()).unwrap().unwrap();

        let block = Block::new(genesis.header.hash.clone(), 2, vec![tx], 2);
        let (height, tip) = state.process_block(block).unwrap();
        assert_eq!(height, 2);
        assert_eq!(tip, state.chain.tip().unwrap());
        assert_eq!(state.metrics.blocks_processed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn process_block_rejects_wrong_declared_hash() {
        let (state, sk, a, _dir) = test_state();
        let (_, recipient) = addr();
        let tx = signed_spend(&state, &sk, &a, &recipient, 1_000);
        let genesis = state.chain.find_block(&state.chain.tip().unwrap()).unwrap().unwrap();

        let mut block = Block::new(genesis.header.hash.clone(), 2, vec![tx], 2);
        block.header.hash = vec![0u8; 32];
        let err = state.process_block(block).unwrap_err();
        assert!(matches!(err, NodeError::ChainMismatch));
    }
}
