//! The PBFT engine: a single-task state machine that consumes one message
//! (or one timer tick) at a time from a bounded channel and drives the node
//! through PrePrepare -> Prepare -> Commit, with a ViewChange escape hatch on
//! timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::blockchain::block::Block;
use crate::blockchain::chain::Chain;
use crate::consensus::clock::{Clock, Deadline};
use crate::consensus::log::MsgLog;
use crate::consensus::message::{CommitMessage, ConsensusMessage, PrepareMessage, SignMessage, ViewChangeMessage};
use crate::crypto::keys::{PrivateKey, PublicKey};
use crate::network::{Adapter, MessageType, NetworkMessage};
use crate::mempool::block_pool::BlockMempool;
use crate::mempool::pool::TxMempool;
use crate::tx;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    PrePrepare,
    Prepare,
    Commit,
    ViewChange,
}

struct EngineState {
    state: State,
    view: u64,
    leader_index: u64,
    is_primary: bool,
}

pub struct PBFTEngine {
    self_id: String,
    self_index: u64,
    node_num: u64,
    max_fault_node: u64,
    private_key: PrivateKey,
    validators: HashMap<String, PublicKey>,
    log: MsgLog,
    chain: Arc<Chain>,
    tx_mempool: Arc<TxMempool>,
    block_mempool: Arc<BlockMempool>,
    net: Arc<dyn Adapter>,
    clock: Arc<dyn Clock>,
    view_change_timeout: Duration,
    deadline: Deadline,
    state: Mutex<EngineState>,
    msg_tx: mpsc::Sender<ConsensusMessage>,
    msg_rx: Mutex<Option<mpsc::Receiver<ConsensusMessage>>>,
}

impl PBFTEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        self_id: String,
        self_index: u64,
        node_num: u64,
        max_fault_node: u64,
        view: u64,
        private_key: PrivateKey,
        validators: HashMap<String, PublicKey>,
        chain: Arc<Chain>,
        tx_mempool: Arc<TxMempool>,
        block_mempool: Arc<BlockMempool>,
        net: Arc<dyn Adapter>,
        clock: Arc<dyn Clock>,
        view_change_timeout: Duration,
    ) -> Arc<Self> {
        let (msg_tx, msg_rx) = mpsc::channel(100);
        let leader_index = (view + chain.height()) % node_num;
        let deadline = Deadline::new(clock.as_ref(), view_change_timeout);

        let engine = Arc::new(Self {
            self_id,
            self_index,
            node_num,
            max_fault_node,
            private_key,
            validators,
            log: MsgLog::new(node_num),
            chain,
            tx_mempool,
            block_mempool,
            net: net.clone(),
            clock,
            view_change_timeout,
            deadline,
            state: Mutex::new(EngineState {
                state: State::PrePrepare,
                view,
                leader_index,
                is_primary: leader_index == self_index,
            }),
            msg_tx,
            msg_rx: Mutex::new(Some(msg_rx)),
        });

        let enqueue_tx = engine.msg_tx.clone();
        net.register_callback(
            MessageType::Consensus,
            Box::new(move |_, bytes, _| {
                if let Ok(NetworkMessage::Consensus(cm)) = serde_json::from_slice::<NetworkMessage>(&bytes) {
                    let _ = enqueue_tx.try_send(cm);
                }
            }),
        );

        engine
    }

    fn quorum(&self) -> usize {
        (2 * self.max_fault_node + 1) as usize
    }

    pub fn is_primary(&self) -> bool {
        self.state.lock().is_primary
    }

    pub fn current_view(&self) -> u64 {
        self.state.lock().view
    }

    /// Feed a message in from the network layer (or a locally produced
    /// Prepare, when this node is primary). Drops the message if the queue
    /// is full rather than blocking the caller.
    pub fn enqueue(&self, msg: ConsensusMessage) {
        let _ = self.msg_tx.try_send(msg);
    }

    /// Drive the engine until the process shuts down. Must be called exactly
    /// once; the message receiver is taken on first call.
    pub async fn run(self: Arc<Self>) {
        let mut rx = self
            .msg_rx
            .lock()
            .take()
            .expect("PBFTEngine::run called more than once");
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some(msg) => self.handle_message(msg),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.check_view_change_timeout();
                }
            }
        }
    }

    /// Called by the sealer when the primary's tx mempool signals fullness.
    /// Builds and broadcasts a Prepare, then feeds it to this node's own
    /// engine exactly as a replica would receive it.
    pub fn propose(&self) {
        if !self.is_primary() {
            return;
        }
        let txs: Vec<_> = self.tx_mempool.get_all().into_values().collect();
        if txs.is_empty() {
            return;
        }
        let tip = self.chain.tip().unwrap_or_default();
        let height = self.chain.height() + 1;
        let prev_hash = hex::decode(&tip).unwrap_or_default();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let block = Block::new(prev_hash, height, txs, timestamp);
        let block_hash = block.header.hash.clone();
        let sign = self.private_key.sign(&block_hash);

        let prepare = PrepareMessage {
            id: self.self_id.clone(),
            height,
            block_hash,
            block,
            view: self.current_view(),
            sign,
            pubkey: self.private_key.public_key().to_bytes(),
        };

        self.net.broadcast(&NetworkMessage::Consensus(ConsensusMessage::Prepare(prepare.clone())));
        self.enqueue(ConsensusMessage::Prepare(prepare));
    }

    fn handle_message(&self, msg: ConsensusMessage) {
        match msg {
            ConsensusMessage::ViewChange(vc) => self.handle_view_change(vc),
            ConsensusMessage::Prepare(p) => {
                if self.state.lock().state == State::PrePrepare {
                    self.handle_prepare(p);
                }
            }
            ConsensusMessage::Sign(s) => {
                if self.state.lock().state == State::Prepare {
                    self.handle_sign(s);
                }
            }
            ConsensusMessage::Commit(c) => {
                if self.state.lock().state == State::Commit {
                    self.handle_commit(c);
                }
            }
        }
    }

    fn verify_sender(&self, id: &str, block_hash: &[u8], sign: &[u8], pubkey_bytes: &[u8]) -> bool {
        let Some(registered) = self.validators.get(id) else {
            return false;
        };
        let Ok(pubkey) = PublicKey::from_bytes(pubkey_bytes) else {
            return false;
        };
        if pubkey != *registered {
            return false;
        }
        pubkey.verify(block_hash, sign)
    }

    fn handle_prepare(&self, prepare: PrepareMessage) {
        if prepare.view != self.current_view() {
            log::debug!(target: "consensus", "rejecting prepare: view mismatch");
            return;
        }
        if !self.verify_sender(&prepare.id, &prepare.block_hash, &prepare.sign, &prepare.pubkey) {
            log::warn!(target: "consensus", "rejecting prepare from {}: bad signature", prepare.id);
            return;
        }
        if self.log.has_prepare(prepare.height, &prepare.id) {
            return;
        }
        let tip = self.chain.tip().unwrap_or_default();
        if prepare.block.prev_hash_hex() != tip {
            log::debug!(target: "consensus", "rejecting prepare: prev_hash does not match tip");
            return;
        }
        if prepare.block.transactions.is_empty() {
            log::warn!(target: "consensus", "primary proposed an empty block, raising a view change");
            self.begin_view_change();
            return;
        }
        if !tx::verify_batch(&self.chain, &prepare.block.transactions) {
            log::warn!(target: "consensus", "rejecting prepare: a transaction failed verification");
            return;
        }

        for t in &prepare.block.transactions {
            self.tx_mempool.remove(&t.id_hex());
        }

        self.log.cache_block(prepare.block.clone());
        self.log.add_prepare(prepare.clone());
        self.deadline.reset(self.clock.as_ref());

        let sign = self.private_key.sign(&prepare.block_hash);
        let sign_msg = SignMessage {
            id: self.self_id.clone(),
            height: prepare.height,
            block_hash: prepare.block_hash.clone(),
            view: prepare.view,
            sign,
            pubkey: self.private_key.public_key().to_bytes(),
        };
        self.log.add_sign(sign_msg.clone());
        self.net
            .broadcast(&NetworkMessage::Consensus(ConsensusMessage::Sign(sign_msg)));
        self.state.lock().state = State::Prepare;
    }

    fn handle_sign(&self, sign: SignMessage) {
        if sign.view != self.current_view() {
            return;
        }
        if !self.verify_sender(&sign.id, &sign.block_hash, &sign.sign, &sign.pubkey) {
            log::warn!(target: "consensus", "rejecting sign from {}: bad signature", sign.id);
            return;
        }
        if self.log.has_sign(sign.height, &sign.id) {
            return;
        }
        if !self.log.has_block(sign.height) {
            return;
        }
        self.log.add_sign(sign.clone());

        if self.log.sign_count(sign.height) >= self.quorum() {
            let Some(own) = self.log.own_sign(sign.height, &self.self_id) else {
                return;
            };
            let commit = CommitMessage {
                id: self.self_id.clone(),
                height: own.height,
                block_hash: own.block_hash,
                view: self.current_view(),
                sign: own.sign,
                pubkey: self.private_key.public_key().to_bytes(),
            };
            self.log.add_commit(commit.clone());
            self.net
                .broadcast(&NetworkMessage::Consensus(ConsensusMessage::Commit(commit)));
            self.state.lock().state = State::Commit;
        }
    }

    fn handle_commit(&self, commit: CommitMessage) {
        if commit.view != self.current_view() {
            return;
        }
        if !self.verify_sender(&commit.id, &commit.block_hash, &commit.sign, &commit.pubkey) {
            log::warn!(target: "consensus", "rejecting commit from {}: bad signature", commit.id);
            return;
        }
        if self.log.has_commit(commit.height, &commit.id) {
            return;
        }
        if !self.log.has_block(commit.height) {
            return;
        }
        self.log.add_commit(commit.clone());

        if self.log.commit_count(commit.height) >= self.quorum() {
            if let Some(block) = self.log.get_block(commit.height) {
                if let Err(e) = self.block_mempool.receive_block(block) {
                    log::warn!(target: "consensus", "failed to append committed block: {e}");
                }
            }
            self.deadline.stop();
            self.finish_cycle(commit.height);
        }
    }

    fn begin_view_change(&self) {
        self.deadline.reset(self.clock.as_ref());
        let height = self.chain.height();
        let view = self.current_view();
        let to_view = (view + 1) % self.node_num;
        let tip = hex::decode(self.chain.tip().unwrap_or_default()).unwrap_or_default();
        let sign = self.private_key.sign(&tip);
        let msg = ViewChangeMessage {
            id: self.self_id.clone(),
            height,
            block_hash: tip,
            view,
            to_view,
            sign,
            pubkey: self.private_key.public_key().to_bytes(),
        };
        self.log.add_view_change(msg.clone());
        self.net
            .broadcast(&NetworkMessage::Consensus(ConsensusMessage::ViewChange(msg)));
        self.state.lock().state = State::ViewChange;
    }

    fn handle_view_change(&self, vc: ViewChangeMessage) {
        if self.chain.height() > vc.height {
            return;
        }
        if !self.verify_sender(&vc.id, &vc.block_hash, &vc.sign, &vc.pubkey) {
            log::warn!(target: "consensus", "rejecting view change from {}: bad signature", vc.id);
            return;
        }
        if self.log.has_view_change(vc.height, &vc.id, vc.to_view) {
            return;
        }
        self.log.add_view_change(vc.clone());

        if self.state.lock().state != State::ViewChange {
            return;
        }

        if self.log.view_change_count(vc.height, vc.to_view) >= self.quorum() {
            {
                let mut guard = self.state.lock();
                guard.view = vc.to_view;
            }
            self.finish_cycle(vc.height);
        }
    }

    /// Shared tail of a successful Commit or ViewChange quorum: recompute
    /// leadership, clear this height's message cache, and return to
    /// PrePrepare for the next height.
    fn finish_cycle(&self, height: u64) {
        let node_num = self.node_num;
        let self_index = self.self_index;
        let mut guard = self.state.lock();
        let leader_index = (guard.view + self.chain.height()) % node_num;
        guard.leader_index = leader_index;
        guard.is_primary = leader_index == self_index;
        guard.state = State::PrePrepare;
        drop(guard);
        self.log.clear(height);
    }

    fn check_view_change_timeout(&self) {
        if self.state.lock().state == State::ViewChange {
            return;
        }
        if self.deadline.expired(self.clock.as_ref()) {
            self.begin_view_change();
        }
    }
}
