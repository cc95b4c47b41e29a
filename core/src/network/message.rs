use serde::{Deserialize, Serialize};

use crate::blockchain::block::Block;
use crate::consensus::message::ConsensusMessage;
use crate::tx::Transaction;

/// The three payload kinds a peer can send, and the block-sync request/
/// response shapes riding inside the `Block` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Transaction,
    Block,
    Consensus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NetworkMessage {
    Transaction(Transaction),
    Consensus(ConsensusMessage),
    SyncRequest { from_height: u64 },
    SyncResponse { tip_height: u64 },
    BlockRequest { from_height: u64, limit: u32 },
    BlockResponse { blocks: Vec<Block> },
    NewBlockBroadcast { height: u64, hash: Vec<u8> },
}

impl NetworkMessage {
    pub fn kind(&self) -> MessageType {
        match self {
            NetworkMessage::Transaction(_) => MessageType::Transaction,
            NetworkMessage::Consensus(_) => MessageType::Consensus,
            NetworkMessage::SyncRequest { .. }
            | NetworkMessage::SyncResponse { .. }
            | NetworkMessage::BlockRequest { .. }
            | NetworkMessage::BlockResponse { .. }
            | NetworkMessage::NewBlockBroadcast { .. } => MessageType::Block,
        }
    }
}
