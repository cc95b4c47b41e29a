//! Wire messages exchanged by the consensus engine. Every message carries
//! the sender's id, the view it was sent in, and a signature over
//! `block_hash` so a receiver can verify authenticity without a side channel.

use serde::{Deserialize, Serialize};

use crate::blockchain::block::Block;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConsensusMessage {
    Prepare(PrepareMessage),
    Sign(SignMessage),
    Commit(CommitMessage),
    ViewChange(ViewChangeMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareMessage {
    pub id: String,
    pub height: u64,
    pub block_hash: Vec<u8>,
    pub block: Block,
    pub view: u64,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignMessage {
    pub id: String,
    pub height: u64,
    pub block_hash: Vec<u8>,
    pub view: u64,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMessage {
    pub id: String,
    pub height: u64,
    pub block_hash: Vec<u8>,
    pub view: u64,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    pub id: String,
    pub height: u64,
    pub block_hash: Vec<u8>,
    pub view: u64,
    pub to_view: u64,
    pub sign: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl ConsensusMessage {
    pub fn sender_id(&self) -> &str {
        match self {
            ConsensusMessage::Prepare(m) => &m.id,
            ConsensusMessage::Sign(m) => &m.id,
            ConsensusMessage::Commit(m) => &m.id,
            ConsensusMessage::ViewChange(m) => &m.id,
        }
    }

    pub fn height(&self) -> u64 {
        match self {
            ConsensusMessage::Prepare(m) => m.height,
            ConsensusMessage::Sign(m) => m.height,
            ConsensusMessage::Commit(m) => m.height,
            ConsensusMessage::ViewChange(m) => m.height,
        }
    }
}
