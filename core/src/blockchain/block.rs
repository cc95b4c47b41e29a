//! Block header and block bodies. A block's `hash` is the SHA-256 of its
//! canonical serialization with `hash` cleared; the genesis block is the only
//! block carrying a coinbase transaction.

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::crypto::hash;
use crate::tx::Transaction;

pub const GENESIS_HEIGHT: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub timestamp: u64,
    #[serde(with = "canonical")]
    pub prev_hash: Vec<u8>,
    #[serde(with = "canonical")]
    pub hash: Vec<u8>,
    pub height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub tx_count: u32,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(prev_hash: Vec<u8>, height: u64, transactions: Vec<Transaction>, timestamp: u64) -> Self {
        let tx_count = transactions.len() as u32;
        let mut block = Self {
            header: BlockHeader {
                timestamp,
                prev_hash,
                hash: Vec::new(),
                height,
            },
            tx_count,
            transactions,
        };
        block.header.hash = block.calculate_hash().to_vec();
        block
    }

    /// The first block on the chain: height 1, empty `prev_hash`, exactly one
    /// coinbase transaction minting `genesis_value` to `genesis_address`.
    pub fn genesis(
        genesis_address: &str,
        genesis_value: u64,
        timestamp: u64,
    ) -> Result<Self, crate::address::AddressError> {
        let coinbase = Transaction::new_coinbase(genesis_address, genesis_value)?;
        Ok(Self::new(Vec::new(), GENESIS_HEIGHT, vec![coinbase], timestamp))
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == GENESIS_HEIGHT && self.header.prev_hash.is_empty()
    }

    pub fn hash_hex(&self) -> String {
        hash::to_hex(&self.header.hash)
    }

    pub fn prev_hash_hex(&self) -> String {
        hash::to_hex(&self.header.prev_hash)
    }

    /// SHA-256 over the canonical serialization of the whole block with the
    /// header's `hash` field cleared.
    pub fn calculate_hash(&self) -> [u8; 32] {
        let mut cleared = self.clone();
        cleared.header.hash = Vec::new();
        hash::sha256(&canonical::to_canonical_bytes(&cleared))
    }

    pub fn has_valid_hash(&self) -> bool {
        self.header.hash == self.calculate_hash()
    }
}
