//! The canonical chain: a tip pointer, height counter, and append path over
//! the embedded ledger store. There is no fork-choice here — a block either
//! extends the tip or is rejected and left to the block mempool.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::blockchain::block::Block;
use crate::crypto::hash;
use crate::storage::lmdb::{Storage, UtxoEntry};
use crate::tx::Transaction;
use crate::utxo;

pub struct Chain {
    storage: Storage,
    tip: Mutex<Option<String>>,
    height: AtomicU64,
    /// Serializes block+tip+UTXO mutation; held only across `add_block`/
    /// `add_genesis_block`, never across a channel send.
    append_lock: Mutex<()>,
}

impl Chain {
    /// Create a brand new chain at `path`: fails if a chain already exists
    /// there. Writes the genesis block, tip, and its UTXO entry.
    pub fn create(genesis_address: &str, path: &Path, genesis_value: u64, timestamp: u64) -> Result<Self> {
        let storage = Storage::open(path)?;
        if storage.has_tip()? {
            bail!("a chain already exists at {}", path.display());
        }
        let chain = Self {
            storage,
            tip: Mutex::new(None),
            height: AtomicU64::new(0),
            append_lock: Mutex::new(()),
        };
        let genesis = Block::genesis(genesis_address, genesis_value, timestamp)?;
        chain.add_genesis_block(genesis)?;
        Ok(chain)
    }

    /// Open an existing chain, or an empty one (`tip = None`, `height = 0`)
    /// if nothing has been written yet — the node then expects to sync.
    pub fn load(path: &Path) -> Result<Self> {
        let storage = Storage::open(path)?;
        let tip = storage.get_tip()?;
        let height = match &tip {
            Some(hash_hex) => storage
                .get_block(hash_hex)?
                .map(|b| b.header.height)
                .unwrap_or(0),
            None => 0,
        };
        Ok(Self {
            storage,
            tip: Mutex::new(tip),
            height: AtomicU64::new(height),
            append_lock: Mutex::new(()),
        })
    }

    pub fn tip(&self) -> Option<String> {
        self.tip.lock().clone()
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn find_block(&self, hash_hex: &str) -> Result<Option<Block>> {
        self.storage.get_block(hash_hex)
    }

    pub fn find_transaction(&self, id_hex: &str) -> Result<Option<Transaction>> {
        for block in self.iter_blocks()? {
            for tx in &block.transactions {
                if tx.id_hex() == id_hex {
                    return Ok(Some(tx.clone()));
                }
            }
        }
        Ok(None)
    }

    /// All blocks from the tip back to genesis, tip-first. Only intended for
    /// the relatively small chains this node is specified for — no streaming
    /// iterator is exposed beyond this.
    pub fn iter_blocks(&self) -> Result<Vec<Block>> {
        let mut out = Vec::new();
        let mut cursor = self.tip();
        while let Some(hash_hex) = cursor {
            let block = match self.storage.get_block(&hash_hex)? {
                Some(b) => b,
                None => break,
            };
            let prev = if block.is_genesis() {
                None
            } else {
                Some(block.prev_hash_hex())
            };
            out.push(block);
            cursor = prev;
        }
        Ok(out)
    }

    pub fn find_blocks_in_range(&self, min: u64, max: u64) -> Result<Vec<Block>> {
        Ok(self
            .iter_blocks()?
            .into_iter()
            .filter(|b| b.header.height >= min && b.header.height <= max)
            .collect())
    }

    pub fn find_utxo_snapshot(&self) -> Result<Vec<(String, UtxoEntry)>> {
        Ok(utxo::snapshot_from_blocks(&self.iter_blocks()?))
    }

    pub fn balance(&self, address_str: &str) -> Result<u64> {
        utxo::balance(&self.storage, address_str)
    }

    pub fn find_enough(&self, address_str: &str, amount: u64) -> Result<(u64, utxo::Selection)> {
        utxo::find_enough(&self.storage, address_str, amount)
    }

    pub fn add_genesis_block(&self, block: Block) -> Result<()> {
        let _guard = self.append_lock.lock();
        if !block.is_genesis() {
            bail!("add_genesis_block called with a non-genesis-shaped block");
        }
        let entry = utxo::entry_for_outputs(&block.transactions[0].outputs);
        self.storage
            .apply_block(&block, &[], &[(block.transactions[0].id_hex(), entry)])?;
        *self.tip.lock() = Some(block.hash_hex());
        self.height.store(block.header.height, Ordering::SeqCst);
        Ok(())
    }

    /// Append `block` if it extends the current tip. Returns `false` (not an
    /// error) if it does not connect — the block mempool owns orphans.
    pub fn add_block(&self, block: Block) -> Result<bool> {
        let _guard = self.append_lock.lock();
        let current_tip = self.tip.lock().clone();
        let expected_prev = current_tip.as_deref().unwrap_or("");
        if block.prev_hash_hex() != expected_prev || block.header.prev_hash.is_empty() {
            return Ok(false);
        }

        match utxo::compute_update_deltas(&self.storage, &block)? {
            Some((removals, upserts)) => {
                self.storage.apply_block(&block, &removals, &upserts)?;
            }
            None => {
                log::warn!(
                    "utxo update for block {} could not find an expected prior entry; \
                     storing block and scheduling a full reindex",
                    block.hash_hex()
                );
                self.storage.apply_block(&block, &[], &[])?;
                self.full_reindex()?;
            }
        }

        *self.tip.lock() = Some(block.hash_hex());
        self.height.store(block.header.height, Ordering::SeqCst);
        Ok(true)
    }

    fn full_reindex(&self) -> Result<()> {
        let snapshot = self.find_utxo_snapshot()?;
        self.storage.reindex_utxos(&snapshot)
    }

    pub fn hash_hex(bytes: &[u8]) -> String {
        hash::to_hex(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn addr() -> (crate::crypto::keys::PrivateKey, String) {
        let sk = crate::crypto::keys::PrivateKey::generate();
        let a = crate::address::from_public_key(&sk.public_key().to_bytes());
        (sk, a)
    }

    #[test]
    fn create_then_load_sees_same_tip() {
        let dir = tempdir().unwrap();
        let (_, a) = addr();
        {
            let chain = Chain::create(&a, dir.path(), 114_514, 1).unwrap();
            assert_eq!(chain.height(), 1);
        }
        let reopened = Chain::load(dir.path()).unwrap();
        assert_eq!(reopened.height(), 1);
        assert!(reopened.tip().is_some());
    }

    #[test]
    fn create_fails_if_chain_already_exists() {
        let dir = tempdir().unwrap();
        let (_, a) = addr();
        Chain::create(&a, dir.path(), 100, 1).unwrap();
        assert!(Chain::create(&a, dir.path(), 100, 1).is_err());
    }

    #[test]
    fn load_with_no_chain_yields_empty_chain() {
        let dir = tempdir().unwrap();
        let chain = Chain::load(dir.path()).unwrap();
        assert_eq!(chain.height(), 0);
        assert!(chain.tip().is_none());
    }

    #[test]
    fn add_block_rejects_non_connecting_block() {
        let dir = tempdir().unwrap();
        let (_, a) = addr();
        let chain = Chain::create(&a, dir.path(), 100, 1).unwrap();
        let orphan = Block::new(vec![0xAA; 32], 2, vec![], 2);
        assert!(!chain.add_block(orphan).unwrap());
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn add_block_extends_tip_and_updates_balance() {
        let dir = tempdir().unwrap();
        let (sk, a) = addr();
        let chain = Chain::create(&a, dir.path(), 114_514, 1).unwrap();
        let genesis = chain.find_block(&chain.tip().unwrap()).unwrap().unwrap();
        let gtx = genesis.transactions[0].clone();

        let (_, recipient_addr) = addr();
        let mut input = crate::tx::TxInput {
            prev_tx_id: gtx.id.clone(),
            out_index: 0,
            from_address: a.as_bytes().to_vec(),
            signature: Vec::new(),
            pubkey: sk.public_key().to_bytes(),
        };
        input.signature = sk.sign(&gtx.calculate_hash());

        let payment = crate::tx::TxOutput::new(100, &recipient_addr).unwrap();
        let change = crate::tx::TxOutput::new(114_414, &a).unwrap();
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![payment, change],
        };
        tx.id = tx.calculate_hash().to_vec();

        let next = Block::new(genesis.header.hash.clone(), 2, vec![tx.clone()], 2);
        assert!(chain.add_block(next).unwrap());
        assert_eq!(chain.height(), 2);

        let snapshot = chain.find_utxo_snapshot().unwrap().into_iter().collect::<std::collections::HashMap<_, _>>();
        assert!(!snapshot.contains_key(&gtx.id_hex()));
        assert!(snapshot.contains_key(&tx.id_hex()));
    }
}
