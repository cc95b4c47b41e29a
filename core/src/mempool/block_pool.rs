//! Block mempool: an orphan cache for blocks that don't yet connect to the
//! tip, plus the periodic sync driver that pulls missing ranges from peers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::blockchain::block::Block;
use crate::blockchain::chain::Chain;

pub struct BlockMempool {
    orphans: Mutex<HashMap<String, Block>>,
    capacity: usize,
    chain: Arc<Chain>,
}

impl BlockMempool {
    pub fn new(chain: Arc<Chain>, capacity: usize) -> Self {
        Self {
            orphans: Mutex::new(HashMap::new()),
            capacity,
            chain,
        }
    }

    /// Insert `block` into the orphan cache. If the cache has reached
    /// capacity, immediately attempt a reindex pass.
    pub fn add(&self, block: Block) -> anyhow::Result<()> {
        let became_full = {
            let mut guard = self.orphans.lock();
            guard.insert(block.hash_hex(), block);
            guard.len() >= self.capacity
        };
        if became_full {
            self.reindex()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.orphans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Repeatedly scan the cache for a block whose `prev_hash` matches the
    /// current chain tip, append it, and remove it. Loops until a full pass
    /// makes no progress (chains of orphans resolve in one call).
    pub fn reindex(&self) -> anyhow::Result<()> {
        loop {
            let candidate = {
                let guard = self.orphans.lock();
                let tip = self.chain.tip().unwrap_or_default();
                guard
                    .values()
                    .find(|b| b.prev_hash_hex() == tip)
                    .map(|b| b.hash_hex())
            };
            let Some(hash_hex) = candidate else {
                break;
            };
            let block = {
                let mut guard = self.orphans.lock();
                match guard.remove(&hash_hex) {
                    Some(b) => b,
                    None => continue,
                }
            };
            if !self.chain.add_block(block.clone())? {
                // tip moved under us between the scan and the append; put it back
                self.orphans.lock().insert(hash_hex, block);
                break;
            }
        }
        Ok(())
    }

    /// Attempt to append `block` directly; if it does not connect, stash it
    /// as an orphan and try to resolve the cache.
    pub fn receive_block(&self, block: Block) -> anyhow::Result<()> {
        if self.chain.add_block(block.clone())? {
            self.reindex()?;
        } else {
            self.add(block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;
    use tempfile::tempdir;

    fn addr() -> String {
        let sk = crate::crypto::keys::PrivateKey::generate();
        crate::address::from_public_key(&sk.public_key().to_bytes())
    }

    fn empty_block(prev_hash: Vec<u8>, height: u64) -> Block {
        let a = addr();
        let tx = Transaction::new_coinbase(&a, 1).unwrap();
        Block::new(prev_hash, height, vec![tx], height)
    }

    #[test]
    fn orphan_blocks_chain_in_on_parent_arrival() {
        let dir = tempdir().unwrap();
        let a = addr();
        let chain = Arc::new(Chain::create(&a, dir.path(), 100, 1).unwrap());
        let genesis_hash = chain.tip().unwrap();

        let b2 = empty_block(hex::decode(&genesis_hash).unwrap(), 2);
        let b3 = empty_block(b2.header.hash.clone(), 3);

        let pool = BlockMempool::new(chain.clone(), 100);
        pool.receive_block(b3.clone()).unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(pool.len(), 1);

        pool.receive_block(b2.clone()).unwrap();
        assert_eq!(chain.height(), 3);
        assert!(pool.is_empty());
    }

    #[test]
    fn reaching_capacity_triggers_reindex() {
        let dir = tempdir().unwrap();
        let a = addr();
        let chain = Arc::new(Chain::create(&a, dir.path(), 100, 1).unwrap());
        let genesis_hash = chain.tip().unwrap();
        let b2 = empty_block(hex::decode(&genesis_hash).unwrap(), 2);

        let pool = BlockMempool::new(chain.clone(), 1);
        pool.add(b2).unwrap();
        assert_eq!(chain.height(), 2);
        assert!(pool.is_empty());
    }
}
