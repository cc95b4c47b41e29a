//! Embedded ordered key-value store backing the ledger: one LMDB environment
//! (via `heed`) holding a `blocks` table, a `utxos` table, and a small `meta`
//! table for the tip pointer. Values are JSON-coded so the persisted bytes are
//! the same canonical JSON used for hashing (§6).

use std::path::Path;

use anyhow::{Context, Result};
use heed::types::{SerdeJson, Str};
use heed::{Database, Env, EnvOpenOptions};

use crate::blockchain::block::Block;
use crate::tx::TxOutput;

pub const TIP_KEY: &str = "__tip__";

/// A transaction's unspent outputs: ordered `(out_index, output)` pairs.
pub type UtxoEntry = Vec<(u32, TxOutput)>;

#[derive(Clone)]
pub struct Storage {
    env: Env,
    blocks: Database<Str, SerdeJson<Block>>,
    utxos: Database<Str, SerdeJson<UtxoEntry>>,
    meta: Database<Str, Str>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating ledger store directory {}", path.display()))?;

        let map_size_gb: usize = std::env::var("LEDGER_LMDB_MAP_SIZE_GB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_gb * 1024 * 1024 * 1024)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let blocks = env.create_database(&mut wtxn, Some("blocks"))?;
        let utxos = env.create_database(&mut wtxn, Some("utxos"))?;
        let meta = env.create_database(&mut wtxn, Some("meta"))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            blocks,
            utxos,
            meta,
        })
    }

    /// True iff this store already holds a chain (a tip has been written).
    pub fn has_tip(&self) -> Result<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.meta.get(&rtxn, TIP_KEY)?.is_some())
    }

    pub fn get_tip(&self) -> Result<Option<String>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.meta.get(&rtxn, TIP_KEY)?.map(|s| s.to_string()))
    }

    pub fn get_block(&self, hash_hex: &str) -> Result<Option<Block>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.blocks.get(&rtxn, hash_hex)?)
    }

    pub fn get_utxo_entry(&self, tx_id_hex: &str) -> Result<Option<UtxoEntry>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.utxos.get(&rtxn, tx_id_hex)?)
    }

    /// Iterate every `(tx_id_hex, entry)` pair currently in the UTXO table.
    pub fn iter_utxos(&self) -> Result<Vec<(String, UtxoEntry)>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.utxos.iter(&rtxn)? {
            let (k, v) = item?;
            out.push((k.to_string(), v));
        }
        Ok(out)
    }

    /// Write `block` and set the tip pointer to its hash inside one atomic
    /// transaction; `utxo_removals` drops outpoints first, then
    /// `utxo_upserts` writes fresh entries, matching the input-before-output
    /// ordering required for UTXO updates (§4.3).
    pub fn apply_block(
        &self,
        block: &Block,
        utxo_removals: &[(String, u32)],
        utxo_upserts: &[(String, UtxoEntry)],
    ) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let hash_hex = block.hash_hex();

        self.blocks.put(&mut wtxn, &hash_hex, block)?;
        self.meta.put(&mut wtxn, TIP_KEY, &hash_hex)?;

        for (tx_id, out_index) in utxo_removals {
            if let Some(mut entry) = self.utxos.get(&wtxn, tx_id)? {
                entry.retain(|(idx, _)| idx != out_index);
                if entry.is_empty() {
                    self.utxos.delete(&mut wtxn, tx_id)?;
                } else {
                    self.utxos.put(&mut wtxn, tx_id, &entry)?;
                }
            }
        }
        for (tx_id, entry) in utxo_upserts {
            if entry.is_empty() {
                self.utxos.delete(&mut wtxn, tx_id)?;
            } else {
                self.utxos.put(&mut wtxn, tx_id, entry)?;
            }
        }

        wtxn.commit()?;
        Ok(())
    }

    /// Replace the entire UTXO table with `snapshot` (used by full reindex).
    pub fn reindex_utxos(&self, snapshot: &[(String, UtxoEntry)]) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.utxos.clear(&mut wtxn)?;
        for (tx_id, entry) in snapshot {
            if !entry.is_empty() {
                self.utxos.put(&mut wtxn, tx_id, entry)?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::Block;
    use tempfile::tempdir;

    fn addr() -> String {
        let sk = crate::crypto::keys::PrivateKey::generate();
        crate::address::from_public_key(&sk.public_key().to_bytes())
    }

    #[test]
    fn open_creates_directory_and_empty_store() {
        let dir = tempdir().unwrap();
        let store = Storage::open(dir.path()).unwrap();
        assert!(!store.has_tip().unwrap());
        assert!(store.get_tip().unwrap().is_none());
    }

    #[test]
    fn apply_block_sets_tip_and_persists_block() {
        let dir = tempdir().unwrap();
        let store = Storage::open(dir.path()).unwrap();
        let a = addr();
        let genesis = Block::genesis(&a, 100, 1).unwrap();
        let tx = &genesis.transactions[0];
        let entry = vec![(0u32, tx.outputs[0].clone())];
        store
            .apply_block(&genesis, &[], &[(tx.id_hex(), entry)])
            .unwrap();

        assert!(store.has_tip().unwrap());
        assert_eq!(store.get_tip().unwrap().unwrap(), genesis.hash_hex());
        let fetched = store.get_block(&genesis.hash_hex()).unwrap().unwrap();
        assert_eq!(fetched, genesis);
    }

    #[test]
    fn apply_block_removes_spent_utxos_before_inserting_new_ones() {
        let dir = tempdir().unwrap();
        let store = Storage::open(dir.path()).unwrap();
        let a = addr();
        let genesis = Block::genesis(&a, 100, 1).unwrap();
        let gtx = &genesis.transactions[0];
        store
            .apply_block(
                &genesis,
                &[],
                &[(gtx.id_hex(), vec![(0, gtx.outputs[0].clone())])],
            )
            .unwrap();

        // simulate spending the genesis output entirely
        store.apply_block(&genesis, &[(gtx.id_hex(), 0)], &[]).unwrap();

        assert!(store.get_utxo_entry(&gtx.id_hex()).unwrap().is_none());
    }

    #[test]
    fn reindex_replaces_utxo_table() {
        let dir = tempdir().unwrap();
        let store = Storage::open(dir.path()).unwrap();
        let a = addr();
        let genesis = Block::genesis(&a, 100, 1).unwrap();
        let gtx = &genesis.transactions[0];
        store
            .apply_block(
                &genesis,
                &[],
                &[(gtx.id_hex(), vec![(0, gtx.outputs[0].clone())])],
            )
            .unwrap();

        store.reindex_utxos(&[]).unwrap();
        assert!(store.get_utxo_entry(&gtx.id_hex()).unwrap().is_none());

        store
            .reindex_utxos(&[(gtx.id_hex(), vec![(0, gtx.outputs[0].clone())])])
            .unwrap();
        assert!(store.get_utxo_entry(&gtx.id_hex()).unwrap().is_some());
    }
}
