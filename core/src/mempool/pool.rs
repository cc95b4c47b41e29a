//! Transaction mempool: a bounded `hex(tx_id) -> Transaction` map that signals
//! the sealer once full. No fee-rate ordering or eviction — fee markets are
//! out of scope.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::tx::Transaction;

pub struct TxMempool {
    transactions: Arc<RwLock<HashMap<String, Transaction>>>,
    capacity: usize,
    full_signal: mpsc::Sender<()>,
}

impl TxMempool {
    /// Returns the pool plus the receiving half of its one-shot fullness
    /// signal, which the sealer drains to know when to propose a block.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                transactions: Arc::new(RwLock::new(HashMap::new())),
                capacity,
                full_signal: tx,
            },
            rx,
        )
    }

    /// Insert `tx` if its id is not already known. Returns `false` on
    /// duplicate. Fires the fullness signal once the pool reaches capacity.
    pub fn add(&self, tx: Transaction) -> bool {
        let id = tx.id_hex();
        let became_full = {
            let mut guard = self.transactions.write();
            if guard.contains_key(&id) {
                return false;
            }
            guard.insert(id, tx);
            guard.len() >= self.capacity
        };
        if became_full {
            // best-effort: a full channel means a signal is already pending
            let _ = self.full_signal.try_send(());
        }
        true
    }

    pub fn contains(&self, id_hex: &str) -> bool {
        self.transactions.read().contains_key(id_hex)
    }

    pub fn remove(&self, id_hex: &str) -> Option<Transaction> {
        self.transactions.write().remove(id_hex)
    }

    pub fn remove_many(&self, ids_hex: &[String]) {
        let mut guard = self.transactions.write();
        for id in ids_hex {
            guard.remove(id);
        }
    }

    pub fn get_all(&self) -> HashMap<String, Transaction> {
        self.transactions.read().clone()
    }

    pub fn count(&self) -> usize {
        self.transactions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::Transaction;

    fn coinbase_tx(value: u64) -> Transaction {
        let sk = crate::crypto::keys::PrivateKey::generate();
        let addr = crate::address::from_public_key(&sk.public_key().to_bytes());
        Transaction::new_coinbase(&addr, value).unwrap()
    }

    #[test]
    fn add_rejects_duplicate_id() {
        let (pool, _rx) = TxMempool::new(10);
        let tx = coinbase_tx(1);
        assert!(pool.add(tx.clone()));
        assert!(!pool.add(tx));
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn fullness_signal_fires_at_capacity() {
        let (pool, mut rx) = TxMempool::new(2);
        assert!(rx.try_recv().is_err());
        pool.add(coinbase_tx(1));
        assert!(rx.try_recv().is_err());
        pool.add(coinbase_tx(2));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn remove_many_drops_listed_ids() {
        let (pool, _rx) = TxMempool::new(10);
        let a = coinbase_tx(1);
        let b = coinbase_tx(2);
        pool.add(a.clone());
        pool.add(b.clone());
        pool.remove_many(&[a.id_hex()]);
        assert!(!pool.contains(&a.id_hex()));
        assert!(pool.contains(&b.id_hex()));
    }
}
