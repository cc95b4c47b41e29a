//! The transaction data model: coinbase and transfer transactions, canonical
//! hashing, and the coinbase sentinel convention.

use serde::{Deserialize, Serialize};

use crate::address;
use crate::canonical;
use crate::crypto::hash;

/// `out_index` used by the single input of a coinbase transaction.
pub const COINBASE_OUT_INDEX: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(with = "canonical")]
    pub prev_tx_id: Vec<u8>,
    pub out_index: i32,
    #[serde(with = "canonical")]
    pub from_address: Vec<u8>,
    #[serde(with = "canonical")]
    pub signature: Vec<u8>,
    #[serde(with = "canonical")]
    pub pubkey: Vec<u8>,
}

impl TxInput {
    pub fn is_coinbase(&self) -> bool {
        self.out_index == COINBASE_OUT_INDEX
    }

    fn coinbase_sentinel() -> Self {
        Self {
            prev_tx_id: Vec::new(),
            out_index: COINBASE_OUT_INDEX,
            from_address: Vec::new(),
            signature: Vec::new(),
            pubkey: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    /// UTF-8 bytes of the base58check address string the output pays to.
    #[serde(with = "canonical")]
    pub to_address: Vec<u8>,
    /// `base58_decode(to_address)`, stored alongside for cheap unlock checks.
    #[serde(with = "canonical")]
    pub pubkey_hash: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, to_address: &str) -> Result<Self, address::AddressError> {
        let pubkey_hash = address::decode(to_address)?;
        Ok(Self {
            value,
            to_address: to_address.as_bytes().to_vec(),
            pubkey_hash: pubkey_hash.to_vec(),
        })
    }

    pub fn to_address_str(&self) -> String {
        String::from_utf8_lossy(&self.to_address).into_owned()
    }

    /// An output is unlockable by `address` iff its pubkey_hash matches the
    /// address's decoded payload.
    pub fn is_unlockable_by(&self, decoded_address: &[u8; 20]) -> bool {
        self.pubkey_hash == decoded_address
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "canonical")]
    pub id: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// A single sentinel input minting `value` to `address`. Used only to build
    /// the genesis block's coinbase transaction.
    pub fn new_coinbase(address: &str, value: u64) -> Result<Self, address::AddressError> {
        let mut tx = Self {
            id: Vec::new(),
            inputs: vec![TxInput::coinbase_sentinel()],
            outputs: vec![TxOutput::new(value, address)?],
        };
        tx.id = tx.calculate_hash().to_vec();
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    pub fn id_hex(&self) -> String {
        hash::to_hex(&self.id)
    }

    /// SHA-256 over the canonical serialization of this transaction with `id`
    /// cleared. Stable regardless of whether `id` is currently set.
    pub fn calculate_hash(&self) -> [u8; 32] {
        let mut cleared = self.clone();
        cleared.id = Vec::new();
        hash::sha256(&canonical::to_canonical_bytes(&cleared))
    }

    /// True iff `self.id` matches the freshly recomputed canonical hash.
    pub fn has_valid_id(&self) -> bool {
        self.id == self.calculate_hash()
    }
}

/// Reject the batch if any non-coinbase input's `(prev_tx_id, out_index)`
/// appears twice across it (an in-block double spend), or if any input's
/// signature does not verify against `hash(prev_tx)` under its declared
/// public key.
pub fn verify_batch(chain: &crate::blockchain::chain::Chain, txs: &[Transaction]) -> bool {
    let mut seen = std::collections::HashSet::new();
    for tx in txs {
        if tx.is_coinbase() {
            continue;
        }
        for input in &tx.inputs {
            let key = (hash::to_hex(&input.prev_tx_id), input.out_index);
            if !seen.insert(key) {
                return false;
            }
            let prev_tx = match chain.find_transaction(&hash::to_hex(&input.prev_tx_id)) {
                Ok(Some(t)) => t,
                _ => return false,
            };
            let pubkey = match crate::crypto::keys::PublicKey::from_bytes(&input.pubkey) {
                Ok(p) => p,
                Err(_) => return false,
            };
            if !pubkey.verify(&prev_tx.calculate_hash(), &input.signature) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PrivateKey;

    fn addr() -> (PrivateKey, String) {
        let sk = PrivateKey::generate();
        let addr = address::from_public_key(&sk.public_key().to_bytes());
        (sk, addr)
    }

    #[test]
    fn coinbase_has_sentinel_input() {
        let (_, a) = addr();
        let tx = Transaction::new_coinbase(&a, 100).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(tx.inputs[0].out_index, COINBASE_OUT_INDEX);
        assert!(tx.inputs[0].prev_tx_id.is_empty());
    }

    #[test]
    fn id_is_stable_and_excludes_itself() {
        let (_, a) = addr();
        let tx = Transaction::new_coinbase(&a, 100).unwrap();
        assert!(tx.has_valid_id());
        let recomputed = tx.calculate_hash();
        assert_eq!(tx.id, recomputed);
    }

    #[test]
    fn tampering_with_outputs_changes_hash() {
        let (_, a) = addr();
        let mut tx = Transaction::new_coinbase(&a, 100).unwrap();
        let original_hash = tx.calculate_hash();
        tx.outputs[0].value = 200;
        assert_ne!(tx.calculate_hash(), original_hash);
    }

    #[test]
    fn output_unlockable_only_by_matching_address() {
        let (_, a) = addr();
        let (_, other) = addr();
        let out = TxOutput::new(50, &a).unwrap();
        assert!(out.is_unlockable_by(&address::decode(&a).unwrap()));
        assert!(!out.is_unlockable_by(&address::decode(&other).unwrap()));
    }

    #[test]
    fn transaction_round_trips_through_json() {
        let (_, a) = addr();
        let tx = Transaction::new_coinbase(&a, 100).unwrap();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, back);
    }

    #[test]
    fn verify_batch_accepts_a_correctly_signed_spend() {
        use crate::blockchain::chain::Chain;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let (sk, a) = addr();
        let chain = Chain::create(&a, dir.path(), 500, 1).unwrap();
        let genesis = chain.find_block(&chain.tip().unwrap()).unwrap().unwrap();
        let gtx = genesis.transactions[0].clone();

        let (_, recipient) = addr();
        let mut input = TxInput {
            prev_tx_id: gtx.id.clone(),
            out_index: 0,
            from_address: a.as_bytes().to_vec(),
            signature: Vec::new(),
            pubkey: sk.public_key().to_bytes(),
        };
        input.signature = sk.sign(&gtx.calculate_hash());
        let mut tx = Transaction {
            id: Vec::new(),
            inputs: vec![input],
            outputs: vec![TxOutput::new(500, &recipient).unwrap()],
        };
        tx.id = tx.calculate_hash().to_vec();

        assert!(verify_batch(&chain, &[tx.clone()]));

        let mut tampered = tx.clone();
        tampered.inputs[0].signature[0] ^= 0xFF;
        assert!(!verify_batch(&chain, &[tampered]));

        // duplicate outpoint within the same batch is an in-block double spend
        assert!(!verify_batch(&chain, &[tx.clone(), tx]));
    }
}
