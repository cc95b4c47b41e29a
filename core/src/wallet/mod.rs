//! Wallet: a keypair plus its derived address, transaction construction
//! (coin selection + signing), and PEM file persistence.
//!
//! Wallet files are a pair of PEM documents: a PKIX-encoded public key and a
//! SEC1-encoded private key, following the `p256`/`pkcs8`/`sec1` family's own
//! codecs rather than a bespoke binary format.

use std::fs;
use std::path::Path;

use crate::address;
use crate::blockchain::chain::Chain;
use crate::crypto::hash;
use crate::crypto::keys::{KeyError, PrivateKey, PublicKey};
use crate::error::NodeError;
use crate::tx::{Transaction, TxInput, TxOutput};

pub struct Wallet {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub address: String,
}

impl Wallet {
    pub fn generate() -> Self {
        let private_key = PrivateKey::generate();
        let public_key = private_key.public_key();
        let address = address::from_public_key(&public_key.to_bytes());
        Self { private_key, public_key, address }
    }

    /// Load a wallet from its public/private PEM files.
    pub fn load(pub_path: &Path, pri_path: &Path) -> Result<Self, KeyError> {
        let pri_pem = fs::read_to_string(pri_path).map_err(|e| KeyError::Pem(e.to_string()))?;
        let pub_pem = fs::read_to_string(pub_path).map_err(|e| KeyError::Pem(e.to_string()))?;
        let private_key = PrivateKey::from_sec1_pem(&pri_pem)?;
        let public_key = PublicKey::from_pkix_pem(&pub_pem)?;
        let address = address::from_public_key(&public_key.to_bytes());
        Ok(Self { private_key, public_key, address })
    }

    /// Create a new wallet and persist it, failing if either file already exists.
    pub fn create(pub_path: &Path, pri_path: &Path) -> Result<Self, KeyError> {
        if pub_path.exists() || pri_path.exists() {
            return Err(KeyError::Pem("wallet files already exist".to_string()));
        }
        let wallet = Self::generate();
        wallet.save(pub_path, pri_path)?;
        Ok(wallet)
    }

    pub fn save(&self, pub_path: &Path, pri_path: &Path) -> Result<(), KeyError> {
        fs::write(pub_path, self.public_key.to_pkix_pem()?).map_err(|e| KeyError::Pem(e.to_string()))?;
        fs::write(pri_path, self.private_key.to_sec1_pem()?).map_err(|e| KeyError::Pem(e.to_string()))?;
        Ok(())
    }
}

/// Build and sign a transfer of `amount` from `wallet` to `to_address`,
/// selecting inputs by `Chain::find_enough` and adding a change output of
/// the surplus back to `wallet.address` when one exists. No fee is ever
/// withheld; surplus beyond `amount` not returned as change is simply lost,
/// matching the absence of a fee market in this ledger.
pub fn new_transaction(wallet: &Wallet, chain: &Chain, to_address: &str, amount: u64) -> Result<Transaction, NodeError> {
    if amount == 0 {
        return Err(NodeError::InvalidAddress("amount must be greater than zero".to_string()));
    }
    if !address::is_valid(&wallet.address) {
        return Err(NodeError::InvalidAddress(wallet.address.clone()));
    }
    if !address::is_valid(to_address) {
        return Err(NodeError::InvalidAddress(to_address.to_string()));
    }

    let (total, selection) = chain
        .find_enough(&wallet.address, amount)
        .map_err(|e| NodeError::StoreIo(e.to_string()))?;
    if total < amount {
        return Err(NodeError::InsufficientBalance { available: total, needed: amount });
    }

    let mut inputs = Vec::new();
    for (prev_tx_id_hex, indices) in &selection {
        let prev_tx = chain
            .find_transaction(prev_tx_id_hex)
            .map_err(|e| NodeError::StoreIo(e.to_string()))?
            .ok_or(NodeError::UnknownUtxo)?;
        let prev_hash = prev_tx.calculate_hash();
        for &out_index in indices {
            inputs.push(TxInput {
                prev_tx_id: prev_tx.id.clone(),
                out_index: out_index as i32,
                from_address: wallet.address.as_bytes().to_vec(),
                signature: wallet.private_key.sign(&prev_hash),
                pubkey: wallet.public_key.to_bytes(),
            });
        }
    }

    let mut outputs = vec![TxOutput::new(amount, to_address).map_err(|e| NodeError::InvalidAddress(e.to_string()))?];
    let change = total - amount;
    if change > 0 {
        outputs.push(TxOutput::new(change, &wallet.address).map_err(|e| NodeError::InvalidAddress(e.to_string()))?);
    }

    let mut tx = Transaction { id: Vec::new(), inputs, outputs };
    tx.id = tx.calculate_hash().to_vec();
    Ok(tx)
}

pub fn hash_hex(bytes: &[u8]) -> String {
    hash::to_hex(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn wallet_round_trips_through_pem_files() {
        let dir = tempdir().unwrap();
        let pub_path = dir.path().join("wallet.pub.pem");
        let pri_path = dir.path().join("wallet.pri.pem");

        let wallet = Wallet::create(&pub_path, &pri_path).unwrap();
        let loaded = Wallet::load(&pub_path, &pri_path).unwrap();
        assert_eq!(wallet.address, loaded.address);
        assert!(wallet.public_key == loaded.public_key);
    }

    #[test]
    fn create_refuses_to_overwrite_existing_files() {
        let dir = tempdir().unwrap();
        let pub_path = dir.path().join("wallet.pub.pem");
        let pri_path = dir.path().join("wallet.pri.pem");
        Wallet::create(&pub_path, &pri_path).unwrap();
        assert!(Wallet::create(&pub_path, &pri_path).is_err());
    }

    #[test]
    fn new_transaction_spends_genesis_and_pays_change() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::generate();
        let chain = Chain::create(&wallet.address, dir.path(), 114_514, 1).unwrap();

        let recipient = Wallet::generate();
        let tx = new_transaction(&wallet, &chain, &recipient.address, 100).unwrap();
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 100);
        assert_eq!(tx.outputs[1].value, 114_414);
        assert!(crate::tx::verify_batch(&chain, &[tx]));
    }

    #[test]
    fn new_transaction_rejects_insufficient_balance() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::generate();
        let chain = Chain::create(&wallet.address, dir.path(), 100, 1).unwrap();
        let recipient = Wallet::generate();
        let err = new_transaction(&wallet, &chain, &recipient.address, 1_000_000).unwrap_err();
        assert!(matches!(err, NodeError::InsufficientBalance { .. }));
    }

    #[test]
    fn new_transaction_rejects_zero_amount() {
        let dir = tempdir().unwrap();
        let wallet = Wallet::generate();
        let chain = Chain::create(&wallet.address, dir.path(), 100, 1).unwrap();
        let err = new_transaction(&wallet, &chain, &wallet.address, 0).unwrap_err();
        assert!(matches!(err, NodeError::InvalidAddress(_)));
    }
}
