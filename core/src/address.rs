//! Base58Check address codec: `version || hash160(pubkey) || checksum`.
//!
//! An address is the base58 rendering of that 25-byte payload. The checksum is the
//! first 4 bytes of `SHA-256(SHA-256(version || hash160))`.

use crate::crypto::hash;

pub const VERSION_BYTE: u8 = 0x1c;
const CHECKSUM_LEN: usize = 4;
const PAYLOAD_LEN: usize = 1 + 20 + CHECKSUM_LEN;

#[derive(Debug)]
pub enum AddressError {
    BadBase58,
    BadLength(usize),
    ChecksumMismatch,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::BadBase58 => write!(f, "address is not valid base58"),
            AddressError::BadLength(n) => write!(f, "decoded address has wrong length: {n}"),
            AddressError::ChecksumMismatch => write!(f, "address checksum does not match"),
        }
    }
}

impl std::error::Error for AddressError {}

fn checksum(prefix: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = hash::double_sha256(prefix);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// Derive a base58check address from raw public key bytes.
pub fn from_public_key(pubkey_bytes: &[u8]) -> String {
    let hash160 = hash::hash160(pubkey_bytes);
    encode_payload(&hash160)
}

/// Encode a 20-byte hash160 payload into a base58check address string.
pub fn encode_payload(hash160: &[u8; 20]) -> String {
    let mut prefix = Vec::with_capacity(21);
    prefix.push(VERSION_BYTE);
    prefix.extend_from_slice(hash160);
    let cksum = checksum(&prefix);

    let mut full = prefix;
    full.extend_from_slice(&cksum);
    bs58::encode(full).into_string()
}

/// Decode a base58check address string back to its 20-byte hash160 payload,
/// verifying the checksum and version byte.
pub fn decode(address: &str) -> Result<[u8; 20], AddressError> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|_| AddressError::BadBase58)?;
    if raw.len() != PAYLOAD_LEN {
        return Err(AddressError::BadLength(raw.len()));
    }
    let (prefix, cksum) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if checksum(prefix) != cksum {
        return Err(AddressError::ChecksumMismatch);
    }
    let mut hash160 = [0u8; 20];
    hash160.copy_from_slice(&prefix[1..]);
    Ok(hash160)
}

pub fn is_valid(address: &str) -> bool {
    decode(address).is_ok()
}
