use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256(SHA-256(data)), used for address checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160(SHA-256(data)), used to derive the 20-byte address payload from a public key.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let mut hasher = Ripemd160::new();
    hasher.update(sha);
    hasher.finalize().into()
}

pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn from_hex(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), sha256(b"abd"));
    }

    #[test]
    fn hash160_is_20_bytes() {
        let h = hash160(b"some public key bytes");
        assert_eq!(h.len(), 20);
    }

    #[test]
    fn hex_roundtrip() {
        let bytes = sha256(b"round trip me");
        assert_eq!(from_hex(&to_hex(&bytes)).unwrap(), bytes.to_vec());
    }
}
