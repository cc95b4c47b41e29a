//! ECDSA-P256 keypairs: generation, signing, verification, and PEM (de)serialization
//! for wallet files (PKIX public key, SEC1 private key).

use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::SecretKey;
use pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rand::rngs::OsRng;
use sec1::{DecodeEcPrivateKey, EncodeEcPrivateKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug)]
pub enum KeyError {
    Pem(String),
    Signature(String),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::Pem(e) => write!(f, "key PEM error: {e}"),
            KeyError::Signature(e) => write!(f, "signature error: {e}"),
        }
    }
}

impl std::error::Error for KeyError {}

/// A private key wrapped so its bytes are zeroed when dropped.
pub struct PrivateKey {
    inner: SigningKey,
}

impl Zeroize for PrivateKey {
    fn zeroize(&mut self) {
        // SigningKey has no in-place zero; replace with a throwaway key so the
        // original scalar is dropped and its bytes go out of scope.
        self.inner = SigningKey::from(SecretKey::from_bytes(&[1u8; 32].into()).unwrap());
    }
}

impl ZeroizeOnDrop for PrivateKey {}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl PrivateKey {
    pub fn generate() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Sign over `msg`. Returns the fixed-width `r || s` concatenation (64 bytes for P-256).
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let sig: Signature = self.inner.sign(msg);
        sig.to_bytes().to_vec()
    }

    pub fn to_sec1_pem(&self) -> Result<String, KeyError> {
        self.inner
            .to_sec1_pem(LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| KeyError::Pem(e.to_string()))
    }

    pub fn from_sec1_pem(pem: &str) -> Result<Self, KeyError> {
        SigningKey::from_sec1_pem(pem)
            .map(|inner| Self { inner })
            .map_err(|e| KeyError::Pem(e.to_string()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// SEC1 uncompressed point bytes, the representation hashed into an address.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(|inner| Self { inner })
            .map_err(|e| KeyError::Signature(e.to_string()))
    }

    pub fn verify(&self, msg: &[u8], sig_bytes: &[u8]) -> bool {
        let sig = match Signature::from_slice(sig_bytes) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.inner.verify(msg, &sig).is_ok()
    }

    pub fn to_pkix_pem(&self) -> Result<String, KeyError> {
        self.inner
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyError::Pem(e.to_string()))
    }

    pub fn from_pkix_pem(pem: &str) -> Result<Self, KeyError> {
        VerifyingKey::from_public_key_pem(pem)
            .map(|inner| Self { inner })
            .map_err(|e| KeyError::Pem(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let sk = PrivateKey::generate();
        let pk = sk.public_key();
        let sig = sk.sign(b"hello ledger");
        assert!(pk.verify(b"hello ledger", &sig));
        assert!(!pk.verify(b"tampered", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let sk1 = PrivateKey::generate();
        let sk2 = PrivateKey::generate();
        let sig = sk1.sign(b"msg");
        assert!(!sk2.public_key().verify(b"msg", &sig));
    }

    #[test]
    fn pem_round_trip() {
        let sk = PrivateKey::generate();
        let pem = sk.to_sec1_pem().unwrap();
        let sk2 = PrivateKey::from_sec1_pem(&pem).unwrap();
        let sig = sk2.sign(b"pem test");
        assert!(sk.public_key().verify(b"pem test", &sig));
    }

    #[test]
    fn public_key_bytes_round_trip() {
        let sk = PrivateKey::generate();
        let pk = sk.public_key();
        let bytes = pk.to_bytes();
        let pk2 = PublicKey::from_bytes(&bytes).unwrap();
        assert!(pk2 == pk);
    }

    #[test]
    fn signature_is_fixed_width_r_concat_s() {
        let sk = PrivateKey::generate();
        let sig = sk.sign(b"width check");
        assert_eq!(sig.len(), 64);
    }
}
