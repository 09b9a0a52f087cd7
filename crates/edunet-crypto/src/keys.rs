//! secp256k1 key management and compact ECDSA signatures.
//!
//! The libsecp256k1 context is expensive to build, so a single process-wide
//! context is constructed lazily on first use. Consensus code never touches
//! it directly; everything goes through the free functions here.

use crate::hash::{sha256, Hash256};
use crate::{CryptoError, CryptoResult};
use once_cell::sync::Lazy;
use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{All, Message, Secp256k1};
use std::fmt;

/// Private key length in bytes.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Compressed public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 33;

/// Compact signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// A 32-byte secp256k1 private key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; PRIVATE_KEY_LEN]);

impl PrivateKey {
    /// Wrap raw key bytes, verifying they form a valid scalar.
    pub fn from_bytes(bytes: [u8; PRIVATE_KEY_LEN]) -> CryptoResult<Self> {
        secp256k1::SecretKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Parse from a slice.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; PRIVATE_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    got: bytes.len(),
                    expected: PRIVATE_KEY_LEN,
                })?;
        Self::from_bytes(arr)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.0
    }

    fn to_secret(&self) -> secp256k1::SecretKey {
        // Validated at construction.
        secp256k1::SecretKey::from_slice(&self.0).expect("private key validated at construction")
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material.
        write!(f, "PrivateKey(..)")
    }
}

/// A 33-byte compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    /// Wrap raw compressed key bytes, verifying they form a curve point.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LEN]) -> CryptoResult<Self> {
        secp256k1::PublicKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Parse from a slice.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    got: bytes.len(),
                    expected: PUBLIC_KEY_LEN,
                })?;
        Self::from_bytes(arr)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// SHA-256 of the compressed key, used as a validator identity.
    pub fn id(&self) -> Hash256 {
        sha256(&self.0)
    }

    fn to_inner(&self) -> secp256k1::PublicKey {
        secp256k1::PublicKey::from_slice(&self.0).expect("public key validated at construction")
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

/// A 64-byte compact ECDSA signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Wrap raw compact signature bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; SIGNATURE_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidLength {
                    got: bytes.len(),
                    expected: SIGNATURE_LEN,
                })?;
        Ok(Self(arr))
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// Generate a fresh private key from the OS RNG.
pub fn generate_private_key() -> PrivateKey {
    let secret = secp256k1::SecretKey::new(&mut rand::thread_rng());
    PrivateKey(secret.secret_bytes())
}

/// Derive the compressed public key for a private key.
pub fn derive_public_key(private_key: &PrivateKey) -> PublicKey {
    let public = secp256k1::PublicKey::from_secret_key(&SECP, &private_key.to_secret());
    PublicKey(public.serialize())
}

/// Check whether bytes form a valid private key.
pub fn is_valid_private_key(bytes: &[u8]) -> bool {
    bytes.len() == PRIVATE_KEY_LEN && secp256k1::SecretKey::from_slice(bytes).is_ok()
}

/// Check whether bytes form a valid compressed public key.
pub fn is_valid_public_key(bytes: &[u8]) -> bool {
    bytes.len() == PUBLIC_KEY_LEN && secp256k1::PublicKey::from_slice(bytes).is_ok()
}

/// Sign a 32-byte message hash, producing a compact signature.
pub fn ecdsa_sign(msg_hash: &Hash256, private_key: &PrivateKey) -> Signature {
    let message = Message::from_digest_slice(msg_hash.as_ref())
        .expect("hash is exactly 32 bytes");
    let sig = SECP.sign_ecdsa(&message, &private_key.to_secret());
    Signature(sig.serialize_compact())
}

/// Verify a compact signature over a 32-byte message hash.
pub fn ecdsa_verify(msg_hash: &Hash256, signature: &Signature, public_key: &PublicKey) -> bool {
    let message = match Message::from_digest_slice(msg_hash.as_ref()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    let sig = match EcdsaSignature::from_compact(&signature.0) {
        Ok(s) => s,
        Err(_) => return false,
    };
    SECP.verify_ecdsa(&message, &sig, &public_key.to_inner())
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_derive() {
        let sk = generate_private_key();
        let pk = derive_public_key(&sk);
        assert!(is_valid_private_key(sk.as_bytes()));
        assert!(is_valid_public_key(pk.as_bytes()));
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let sk = generate_private_key();
        let pk = derive_public_key(&sk);
        let msg = sha256(b"block header");

        let sig = ecdsa_sign(&msg, &sk);
        assert!(ecdsa_verify(&msg, &sig, &pk));
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let sk = generate_private_key();
        let pk = derive_public_key(&sk);
        let sig = ecdsa_sign(&sha256(b"one"), &sk);
        assert!(!ecdsa_verify(&sha256(b"two"), &sig, &pk));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let sk = generate_private_key();
        let other = derive_public_key(&generate_private_key());
        let msg = sha256(b"msg");
        let sig = ecdsa_sign(&msg, &sk);
        assert!(!ecdsa_verify(&msg, &sig, &other));
    }

    #[test]
    fn test_zero_private_key_invalid() {
        assert!(!is_valid_private_key(&[0u8; 32]));
    }

    #[test]
    fn test_validator_id_is_stable() {
        let sk = generate_private_key();
        let pk = derive_public_key(&sk);
        assert_eq!(pk.id(), pk.id());
    }
}
