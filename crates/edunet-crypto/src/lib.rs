//! # edunet-crypto
//!
//! Cryptographic primitives consumed by the EduNet consensus core.
//!
//! This crate provides:
//! - SHA-256, double SHA-256 and RIPEMD-160 digests with fixed-size hash newtypes
//! - secp256k1 key generation and compact ECDSA signatures
//! - A deterministic PRNG for validator selection
//! - Secure randomness for key material
//!
//! The signing context is process-wide but encapsulated here: it is built
//! lazily on first use and never exposed to consensus code.

mod error;
pub mod hash;
pub mod keys;
pub mod rng;

pub use error::{CryptoError, CryptoResult};
pub use hash::{double_sha256, hash160, ripemd160, sha256, Hash160, Hash256};
pub use keys::{
    derive_public_key, ecdsa_sign, ecdsa_verify, generate_private_key, is_valid_private_key,
    is_valid_public_key, PrivateKey, PublicKey, Signature, PRIVATE_KEY_LEN, PUBLIC_KEY_LEN,
    SIGNATURE_LEN,
};
pub use rng::{secure_bytes, DeterministicRng};
