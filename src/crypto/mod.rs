//! Crypto primitives adapter.
//!
//! Thin, stateless wrappers over the curve, hash and KDF crates so the
//! protocol and wallet layers never touch them directly:
//! - SHA-256 / HKDF-SHA256 (`sha2`, `hkdf`)
//! - Ed25519 identity signatures (`ed25519-dalek`), see [`identity`]
//! - X25519 ephemeral key agreement (`x25519-dalek`)
//! - the share envelope (BLAKE3 + scrypt), see [`envelope`]

pub mod envelope;
pub mod identity;

pub use identity::{append_signature, verify_appended, DeviceIdentity, DeviceSerial, SIGNATURE_LEN};

use ed25519_dalek::{Signature, VerifyingKey};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::entropy::EntropySource;

/// Size of Ed25519 and X25519 public keys.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Errors raised by the primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key")]
    InvalidKey,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("key agreement produced a non-contributory secret")]
    WeakSharedSecret,
    #[error("random number generator failure")]
    RngFailure,
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// HKDF-SHA256 extract-and-expand into `out`.
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[&[u8]], out: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand_multi_info(info, out)
        .map_err(|_| CryptoError::KeyDerivation)
}

/// Strict Ed25519 verification of `signature` over `msg`.
pub fn verify_signature(
    public_key: &[u8; PUBLIC_KEY_LEN],
    msg: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidKey)?;
    let signature = Signature::from_bytes(signature);
    key.verify_strict(msg, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

// Simple constant-time comparison for MACs and envelopes
#[inline(never)]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// One-shot X25519 key pair for a single handshake.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate<R: EntropySource + ?Sized>(rng: &mut R) -> Result<Self, CryptoError> {
        let mut bytes = Zeroizing::new([0u8; 32]);
        rng.fill(&mut *bytes).map_err(|_| CryptoError::RngFailure)?;
        let secret = StaticSecret::from(*bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// X25519 with the peer's public key. Rejects low-order peer points.
    pub fn diffie_hellman(&self, peer: &[u8; PUBLIC_KEY_LEN]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(CryptoError::WeakSharedSecret);
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::OsEntropy;

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hkdf_depends_on_info() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        hkdf_sha256(b"salt", b"ikm", &[b"one"], &mut a).unwrap();
        hkdf_sha256(b"salt", b"ikm", &[b"two"], &mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn ephemeral_agreement_matches() {
        let a = EphemeralKeyPair::generate(&mut OsEntropy).unwrap();
        let b = EphemeralKeyPair::generate(&mut OsEntropy).unwrap();
        let ab = a.diffie_hellman(&b.public_bytes()).unwrap();
        let ba = b.diffie_hellman(&a.public_bytes()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn low_order_peer_rejected() {
        let a = EphemeralKeyPair::generate(&mut OsEntropy).unwrap();
        assert_eq!(a.diffie_hellman(&[0u8; 32]).err(), Some(CryptoError::WeakSharedSecret));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
