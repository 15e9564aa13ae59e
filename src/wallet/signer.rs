//! Digest signing for chain adapters.
//!
//! Chain-specific code hashes its transaction and hands the 32-byte digest
//! to the wallet; the wallet signs it with an Ed25519 key derived from the
//! BIP-39 seed as `SHA-256(seed)`.

use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroize;

use super::mnemonic::SEED_LEN;
use crate::core::secret::SecretBytes;
use crate::crypto::{sha256, PUBLIC_KEY_LEN, SIGNATURE_LEN};

pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignedDigest {
    pub public_key: [u8; PUBLIC_KEY_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

pub fn signing_key_from_seed(seed: &SecretBytes<SEED_LEN>) -> SigningKey {
    let mut sk = sha256(seed.as_bytes());
    let key = SigningKey::from_bytes(&sk);
    sk.zeroize();
    key
}

pub fn sign_digest(seed: &SecretBytes<SEED_LEN>, digest: &[u8; DIGEST_LEN]) -> SignedDigest {
    let key = signing_key_from_seed(seed);
    SignedDigest {
        public_key: key.verifying_key().to_bytes(),
        signature: key.sign(digest).to_bytes(),
    }
}
