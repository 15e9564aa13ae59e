//! Share envelopes.
//!
//! A share leaving the device is sealed under a key derived from the wallet's
//! PIN (or the empty password when the wallet has none) and bound to its
//! wallet id and x-coordinate.
//!
//! # Scheme
//! 1. **KDF**: Scrypt(SHA-256(PIN) or "", salt = wallet id) -> master key
//! 2. **Derivation**: enc / mac subkeys via BLAKE3 `derive_key`
//! 3. **Encryption**: y XOR BLAKE3_XOF(keyed(enc), nonce || x), for a share of any length
//! 4. **MAC**: BLAKE3_Keyed(mac, wallet_id || x || nonce || ciphertext), truncated to 16 bytes
//! 5. **Envelope**: `[nonce (16)] [mac (16)]`, stored on the card and on the device

use zeroize::{Zeroize, Zeroizing};

use super::constant_time_eq;
use crate::config::KdfParams;
use crate::core::secret::SecretVec;
use crate::entropy::EntropySource;

pub const NONCE_LEN: usize = 16;
pub const MAC_LEN: usize = 16;
pub const ENVELOPE_LEN: usize = NONCE_LEN + MAC_LEN;

const ENC_CONTEXT: &str = "shardvault 2024 share envelope enc";
const MAC_CONTEXT: &str = "shardvault 2024 share envelope mac";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid key derivation parameters")]
    InvalidParams,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("random number generator failure")]
    RngFailure,
    #[error("envelope integrity check failed")]
    IntegrityFailure,
}

/// Nonce and truncated MAC for one sealed share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub mac: [u8; MAC_LEN],
}

impl Envelope {
    pub const EMPTY: Envelope = Envelope {
        nonce: [0u8; NONCE_LEN],
        mac: [0u8; MAC_LEN],
    };

    pub fn to_bytes(&self) -> [u8; ENVELOPE_LEN] {
        let mut out = [0u8; ENVELOPE_LEN];
        out[..NONCE_LEN].copy_from_slice(&self.nonce);
        out[NONCE_LEN..].copy_from_slice(&self.mac);
        out
    }

    pub fn from_bytes(bytes: &[u8; ENVELOPE_LEN]) -> Self {
        let mut env = Envelope::EMPTY;
        env.nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        env.mac.copy_from_slice(&bytes[NONCE_LEN..]);
        env
    }

    pub fn is_empty(&self) -> bool {
        *self == Envelope::EMPTY
    }

    /// Constant-time equality, for comparing a card's envelope with the stored one.
    pub fn ct_eq(&self, other: &Envelope) -> bool {
        constant_time_eq(&self.to_bytes(), &other.to_bytes())
    }
}

/// Encryption and MAC subkeys for one wallet.
pub struct EnvelopeKey {
    enc: Zeroizing<[u8; 32]>,
    mac: Zeroizing<[u8; 32]>,
}

impl EnvelopeKey {
    /// Runs the scrypt KDF. `pin_hash` is SHA-256 of the PIN, `None` for
    /// wallets without a PIN.
    pub fn derive(
        pin_hash: Option<&[u8; 32]>,
        wallet_id: &[u8],
        params: &KdfParams,
    ) -> Result<Self, EnvelopeError> {
        let params = scrypt::Params::new(params.log_n, params.r, params.p, 32)
            .map_err(|_| EnvelopeError::InvalidParams)?;
        let password: &[u8] = match pin_hash {
            Some(hash) => hash,
            None => &[],
        };

        let mut mk = Zeroizing::new([0u8; 32]);
        scrypt::scrypt(password, wallet_id, &params, &mut *mk)
            .map_err(|_| EnvelopeError::KeyDerivation)?;

        Ok(Self {
            enc: derive_subkey(&mk, ENC_CONTEXT),
            mac: derive_subkey(&mk, MAC_CONTEXT),
        })
    }

    /// Seals share value `y` at coordinate `x`. Returns the ciphertext and its envelope.
    pub fn seal<R: EntropySource + ?Sized>(
        &self,
        wallet_id: &[u8],
        x: u8,
        y: &[u8],
        rng: &mut R,
    ) -> Result<(SecretVec, Envelope), EnvelopeError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce).map_err(|_| EnvelopeError::RngFailure)?;

        let mut ciphertext = SecretVec::zeroed(y.len());
        self.apply_keystream(&nonce, x, y, ciphertext.as_mut_bytes());
        let mac = self.compute_mac(wallet_id, x, &nonce, ciphertext.as_bytes());

        Ok((ciphertext, Envelope { nonce, mac }))
    }

    /// Checks the MAC and decrypts.
    pub fn open(
        &self,
        wallet_id: &[u8],
        x: u8,
        ciphertext: &[u8],
        envelope: &Envelope,
    ) -> Result<SecretVec, EnvelopeError> {
        let expected = self.compute_mac(wallet_id, x, &envelope.nonce, ciphertext);
        if !constant_time_eq(&expected, &envelope.mac) {
            return Err(EnvelopeError::IntegrityFailure);
        }
        let mut plain = SecretVec::zeroed(ciphertext.len());
        self.apply_keystream(&envelope.nonce, x, ciphertext, plain.as_mut_bytes());
        Ok(plain)
    }

    fn apply_keystream(&self, nonce: &[u8; NONCE_LEN], x: u8, input: &[u8], output: &mut [u8]) {
        let mut reader = blake3::Hasher::new_keyed(&self.enc)
            .update(nonce)
            .update(&[x])
            .finalize_xof();
        let mut stream = Zeroizing::new(vec![0u8; input.len()]);
        reader.fill(&mut stream);
        for ((out, inp), ks) in output.iter_mut().zip(input).zip(stream.iter()) {
            *out = inp ^ ks;
        }
    }

    fn compute_mac(&self, wallet_id: &[u8], x: u8, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> [u8; MAC_LEN] {
        let full: [u8; 32] = blake3::Hasher::new_keyed(&self.mac)
            .update(wallet_id)
            .update(&[x])
            .update(nonce)
            .update(ciphertext)
            .finalize()
            .into();
        let mut mac = [0u8; MAC_LEN];
        mac.copy_from_slice(&full[..MAC_LEN]);
        mac
    }
}

fn derive_subkey(mk: &[u8; 32], context: &str) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(mk);
    let mut out: [u8; 32] = hasher.finalize().into();
    let key = Zeroizing::new(out);
    out.zeroize();
    key
}
