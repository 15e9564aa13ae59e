//! PIN and passphrase buffers.
//!
//! A PIN is hashed as soon as it is typed; only the SHA-256 of it is ever
//! held, and it keys the share envelopes. The passphrase is kept in a fixed
//! buffer until the BIP-39 seed has been derived.

use std::fmt;

use crate::core::secret::SecretBytes;
use crate::crypto::sha256;
use crate::error::FlowError;

pub const MIN_PIN_LEN: usize = 4;
pub const MAX_PIN_LEN: usize = 8;
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// SHA-256 of a PIN.
pub type PinHash = SecretBytes<32>;

/// Validates and hashes a typed PIN.
pub fn hash_pin(text: &str) -> Result<PinHash, FlowError> {
    let len = text.chars().count();
    if !(MIN_PIN_LEN..=MAX_PIN_LEN).contains(&len) || !text.chars().all(|c| c.is_ascii_graphic()) {
        return Err(FlowError::InputInvalid("PIN must be 4 to 8 printable characters"));
    }
    let mut digest = sha256(text.as_bytes());
    Ok(PinHash::take(&mut digest))
}

/// Passphrase in a wipe-on-drop fixed buffer.
#[derive(Default)]
pub struct Passphrase {
    buf: SecretBytes<MAX_PASSPHRASE_LEN>,
    len: usize,
}

impl Passphrase {
    pub fn set(&mut self, text: &str) -> Result<(), FlowError> {
        if text.len() > MAX_PASSPHRASE_LEN {
            return Err(FlowError::InputInvalid("passphrase too long"));
        }
        self.wipe();
        self.buf.as_mut_bytes()[..text.len()].copy_from_slice(text.as_bytes());
        self.len = text.len();
        Ok(())
    }

    /// The passphrase, empty when none was entered.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.buf.as_bytes()[..self.len]).unwrap_or("")
    }

    pub fn wipe(&mut self) {
        self.buf.wipe();
        self.len = 0;
    }

    pub fn is_wiped(&self) -> bool {
        self.len == 0 && self.buf.is_wiped()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***SENSITIVE***)")
    }
}
