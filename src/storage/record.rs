//! Wallet record layout.
//!
//! Records are fixed 197-byte blobs:
//!
//! ```text
//! version(1) | wallet_id(16) | name(16, NUL padded) | flags(1)
//!   | number_of_mnemonics(1) | cards_written(1) | state(1) | 5 x envelope(32)
//! ```
//!
//! A set bit in `cards_written` always comes with that card's envelope; both
//! are updated together before the record is flushed.
//!
//! Each card's slot keeps only the 32-byte envelope (nonce and MAC) of the
//! per-card blob. The sealed share itself, 32 bytes for a key wallet and the
//! payload length for a data wallet, is written to its card and never
//! persisted on the device, so the device store alone cannot rebuild a
//! wallet. Read-back compares the card's envelope with the stored one before
//! opening the share.

use std::fmt;

use bitflags::bitflags;

use super::StorageError;
use crate::card::{CardNumber, CardSet, MAX_CARDS};
use crate::crypto::envelope::{Envelope, ENVELOPE_LEN};

pub const RECORD_VERSION: u8 = 1;
pub const WALLET_ID_LEN: usize = 16;
/// Name field width; names hold at most `NAME_FIELD_LEN - 1` bytes.
pub const NAME_FIELD_LEN: usize = 16;
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;
pub const RECORD_LEN: usize = 1 + WALLET_ID_LEN + NAME_FIELD_LEN + 4 + MAX_CARDS * ENVELOPE_LEN;

pub type WalletName = heapless::String<MAX_NAME_LEN>;

/// Public wallet identifier, derived from the secret by double SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WalletId(pub [u8; WALLET_ID_LEN]);

impl WalletId {
    pub fn as_bytes(&self) -> &[u8; WALLET_ID_LEN] {
        &self.0
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({})", hex::encode(self.0))
    }
}

bitflags! {
    /// Credential and content options chosen at creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WalletFlags: u8 {
        const HAS_PIN = 0x01;
        const HAS_PASSPHRASE = 0x02;
        /// The cards carry a user payload instead of a wallet secret.
        const HAS_ARBITRARY_DATA = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalletState {
    /// Cards are being written or have not passed verification yet.
    Unverified = 1,
    /// Every card was read back and every 3-subset reconstructed the wallet.
    Valid = 2,
    /// Verification failed.
    Invalid = 3,
}

impl TryFrom<u8> for WalletState {
    type Error = StorageError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Unverified),
            2 => Ok(Self::Valid),
            3 => Ok(Self::Invalid),
            _ => Err(StorageError::Corruption),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: WalletId,
    pub name: WalletName,
    pub flags: WalletFlags,
    pub number_of_mnemonics: u8,
    pub cards_written: CardSet,
    pub state: WalletState,
    pub envelopes: [Envelope; MAX_CARDS],
}

impl WalletRecord {
    pub fn new(id: WalletId, name: WalletName, flags: WalletFlags, number_of_mnemonics: u8) -> Self {
        Self {
            id,
            name,
            flags,
            number_of_mnemonics,
            cards_written: CardSet::EMPTY,
            state: WalletState::Unverified,
            envelopes: [Envelope::EMPTY; MAX_CARDS],
        }
    }

    /// Records a durable card write: the bit and the envelope move together.
    pub fn mark_written(&mut self, card: CardNumber, envelope: Envelope) {
        self.envelopes[card.index()] = envelope;
        self.cards_written.insert(card);
    }

    pub fn envelope(&self, card: CardNumber) -> &Envelope {
        &self.envelopes[card.index()]
    }

    pub fn has_pin(&self) -> bool {
        self.flags.contains(WalletFlags::HAS_PIN)
    }

    pub fn has_passphrase(&self) -> bool {
        self.flags.contains(WalletFlags::HAS_PASSPHRASE)
    }

    pub fn has_arbitrary_data(&self) -> bool {
        self.flags.contains(WalletFlags::HAS_ARBITRARY_DATA)
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0] = RECORD_VERSION;
        let mut pos = 1;
        out[pos..pos + WALLET_ID_LEN].copy_from_slice(&self.id.0);
        pos += WALLET_ID_LEN;
        out[pos..pos + self.name.len()].copy_from_slice(self.name.as_bytes());
        pos += NAME_FIELD_LEN;
        out[pos] = self.flags.bits();
        out[pos + 1] = self.number_of_mnemonics;
        out[pos + 2] = self.cards_written.bits();
        out[pos + 3] = self.state as u8;
        pos += 4;
        for env in &self.envelopes {
            out[pos..pos + ENVELOPE_LEN].copy_from_slice(&env.to_bytes());
            pos += ENVELOPE_LEN;
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        if bytes.len() != RECORD_LEN || bytes[0] != RECORD_VERSION {
            return Err(StorageError::Corruption);
        }
        let mut pos = 1;

        let mut id = [0u8; WALLET_ID_LEN];
        id.copy_from_slice(&bytes[pos..pos + WALLET_ID_LEN]);
        pos += WALLET_ID_LEN;

        let field = &bytes[pos..pos + NAME_FIELD_LEN];
        let name_len = field.iter().position(|&b| b == 0).ok_or(StorageError::Corruption)?;
        if field[name_len..].iter().any(|&b| b != 0) {
            return Err(StorageError::Corruption);
        }
        let name = std::str::from_utf8(&field[..name_len]).map_err(|_| StorageError::Corruption)?;
        let name = parse_name(name).map_err(|_| StorageError::Corruption)?;
        pos += NAME_FIELD_LEN;

        let flags = WalletFlags::from_bits(bytes[pos]).ok_or(StorageError::Corruption)?;
        let number_of_mnemonics = bytes[pos + 1];
        let cards_written = CardSet::from_bits(bytes[pos + 2]).ok_or(StorageError::Corruption)?;
        let state = WalletState::try_from(bytes[pos + 3])?;
        pos += 4;

        let mut envelopes = [Envelope::EMPTY; MAX_CARDS];
        for env in envelopes.iter_mut() {
            let mut raw = [0u8; ENVELOPE_LEN];
            raw.copy_from_slice(&bytes[pos..pos + ENVELOPE_LEN]);
            *env = Envelope::from_bytes(&raw);
            pos += ENVELOPE_LEN;
        }

        Ok(Self {
            id: WalletId(id),
            name,
            flags,
            number_of_mnemonics,
            cards_written,
            state,
            envelopes,
        })
    }
}

/// Validates a user-entered wallet name: 1..=15 bytes, printable, no NUL.
pub fn parse_name(raw: &str) -> Result<WalletName, StorageError> {
    if raw.is_empty() || raw.chars().any(|c| c.is_control()) {
        return Err(StorageError::InvalidName);
    }
    WalletName::try_from(raw).map_err(|_| StorageError::InvalidName)
}
