//! Secret buffers owned by the wallet controller.
//!
//! Every buffer a flow may fill with the wallet secret, a data payload, a
//! share, a PIN hash, the passphrase or the BIP-39 seed lives here. The controller wipes the
//! whole vault when any flow ends, whatever the outcome, and wiping is in
//! place so a test can inspect the buffers afterwards.

use super::credentials::{Passphrase, PinHash};
use super::mnemonic::SEED_LEN;
use crate::card::transport::ShareBuffers;
use crate::core::secret::{Secret, SecretBytes, SecretVec};
use crate::mpc::Share;

#[derive(Debug, Default)]
pub struct ShareVault {
    /// Master entropy, present between generation (or reconstruction) and
    /// the split (or seed derivation).
    pub(crate) secret: Secret,
    /// Payload of a data wallet, entered at creation or rebuilt for reveal.
    pub(crate) data: SecretVec,
    /// Plaintext shares from the split, before sealing.
    pub(crate) shares: Vec<Share>,
    /// Sealed outgoing shares and shares opened from cards.
    pub(crate) cards: ShareBuffers,
    /// Hash of the confirmed PIN.
    pub(crate) pin: PinHash,
    /// Hash of the first PIN entry, awaiting confirmation.
    pub(crate) pin_entry: PinHash,
    pub(crate) passphrase: Passphrase,
    pub(crate) seed: SecretBytes<SEED_LEN>,
}

impl ShareVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wipe(&mut self) {
        self.secret.wipe();
        self.data.wipe();
        self.shares.iter_mut().for_each(Share::wipe);
        self.cards.wipe();
        self.pin.wipe();
        self.pin_entry.wipe();
        self.passphrase.wipe();
        self.seed.wipe();
    }

    /// Drops wiped entries left by a previous flow.
    pub(crate) fn reset(&mut self) {
        self.wipe();
        self.shares.clear();
        self.cards.clear();
    }

    /// True when every buffer reads as all-zero.
    pub fn is_wiped(&self) -> bool {
        self.secret.is_wiped()
            && self.data.is_wiped()
            && self.shares.iter().all(Share::is_wiped)
            && self.cards.is_wiped()
            && self.pin.is_wiped()
            && self.pin_entry.is_wiped()
            && self.passphrase.is_wiped()
            && self.seed.is_wiped()
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    pub fn share_buffers(&self) -> &ShareBuffers {
        &self.cards
    }

    pub fn data(&self) -> &SecretVec {
        &self.data
    }
}
