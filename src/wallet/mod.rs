//! Wallet lifecycle.
//!
//! The [`controller::WalletController`] runs the new-wallet, restore,
//! data-wallet, verify, reveal and sign-digest flows. Each flow is an explicit step enum in
//! [`flow`]; secret buffers live in a [`vault::ShareVault`] that is wiped on
//! every exit.

pub mod controller;
pub mod credentials;
pub mod flow;
pub mod mnemonic;
pub mod signer;
pub mod vault;

pub use controller::{WalletController, WalletSummary};
pub use flow::{
    DataWalletStep, FlowState, NewWalletStep, RestoreStep, RevealStep, SetupStep, SignStep, VerifyStep,
};
pub use signer::SignedDigest;
pub use vault::ShareVault;

use zeroize::Zeroizing;

use crate::core::secret::Secret;
use crate::crypto::sha256;
use crate::storage::record::WALLET_ID_LEN;
use crate::storage::WalletId;

/// First 16 bytes of `SHA-256(SHA-256(secret))`.
pub fn wallet_id_for(secret: &Secret) -> WalletId {
    wallet_id_of(secret.as_bytes())
}

/// Same derivation over a data wallet's payload.
pub fn wallet_id_of(bytes: &[u8]) -> WalletId {
    let inner = Zeroizing::new(sha256(bytes));
    let outer = sha256(&*inner);
    let mut id = [0u8; WALLET_ID_LEN];
    id.copy_from_slice(&outer[..WALLET_ID_LEN]);
    WalletId(id)
}

/// Index sets of size `k` drawn from `0..n`.
pub(crate) fn subsets(n: usize, k: usize) -> impl Iterator<Item = Vec<usize>> {
    (0u32..(1 << n))
        .filter(move |mask| mask.count_ones() as usize == k)
        .map(move |mask| (0..n).filter(|i| mask & (1 << i) != 0).collect())
}
