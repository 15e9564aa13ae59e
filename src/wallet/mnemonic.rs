//! BIP-39 mnemonic handling.
//!
//! The wallet secret is the mnemonic entropy zero-padded to 32 bytes; the
//! record's `number_of_mnemonics` says how much of it is real.

use bip39::{Language, Mnemonic, Seed};
use zeroize::Zeroizing;

use crate::core::secret::{Secret, SecretBytes};
use crate::error::FlowError;

pub const SEED_LEN: usize = 64;

/// Entropy bytes behind a supported word count.
pub fn entropy_len(words: u8) -> Option<usize> {
    match words {
        12 => Some(16),
        18 => Some(24),
        24 => Some(32),
        _ => None,
    }
}

/// Parses a typed word count.
pub fn parse_word_count(text: &str) -> Result<u8, FlowError> {
    text.trim()
        .parse::<u8>()
        .ok()
        .filter(|w| entropy_len(*w).is_some())
        .ok_or(FlowError::InputInvalid("word count must be 12, 18 or 24"))
}

/// Decodes a phrase of exactly `words` words into a padded secret.
pub fn secret_from_phrase(phrase: &str, words: u8) -> Result<Secret, FlowError> {
    let normalized = Zeroizing::new(phrase.split_whitespace().collect::<Vec<_>>().join(" "));
    if normalized.split(' ').count() != words as usize {
        return Err(FlowError::InputInvalid("unexpected number of words"));
    }
    let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
        .map_err(|_| FlowError::InputInvalid("invalid mnemonic"))?;
    let mut secret = Secret::zeroed();
    let entropy = mnemonic.entropy();
    secret.as_mut_bytes()[..entropy.len()].copy_from_slice(entropy);
    Ok(secret)
}

fn mnemonic_for(secret: &Secret, words: u8) -> Result<Mnemonic, FlowError> {
    let len = entropy_len(words).ok_or(FlowError::InputInvalid("unsupported word count"))?;
    Mnemonic::from_entropy(&secret.as_bytes()[..len], Language::English)
        .map_err(|_| FlowError::InputInvalid("invalid entropy"))
}

/// The mnemonic phrase for a secret.
pub fn phrase_for(secret: &Secret, words: u8) -> Result<Zeroizing<String>, FlowError> {
    Ok(Zeroizing::new(mnemonic_for(secret, words)?.phrase().to_owned()))
}

/// BIP-39 seed for the wallet and passphrase.
pub fn derive_seed(secret: &Secret, words: u8, passphrase: &str) -> Result<SecretBytes<SEED_LEN>, FlowError> {
    let mnemonic = mnemonic_for(secret, words)?;
    let seed = Seed::new(&mnemonic, passphrase);
    SecretBytes::from_slice(seed.as_bytes()).ok_or(FlowError::InputInvalid("seed length"))
}
