//! Device configuration.
//!
//! Defines the tunables the firmware core reads at runtime. The embedding
//! application populates a [`DeviceConfig`] (or uses the defaults) and hands it
//! to the wallet controller, the card transport and the session manager.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Main configuration structure for the firmware core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceConfig {
    /// Number of cards (and shares) per wallet.
    pub share_count: u8,

    /// Shares required to reconstruct the wallet secret.
    pub threshold: u8,

    /// Attempts allowed per card step for communication glitches.
    pub card_retries: u8,

    /// Wrong-card presentations tolerated per card step.
    ///
    /// Kept separate from `card_retries` so a user fumbling cards never
    /// burns the budget reserved for link errors.
    pub wrong_card_limit: u8,

    /// Maximum inactivity on a card or host wait before the flow is
    /// abandoned as unresponsive.
    pub transport_timeout: Duration,

    /// Timeouts for user-input waits, per step kind.
    pub timeouts: InputTimeouts,

    /// Cost parameters for the PIN-derived envelope key.
    pub pin_kdf: KdfParams,

    /// Messages a session may carry before a fresh handshake is required.
    pub session_max_age: u32,

    /// Wallet slots available in storage.
    pub max_wallets: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            share_count: 5,
            threshold: 3,
            card_retries: 5,
            wrong_card_limit: 10,
            transport_timeout: Duration::from_secs(30),
            timeouts: InputTimeouts::default(),
            pin_kdf: KdfParams::default(),
            session_max_age: 1024,
            max_wallets: 4,
        }
    }
}

/// Step-specific user-input timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputTimeouts {
    /// Free text entry (wallet name, PIN, passphrase, mnemonic).
    pub text_input: Duration,
    /// Yes/no confirmations.
    pub confirm: Duration,
    /// Informational message screens.
    pub message: Duration,
}

impl Default for InputTimeouts {
    fn default() -> Self {
        Self {
            text_input: Duration::from_secs(120),
            confirm: Duration::from_secs(60),
            message: Duration::from_secs(15),
        }
    }
}

/// Scrypt parameters for the envelope key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KdfParams {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // N=32768 (2^15), r=8, p=1
        Self { log_n: 15, r: 8, p: 1 }
    }
}

impl DeviceConfig {
    /// Configuration with a cheap KDF and short timeouts, for tests and simulators.
    pub fn fast() -> Self {
        Self {
            pin_kdf: KdfParams { log_n: 4, r: 8, p: 1 },
            transport_timeout: Duration::from_millis(50),
            ..Self::default()
        }
    }
}
