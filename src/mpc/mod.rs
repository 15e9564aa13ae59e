//! Threshold secret sharing.
//!
//! Shamir's Secret Sharing over GF(256): the 32-byte wallet secret, or the
//! payload of a data wallet, is split into one share per card (x = 1..=n),
//! any `threshold` of which reconstruct it.
//!
//! # Components
//! - `share`: a single (x, y) point.
//! - `split`: polynomial generation and evaluation.
//! - `reconstruct`: Lagrange interpolation at x = 0.
//!
//! # Security
//! - **Constant-Time**: All GF(256) operations are constant-time.
//! - **Zeroization**: Shares, coefficients and secrets are zeroized on drop.

pub mod share;
pub mod split;
pub mod reconstruct;
pub(crate) mod polynomial;

pub use share::Share;

use crate::core::secret::{Secret, SecretVec};
use crate::entropy::EntropySource;

/// Largest arbitrary-data payload a card set carries.
pub const MAX_PAYLOAD_LEN: usize = 512;

/// Errors for sharing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShareError {
    /// Secret is not exactly 32 bytes.
    #[error("secret must be {expected} bytes, got {actual}")]
    InvalidSecretLength { expected: usize, actual: usize },
    /// Share index 0 (the secret itself) or out of range.
    #[error("invalid share index")]
    InvalidShareIndex,
    /// Threshold configuration error (k > n, k < 2).
    #[error("invalid threshold configuration")]
    InvalidThreshold,
    /// Fewer than `threshold` distinct shares.
    #[error("insufficient shares: need {needed}, have {have}")]
    InsufficientShares { needed: u8, have: usize },
    /// Two shares with the same index but different values.
    #[error("conflicting shares for one index")]
    DuplicateShareIndex,
    /// Shares of different lengths cannot come from one split.
    #[error("share lengths differ")]
    LengthMismatch,
    /// Random number generator failure.
    #[error("random number generator failure")]
    RngFailure,
}

/// Seam for the sharing scheme used by the wallet controller.
pub trait SecretSharingScheme {
    /// Splits `secret` into the scheme's share count.
    fn split<R: EntropySource + ?Sized>(
        &self,
        secret: &[u8],
        rng: &mut R,
    ) -> Result<Vec<Share>, ShareError>;

    /// Splits an arbitrary-data payload of 1..=`MAX_PAYLOAD_LEN` bytes.
    fn split_payload<R: EntropySource + ?Sized>(
        &self,
        data: &[u8],
        rng: &mut R,
    ) -> Result<Vec<Share>, ShareError>;

    /// Reconstructs the secret from at least `threshold` shares.
    fn reconstruct(&self, shares: &[Share]) -> Result<Secret, ShareError>;

    fn reconstruct_payload(&self, shares: &[Share]) -> Result<SecretVec, ShareError>;

    fn threshold(&self) -> u8;
    fn share_count(&self) -> u8;
}

/// Shamir's Secret Sharing over GF(256) with fixed x-coordinates 1..=n.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shamir {
    shares: u8,
    threshold: u8,
}

impl Shamir {
    pub fn new(shares: u8, threshold: u8) -> Result<Self, ShareError> {
        split::validate_threshold(threshold, shares)?;
        Ok(Self { shares, threshold })
    }
}

impl Default for Shamir {
    /// The device's 3-of-5 card scheme.
    fn default() -> Self {
        Self { shares: 5, threshold: 3 }
    }
}

impl SecretSharingScheme for Shamir {
    fn split<R: EntropySource + ?Sized>(
        &self,
        secret: &[u8],
        rng: &mut R,
    ) -> Result<Vec<Share>, ShareError> {
        split::split_secret(secret, self.shares, self.threshold, rng)
    }

    fn split_payload<R: EntropySource + ?Sized>(
        &self,
        data: &[u8],
        rng: &mut R,
    ) -> Result<Vec<Share>, ShareError> {
        split::split_payload(data, self.shares, self.threshold, rng)
    }

    fn reconstruct(&self, shares: &[Share]) -> Result<Secret, ShareError> {
        reconstruct::reconstruct_secret(shares, self.threshold)
    }

    fn reconstruct_payload(&self, shares: &[Share]) -> Result<SecretVec, ShareError> {
        reconstruct::reconstruct_payload(shares, self.threshold)
    }

    fn threshold(&self) -> u8 {
        self.threshold
    }

    fn share_count(&self) -> u8 {
        self.shares
    }
}
