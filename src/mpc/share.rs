//! Secret share definition.
//!
//! A share is a point (x, y) on the per-byte polynomials hiding the secret.
//! `x` is the card slot (1..=5) and public; `y` holds one evaluation per
//! secret byte (32 for a wallet secret, the payload length for a data
//! wallet) and is wiped on drop.

use std::fmt;

use super::ShareError;
use crate::core::secret::SecretVec;

/// One share of the wallet secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    /// The x-coordinate (1..=255).
    pub x: u8,
    /// The y-coordinates (one per byte of the secret).
    pub y: SecretVec,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("x", &self.x)
            .field("y", &"***SENSITIVE***")
            .finish()
    }
}

impl Share {
    /// Creates a share, rejecting x = 0 (that point is the secret itself).
    pub fn new(x: u8, y: SecretVec) -> Result<Self, ShareError> {
        if x == 0 {
            return Err(ShareError::InvalidShareIndex);
        }
        Ok(Self { x, y })
    }

    pub fn wipe(&mut self) {
        self.y.wipe();
    }

    pub fn is_wiped(&self) -> bool {
        self.y.is_wiped()
    }
}
