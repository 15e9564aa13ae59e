//! Wipe-on-drop buffers for secret material.
//!
//! Every buffer that ever holds the wallet secret, a share value or a sealed
//! share is a [`SecretBytes`]. The bytes are zeroized when the buffer is
//! dropped or explicitly wiped, and moving bytes in with [`SecretBytes::take`]
//! zeroizes the source, so ownership transfer never leaves a second copy.
//! Share values and sealed shares vary in length with the wallet's content
//! and live in a [`SecretVec`].

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the wallet master entropy and of every share value.
pub const SECRET_LEN: usize = 32;

/// Fixed-size secret buffer, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize>([u8; N]);

/// The wallet master entropy.
pub type Secret = SecretBytes<SECRET_LEN>;

impl<const N: usize> SecretBytes<N> {
    /// An all-zero buffer.
    pub const fn zeroed() -> Self {
        Self([0u8; N])
    }

    /// Moves `source` into a new buffer and zeroizes `source`.
    pub fn take(source: &mut [u8; N]) -> Self {
        let out = Self(*source);
        source.zeroize();
        out
    }

    /// Copies a slice of exactly `N` bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != N {
            return None;
        }
        let mut out = Self::zeroed();
        out.0.copy_from_slice(bytes);
        Some(out)
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; N] {
        &mut self.0
    }

    /// Zeroizes the contents in place.
    pub fn wipe(&mut self) {
        self.0.zeroize();
    }

    /// True when every byte is zero.
    pub fn is_wiped(&self) -> bool {
        self.0.iter().fold(0u8, |acc, b| acc | b) == 0
    }
}

impl<const N: usize> Default for SecretBytes<N> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBytes")
            .field("length", &N)
            .field("value", &"***SENSITIVE***")
            .finish()
    }
}

/// Heap secret buffer of any length, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretVec(Zeroizing<Vec<u8>>);

impl SecretVec {
    pub fn zeroed(len: usize) -> Self {
        Self(Zeroizing::new(vec![0u8; len]))
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.0
    }

    /// Zeroizes the contents in place; the length is kept.
    pub fn wipe(&mut self) {
        self.0.as_mut_slice().zeroize();
    }

    pub fn is_wiped(&self) -> bool {
        self.0.iter().fold(0u8, |acc, b| acc | b) == 0
    }
}

impl fmt::Debug for SecretVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretVec")
            .field("length", &self.len())
            .field("value", &"***SENSITIVE***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_zeroizes_source() {
        let mut source = [0xA5u8; 32];
        let secret = Secret::take(&mut source);
        assert_eq!(source, [0u8; 32]);
        assert_eq!(secret.as_bytes(), &[0xA5u8; 32]);
    }

    #[test]
    fn wipe_clears_contents() {
        let mut secret = Secret::from_slice(&[7u8; 32]).unwrap();
        assert!(!secret.is_wiped());
        secret.wipe();
        assert!(secret.is_wiped());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Secret::from_slice(&[1u8; 31]).is_none());
        assert!(Secret::from_slice(&[1u8; 33]).is_none());
    }

    #[test]
    fn secret_vec_wipes_in_place() {
        let mut buf = SecretVec::from_slice(b"seed words");
        assert_eq!(buf.len(), 10);
        assert!(!buf.is_wiped());
        buf.wipe();
        assert!(buf.is_wiped());
        assert_eq!(buf.len(), 10);
        assert!(!format!("{:?}", SecretVec::from_slice(b"hunter2")).contains("hunter2"));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = Secret::from_slice(&[0xFFu8; 32]).unwrap();
        let s = format!("{:?}", secret);
        assert!(s.contains("***SENSITIVE***"));
        assert!(!s.contains("255"));
    }
}
