//! Entropy sources.
//!
//! Everything random in the core (polynomial coefficients, envelope nonces,
//! ephemeral session keys, identity keys) is drawn through [`EntropySource`],
//! so flows can run against the OS generator on a host build, the hardware
//! TRNG on the device, or a scripted source in tests.

pub mod os;

pub use os::OsEntropy;

/// Error types for entropy collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EntropyError {
    /// Failed to collect sufficient entropy bytes.
    #[error("entropy collection failed")]
    CollectionFailed,
    /// Source is exhausted (e.g., fixed buffer).
    #[error("entropy source exhausted")]
    Exhausted,
}

/// A trait for entropy sources.
pub trait EntropySource {
    /// Returns a unique identifier for the source.
    fn name(&self) -> &'static str;

    /// Fills `dest` with random bytes from the source.
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), EntropyError>;
}

impl<T: EntropySource + ?Sized> EntropySource for &mut T {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn fill(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        (**self).fill(dest)
    }
}
