//! Crate-level error taxonomy.
//!
//! Module errors (`ShareError`, `CardError`, `SessionError`, ...) say what
//! went wrong; [`FlowError`] says what the running flow must do about it.
//! Cryptographic and reconstruction failures never retry, transport faults
//! retry within the card step's budget and then escalate, and every variant
//! is reduced to a [`UserMessage`] before anything reaches the screen.

use crate::card::{CardError, FaultClass};
use crate::crypto::envelope::EnvelopeError;
use crate::crypto::CryptoError;
use crate::mpc::ShareError;
use crate::storage::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Malformed or unexpected input; re-prompt or end the flow cleanly.
    #[error("invalid input: {0}")]
    InputInvalid(&'static str),
    /// Signature, MAC or reconstruction check failed. Fail closed.
    #[error("cryptographic verification failed")]
    CryptoVerificationFailed,
    /// Card fault that the step's retry budget may absorb.
    #[error("recoverable card fault: {0}")]
    TransportRecoverable(CardError),
    /// Retries exhausted, applet rejection or unresponsive link.
    #[error("card transport failed: {0}")]
    TransportFatal(CardError),
    /// Not enough shares to reconstruct; permanent for this operation.
    #[error("insufficient shares")]
    ResourceExhausted,
    /// The user backed out of the first step.
    #[error("cancelled by user")]
    Cancelled,
    /// The priority-zero abort signal was raised.
    #[error("aborted")]
    Aborted,
    /// No user input within the step's timeout.
    #[error("user input timed out")]
    InputTimeout,
    #[error("storage error: {0}")]
    Storage(StorageError),
}

/// The only failure categories ever shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMessage {
    SomethingWentWrong,
    IncorrectPin,
    WrongCard,
    CreationFailed,
}

impl FlowError {
    pub fn user_message(&self) -> UserMessage {
        match self {
            FlowError::TransportRecoverable(CardError::WrongCard { .. })
            | FlowError::TransportFatal(CardError::WrongCard { .. }) => UserMessage::WrongCard,
            _ => UserMessage::SomethingWentWrong,
        }
    }

    /// Ends the flow without a failure screen.
    pub fn is_silent(&self) -> bool {
        matches!(self, FlowError::Cancelled | FlowError::Aborted)
    }
}

impl From<CardError> for FlowError {
    fn from(err: CardError) -> Self {
        match err.classify() {
            FaultClass::WrongCard | FaultClass::Recoverable => FlowError::TransportRecoverable(err),
            FaultClass::Fatal => FlowError::TransportFatal(err),
            FaultClass::Abort => FlowError::Aborted,
        }
    }
}

impl From<ShareError> for FlowError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::InsufficientShares { .. } => FlowError::ResourceExhausted,
            ShareError::InvalidSecretLength { .. } => FlowError::InputInvalid("secret length"),
            ShareError::DuplicateShareIndex | ShareError::InvalidShareIndex | ShareError::LengthMismatch => {
                FlowError::CryptoVerificationFailed
            }
            ShareError::InvalidThreshold => FlowError::InputInvalid("threshold"),
            ShareError::RngFailure => FlowError::InputInvalid("entropy unavailable"),
        }
    }
}

impl From<CryptoError> for FlowError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey | CryptoError::SignatureInvalid | CryptoError::WeakSharedSecret => {
                FlowError::CryptoVerificationFailed
            }
            CryptoError::KeyDerivation | CryptoError::RngFailure => FlowError::InputInvalid("crypto backend"),
        }
    }
}

impl From<EnvelopeError> for FlowError {
    fn from(err: EnvelopeError) -> Self {
        match err {
            EnvelopeError::IntegrityFailure => FlowError::CryptoVerificationFailed,
            EnvelopeError::InvalidParams | EnvelopeError::KeyDerivation | EnvelopeError::RngFailure => {
                FlowError::InputInvalid("envelope key")
            }
        }
    }
}

impl From<StorageError> for FlowError {
    fn from(err: StorageError) -> Self {
        FlowError::Storage(err)
    }
}
