//! Long-term device identity.
//!
//! The identity key signs everything the device sends to the host: the serial
//! number and challenge during device authentication, and the device key
//! message during the session handshake. Outgoing payloads are framed by
//! [`append_signature`].

use ed25519_dalek::{Signer, SigningKey};
use zeroize::Zeroizing;

use super::{CryptoError, PUBLIC_KEY_LEN};
use crate::entropy::EntropySource;

pub const SIGNATURE_LEN: usize = 64;
pub const SERIAL_LEN: usize = 32;

/// Framing constants trailing every signed payload.
pub const POSTFIX1: &[u8; 8] = b"postfix1";
pub const POSTFIX2: &[u8; 8] = b"postfix2";

/// Length added to a payload by [`append_signature`].
pub const SIGNATURE_FRAME_LEN: usize = SIGNATURE_LEN + POSTFIX1.len() + POSTFIX2.len();

pub type DeviceSerial = [u8; SERIAL_LEN];

/// Device serial plus its Ed25519 identity key.
pub struct DeviceIdentity {
    serial: DeviceSerial,
    key: SigningKey,
}

impl DeviceIdentity {
    pub fn from_bytes(serial: DeviceSerial, secret: &[u8; 32]) -> Self {
        Self {
            serial,
            key: SigningKey::from_bytes(secret),
        }
    }

    /// Fresh identity from the entropy source. Provisioning only.
    pub fn generate<R: EntropySource + ?Sized>(
        serial: DeviceSerial,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        let mut secret = Zeroizing::new([0u8; 32]);
        rng.fill(&mut *secret).map_err(|_| CryptoError::RngFailure)?;
        Ok(Self::from_bytes(serial, &secret))
    }

    pub fn serial(&self) -> &DeviceSerial {
        &self.serial
    }

    pub fn verifying_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.key.verifying_key().to_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.key.sign(msg).to_bytes()
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("serial", &hex::encode(self.serial))
            .field("key", &"***SENSITIVE***")
            .finish()
    }
}

/// `payload || sig || POSTFIX1 || POSTFIX2`, the signature covering
/// `payload || POSTFIX1 || POSTFIX2`.
pub fn append_signature(identity: &DeviceIdentity, payload: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(payload.len() + POSTFIX1.len() + POSTFIX2.len());
    signed.extend_from_slice(payload);
    signed.extend_from_slice(POSTFIX1);
    signed.extend_from_slice(POSTFIX2);
    let sig = identity.sign(&signed);

    let mut out = Vec::with_capacity(payload.len() + SIGNATURE_FRAME_LEN);
    out.extend_from_slice(payload);
    out.extend_from_slice(&sig);
    out.extend_from_slice(POSTFIX1);
    out.extend_from_slice(POSTFIX2);
    out
}

/// Receiver side of [`append_signature`]: checks the postfixes and the
/// signature, returning the bare payload.
pub fn verify_appended<'a>(
    public_key: &[u8; PUBLIC_KEY_LEN],
    framed: &'a [u8],
) -> Result<&'a [u8], CryptoError> {
    if framed.len() < SIGNATURE_FRAME_LEN {
        return Err(CryptoError::SignatureInvalid);
    }
    let (payload, trailer) = framed.split_at(framed.len() - SIGNATURE_FRAME_LEN);
    let (sig, postfixes) = trailer.split_at(SIGNATURE_LEN);
    if postfixes[..POSTFIX1.len()] != POSTFIX1[..] || postfixes[POSTFIX1.len()..] != POSTFIX2[..] {
        return Err(CryptoError::SignatureInvalid);
    }

    let mut signed = Vec::with_capacity(payload.len() + postfixes.len());
    signed.extend_from_slice(payload);
    signed.extend_from_slice(postfixes);

    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(sig);
    super::verify_signature(public_key, &signed, &sig_bytes)?;
    Ok(payload)
}
