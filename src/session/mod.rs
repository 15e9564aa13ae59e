//! Session handshake.
//!
//! Establishes an encrypted channel between the device and a remote server.
//!
//! 1. `Init`: the device generates an ephemeral X25519 key and sends it with
//!    its serial, signed by the long-term identity key.
//! 2. `AwaitServerKey`: the server answers with its ephemeral key and a
//!    session age, signed by the server key the device was provisioned with.
//! 3. Key derivation: HKDF-SHA256 over the X25519 shared secret, salted with
//!    the session age and bound to both ephemeral keys, yields the 32-byte
//!    session key and the 16-byte session id.
//! 4. `Established`: ChaCha20-Poly1305 with a random nonce per message and
//!    the session id as associated data.
//!
//! # Security
//! - The session key is only derived after the server signature verifies.
//! - Any failure drops all partial material; the handshake is not resumable.
//! - Sessions expire after `max_age` messages.

pub mod message;

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroizing;

pub use message::{ServerKeyMessage, SessionMsgType, SessionRequest};
use message::{SESSION_AGE_LEN, SESSION_ID_LEN, SESSION_KEY_LEN};

use crate::crypto::{
    hkdf_sha256, verify_signature, DeviceIdentity, DeviceSerial, EphemeralKeyPair, PUBLIC_KEY_LEN, SIGNATURE_LEN,
};
use crate::entropy::EntropySource;
use crate::host::{encode_response, ResponseBuffer};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KDF_INFO: &[u8] = b"shardvault-session-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("operation not valid in the current session state")]
    InvalidState,
    #[error("device key generation failed")]
    DeviceKey,
    #[error("server key verification failed")]
    ServerKey,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("session expired")]
    Expired,
    #[error("malformed session message")]
    Malformed,
}

impl SessionError {
    /// Status byte reported to the host.
    pub fn status(&self) -> u8 {
        match self {
            SessionError::InvalidState => 1,
            SessionError::DeviceKey => 2,
            SessionError::ServerKey => 3,
            SessionError::Encrypt => 4,
            SessionError::Decrypt => 5,
            SessionError::Expired => 6,
            SessionError::Malformed => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    AwaitServerKey,
    Established,
    Closed,
}

/// An established session. Key material is wiped on drop.
pub struct Session {
    device_id: DeviceSerial,
    device_ephemeral: [u8; PUBLIC_KEY_LEN],
    server_ephemeral: [u8; PUBLIC_KEY_LEN],
    key: Zeroizing<[u8; SESSION_KEY_LEN]>,
    id: [u8; SESSION_ID_LEN],
    age_counter: u32,
}

impl Session {
    pub fn id(&self) -> &[u8; SESSION_ID_LEN] {
        &self.id
    }

    pub fn device_id(&self) -> &DeviceSerial {
        &self.device_id
    }

    pub fn age_counter(&self) -> u32 {
        self.age_counter
    }

    pub fn ephemeral_keys(&self) -> (&[u8; PUBLIC_KEY_LEN], &[u8; PUBLIC_KEY_LEN]) {
        (&self.device_ephemeral, &self.server_ephemeral)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key[..]))
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &hex::encode(self.id))
            .field("age_counter", &self.age_counter)
            .field("key", &"***SENSITIVE***")
            .finish()
    }
}

/// Derives `(session_key, session_id)` from the X25519 shared secret.
pub(crate) fn derive_session_keys(
    shared: &[u8; 32],
    session_age: &[u8; SESSION_AGE_LEN],
    device_eph: &[u8; PUBLIC_KEY_LEN],
    server_eph: &[u8; PUBLIC_KEY_LEN],
) -> Result<(Zeroizing<[u8; SESSION_KEY_LEN]>, [u8; SESSION_ID_LEN]), SessionError> {
    let mut okm = Zeroizing::new([0u8; SESSION_KEY_LEN + SESSION_ID_LEN]);
    hkdf_sha256(session_age, shared, &[KDF_INFO, &device_eph[..], &server_eph[..]], &mut okm[..])
        .map_err(|_| SessionError::ServerKey)?;
    let mut key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    key.copy_from_slice(&okm[..SESSION_KEY_LEN]);
    let mut id = [0u8; SESSION_ID_LEN];
    id.copy_from_slice(&okm[SESSION_KEY_LEN..]);
    Ok((key, id))
}

/// Device side of the handshake and the established channel.
pub struct SessionManager<'a> {
    identity: &'a DeviceIdentity,
    server_key: [u8; PUBLIC_KEY_LEN],
    max_age: u32,
    state: SessionState,
    pending: Option<EphemeralKeyPair>,
    session: Option<Session>,
}

impl<'a> SessionManager<'a> {
    pub fn new(identity: &'a DeviceIdentity, server_key: [u8; PUBLIC_KEY_LEN], max_age: u32) -> Self {
        Self {
            identity,
            server_key,
            max_age,
            state: SessionState::Init,
            pending: None,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            log::info!("State transition: {:?} -> {:?}", self.state, to);
        }
        self.state = to;
    }

    /// Drops every piece of session material and returns to `Init`.
    fn reset(&mut self) {
        self.pending = None;
        self.session = None;
        self.transition(SessionState::Init);
    }

    /// Starts a fresh handshake, discarding any previous session, and
    /// returns the signed device key message.
    pub fn start<R: EntropySource + ?Sized>(&mut self, rng: &mut R) -> Result<Vec<u8>, SessionError> {
        self.reset();
        let pair = EphemeralKeyPair::generate(rng).map_err(|_| SessionError::DeviceKey)?;
        let msg = message::device_key_message(self.identity, &pair.public_bytes());
        self.pending = Some(pair);
        self.transition(SessionState::AwaitServerKey);
        Ok(msg)
    }

    /// Verifies the server key message and derives the session.
    pub fn receive_server_key(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        if self.state != SessionState::AwaitServerKey {
            return Err(SessionError::InvalidState);
        }
        let result = self.establish(raw);
        if let Err(e) = result {
            log::warn!("Handshake aborted: {}", e);
            self.reset();
        }
        result
    }

    fn establish(&mut self, raw: &[u8]) -> Result<(), SessionError> {
        let msg = ServerKeyMessage::parse(raw)?;
        let pair = self.pending.take().ok_or(SessionError::InvalidState)?;
        let device_eph = pair.public_bytes();

        let signed = ServerKeyMessage::signed_bytes(&msg.server_eph, &msg.session_age, &device_eph);
        verify_signature(&self.server_key, &signed, &msg.signature).map_err(|_| SessionError::ServerKey)?;

        let shared = pair
            .diffie_hellman(&msg.server_eph)
            .map_err(|_| SessionError::ServerKey)?;
        let (key, id) = derive_session_keys(&shared, &msg.session_age, &device_eph, &msg.server_eph)?;

        self.session = Some(Session {
            device_id: *self.identity.serial(),
            device_ephemeral: device_eph,
            server_ephemeral: msg.server_eph,
            key,
            id,
            age_counter: 0,
        });
        self.transition(SessionState::Established);
        Ok(())
    }

    /// Charges one message against the session age.
    fn active(&mut self) -> Result<&mut Session, SessionError> {
        let max_age = self.max_age;
        let expired = match self.session.as_ref() {
            None => return Err(SessionError::InvalidState),
            Some(s) => s.age_counter >= max_age,
        };
        if expired {
            log::warn!("Session expired after {} messages", max_age);
            self.close();
            return Err(SessionError::Expired);
        }
        let session = self.session.as_mut().ok_or(SessionError::InvalidState)?;
        session.age_counter += 1;
        Ok(session)
    }

    /// `nonce(12) || ciphertext || tag(16)`.
    pub fn encrypt<R: EntropySource + ?Sized>(
        &mut self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, SessionError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce).map_err(|_| SessionError::Encrypt)?;
        let session = self.active()?;
        let ct = session
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &session.id })
            .map_err(|_| SessionError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, SessionError> {
        let session = self.active()?;
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(SessionError::Decrypt);
        }
        let (nonce, ct) = data.split_at(NONCE_LEN);
        session
            .cipher()
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ct, aad: &session.id })
            .map(Zeroizing::new)
            .map_err(|_| SessionError::Decrypt)
    }

    /// Verifies an arbitrary payload signed by the server key.
    pub fn verify_server_payload(&self, payload: &[u8], signature: &[u8]) -> Result<(), SessionError> {
        let signature: &[u8; SIGNATURE_LEN] = signature.try_into().map_err(|_| SessionError::Malformed)?;
        verify_signature(&self.server_key, payload, signature).map_err(|_| SessionError::ServerKey)
    }

    pub fn close(&mut self) {
        self.pending = None;
        self.session = None;
        self.transition(SessionState::Closed);
    }

    /// Decodes a host request, runs it and encodes the response.
    pub fn handle_request<R: EntropySource + ?Sized>(&mut self, raw: &[u8], rng: &mut R) -> ResponseBuffer {
        let (tag, result) = match SessionRequest::decode(raw) {
            Ok(request) => {
                let tag = request.msg_type() as u8;
                let result = match request {
                    SessionRequest::SendDeviceKey => self.start(rng),
                    SessionRequest::ReceiveServerKey(body) => self.receive_server_key(body).map(|_| vec![0]),
                    SessionRequest::Encrypt(body) => self.encrypt(rng, body),
                    SessionRequest::Decrypt(body) => self.decrypt(body).map(|p| p.to_vec()),
                    SessionRequest::Close => {
                        self.close();
                        Ok(Vec::new())
                    }
                };
                (tag, result)
            }
            Err(e) => (message::ERROR_TAG, Err(e)),
        };
        let encoded = match result {
            Ok(body) => encode_response(tag, &body),
            Err(e) => encode_response(message::ERROR_TAG, &[e.status()]),
        };
        // Oversized payloads are reported, never truncated.
        encoded.unwrap_or_else(|_| {
            encode_response(message::ERROR_TAG, &[SessionError::Encrypt.status()]).unwrap_or_default()
        })
    }
}
