//! Session wire messages.
//!
//! ```text
//! device key   : serial(32) | device_eph(32) | sig(64) | "postfix1" | "postfix2"
//! server key   : server_eph(32) | session_age(32) | server_sig(64)
//! request      : type(1) | body
//! response     : type(1) | body        (type 0x7F: error, body = status(1))
//! ```
//!
//! The server signature covers `server_eph | session_age | device_eph`, so a
//! server key message cannot be replayed into another handshake.

use super::SessionError;
use crate::crypto::{append_signature, DeviceIdentity, PUBLIC_KEY_LEN, SIGNATURE_LEN};

pub const SESSION_AGE_LEN: usize = 32;
pub const SESSION_ID_LEN: usize = 16;
pub const SESSION_KEY_LEN: usize = 32;
pub const SERVER_KEY_MSG_LEN: usize = PUBLIC_KEY_LEN + SESSION_AGE_LEN + SIGNATURE_LEN;

/// Response tag for failed requests.
pub const ERROR_TAG: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionMsgType {
    SendDeviceKey = 1,
    ReceiveServerKey = 2,
    Encrypt = 3,
    Decrypt = 4,
    Close = 5,
}

impl TryFrom<u8> for SessionMsgType {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::SendDeviceKey),
            2 => Ok(Self::ReceiveServerKey),
            3 => Ok(Self::Encrypt),
            4 => Ok(Self::Decrypt),
            5 => Ok(Self::Close),
            _ => Err(SessionError::Malformed),
        }
    }
}

/// A decoded host request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest<'a> {
    SendDeviceKey,
    ReceiveServerKey(&'a [u8]),
    Encrypt(&'a [u8]),
    Decrypt(&'a [u8]),
    Close,
}

impl<'a> SessionRequest<'a> {
    pub fn decode(raw: &'a [u8]) -> Result<Self, SessionError> {
        let (&tag, body) = raw.split_first().ok_or(SessionError::Malformed)?;
        Ok(match SessionMsgType::try_from(tag)? {
            SessionMsgType::SendDeviceKey => Self::SendDeviceKey,
            SessionMsgType::ReceiveServerKey => Self::ReceiveServerKey(body),
            SessionMsgType::Encrypt => Self::Encrypt(body),
            SessionMsgType::Decrypt => Self::Decrypt(body),
            SessionMsgType::Close => Self::Close,
        })
    }

    pub fn msg_type(&self) -> SessionMsgType {
        match self {
            Self::SendDeviceKey => SessionMsgType::SendDeviceKey,
            Self::ReceiveServerKey(_) => SessionMsgType::ReceiveServerKey,
            Self::Encrypt(_) => SessionMsgType::Encrypt,
            Self::Decrypt(_) => SessionMsgType::Decrypt,
            Self::Close => SessionMsgType::Close,
        }
    }
}

/// `append_signature(serial || device_eph)`.
pub fn device_key_message(identity: &DeviceIdentity, device_eph: &[u8; PUBLIC_KEY_LEN]) -> Vec<u8> {
    let mut payload = [0u8; 64];
    payload[..32].copy_from_slice(identity.serial());
    payload[32..].copy_from_slice(device_eph);
    append_signature(identity, &payload)
}

/// Parsed server key message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerKeyMessage {
    pub server_eph: [u8; PUBLIC_KEY_LEN],
    pub session_age: [u8; SESSION_AGE_LEN],
    pub signature: [u8; SIGNATURE_LEN],
}

impl ServerKeyMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, SessionError> {
        if raw.len() != SERVER_KEY_MSG_LEN {
            return Err(SessionError::Malformed);
        }
        let mut msg = Self {
            server_eph: [0u8; PUBLIC_KEY_LEN],
            session_age: [0u8; SESSION_AGE_LEN],
            signature: [0u8; SIGNATURE_LEN],
        };
        msg.server_eph.copy_from_slice(&raw[..32]);
        msg.session_age.copy_from_slice(&raw[32..64]);
        msg.signature.copy_from_slice(&raw[64..]);
        Ok(msg)
    }

    pub fn to_bytes(&self) -> [u8; SERVER_KEY_MSG_LEN] {
        let mut out = [0u8; SERVER_KEY_MSG_LEN];
        out[..32].copy_from_slice(&self.server_eph);
        out[32..64].copy_from_slice(&self.session_age);
        out[64..].copy_from_slice(&self.signature);
        out
    }

    /// Bytes covered by the server signature.
    pub fn signed_bytes(
        server_eph: &[u8; PUBLIC_KEY_LEN],
        session_age: &[u8; SESSION_AGE_LEN],
        device_eph: &[u8; PUBLIC_KEY_LEN],
    ) -> [u8; 96] {
        let mut out = [0u8; 96];
        out[..32].copy_from_slice(server_eph);
        out[32..64].copy_from_slice(session_age);
        out[64..].copy_from_slice(device_eph);
        out
    }
}
