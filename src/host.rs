//! Host message contract.
//!
//! Requests arrive as tagged byte strings; responses are encoded into a
//! fixed-capacity buffer whose first byte is the response tag. A tag of zero
//! means "nothing to send" and the buffer is never transmitted.

use std::time::Duration;

/// Largest response the device ever sends.
pub const MAX_RESPONSE_LEN: usize = 512;

pub type ResponseBuffer = heapless::Vec<u8, MAX_RESPONSE_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("response exceeds buffer capacity")]
    ResponseTooLarge,
    #[error("host link closed")]
    LinkClosed,
}

/// Outcome of a blocking wait on the host link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(Vec<u8>),
    /// Priority-zero abort from the host or the device.
    Abort,
    Timeout,
}

/// The USB/serial byte pump, seen from the core.
pub trait HostLink {
    fn wait_request(&mut self, timeout: Duration) -> LinkEvent;

    fn send(&mut self, response: &[u8]) -> Result<(), HostError>;

    /// Drops any pending request, used when a flow ends early.
    fn clear_event(&mut self);
}

/// `tag || body` into a response buffer.
pub fn encode_response(tag: u8, body: &[u8]) -> Result<ResponseBuffer, HostError> {
    let mut out = ResponseBuffer::new();
    out.push(tag).map_err(|_| HostError::ResponseTooLarge)?;
    out.extend_from_slice(body)
        .map_err(|_| HostError::ResponseTooLarge)?;
    Ok(out)
}

/// Sends `response` unless its tag is zero. Returns whether it was sent.
pub fn send_response<L: HostLink + ?Sized>(link: &mut L, response: &[u8]) -> Result<bool, HostError> {
    match response.first() {
        Some(&tag) if tag != 0 => {
            link.send(response)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
