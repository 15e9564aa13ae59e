//! Device authentication.
//!
//! Proves to the host that it is talking to a genuine device. Three linear
//! steps, each answering exactly one request kind:
//!
//! - `SignSerialNum`: `INITIATE` -> signed serial number. Anything else ends
//!   the flow as aborted.
//! - `SignRandomNum`: `CHALLENGE(nonce)` -> signed nonce. A `RESULT` here is
//!   an attempt to skip the challenge and ends the flow unauthenticated.
//! - `Result`: `RESULT(verified)` -> the host's verdict ends the flow.
//!
//! After `INITIATE`, other out-of-order or undecodable requests are ignored
//! and their pending event cleared. A silent host or a dropped response ends
//! the flow as aborted. No path reaches `Authenticated` without passing
//! through all three steps.

use std::time::Duration;

use crate::crypto::{append_signature, DeviceIdentity};
use crate::events::AbortSignal;
use crate::host::{encode_response, send_response, HostError, HostLink, LinkEvent, ResponseBuffer};

pub const MIN_CHALLENGE_LEN: usize = 16;
pub const MAX_CHALLENGE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown request tag {0}")]
    UnknownTag(u8),
    #[error("malformed request")]
    Malformed,
    #[error("challenge must be 16 to 32 bytes")]
    ChallengeLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    SignSerialNum,
    SignRandomNum,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    Initiate,
    Challenge(heapless::Vec<u8, MAX_CHALLENGE_LEN>),
    Result { verified: bool },
}

impl AuthRequest {
    pub const INITIATE: u8 = 1;
    pub const CHALLENGE: u8 = 2;
    pub const RESULT: u8 = 3;

    pub fn decode(raw: &[u8]) -> Result<Self, AuthError> {
        let (&tag, body) = raw.split_first().ok_or(AuthError::Malformed)?;
        match tag {
            Self::INITIATE if body.is_empty() => Ok(Self::Initiate),
            Self::CHALLENGE => {
                if !(MIN_CHALLENGE_LEN..=MAX_CHALLENGE_LEN).contains(&body.len()) {
                    return Err(AuthError::ChallengeLength);
                }
                heapless::Vec::from_slice(body)
                    .map(Self::Challenge)
                    .map_err(|_| AuthError::ChallengeLength)
            }
            Self::RESULT => match body {
                [0] => Ok(Self::Result { verified: false }),
                [1] => Ok(Self::Result { verified: true }),
                _ => Err(AuthError::Malformed),
            },
            Self::INITIATE => Err(AuthError::Malformed),
            other => Err(AuthError::UnknownTag(other)),
        }
    }
}

/// Response to the host. `None` is never transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    None,
    SerialSignature(Vec<u8>),
    ChallengeSignature(Vec<u8>),
    FlowComplete,
}

impl AuthResponse {
    pub fn tag(&self) -> u8 {
        match self {
            AuthResponse::None => 0,
            AuthResponse::SerialSignature(_) => 1,
            AuthResponse::ChallengeSignature(_) => 2,
            AuthResponse::FlowComplete => 3,
        }
    }

    pub fn encode(&self) -> Result<ResponseBuffer, HostError> {
        let body: &[u8] = match self {
            AuthResponse::SerialSignature(b) | AuthResponse::ChallengeSignature(b) => b,
            AuthResponse::None | AuthResponse::FlowComplete => &[],
        };
        encode_response(self.tag(), body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Unauthenticated,
    Aborted,
}

pub struct DeviceAuthFlow<'a> {
    identity: &'a DeviceIdentity,
    step: AuthStep,
}

impl<'a> DeviceAuthFlow<'a> {
    pub fn new(identity: &'a DeviceIdentity) -> Self {
        Self { identity, step: AuthStep::SignSerialNum }
    }

    pub fn step(&self) -> AuthStep {
        self.step
    }

    fn advance(&mut self, to: AuthStep) {
        log::info!("State transition: {:?} -> {:?}", self.step, to);
        self.step = to;
    }

    /// Applies one request. Returns the response and, when the flow ends,
    /// its outcome.
    pub fn handle(&mut self, request: &AuthRequest) -> (AuthResponse, Option<AuthOutcome>) {
        match (self.step, request) {
            (AuthStep::SignSerialNum, AuthRequest::Initiate) => {
                let sig = append_signature(self.identity, self.identity.serial());
                self.advance(AuthStep::SignRandomNum);
                (AuthResponse::SerialSignature(sig), None)
            }
            (AuthStep::SignSerialNum, _) => {
                log::warn!("Device auth: unexpected request before INITIATE, aborting");
                (AuthResponse::None, Some(AuthOutcome::Aborted))
            }
            (AuthStep::SignRandomNum, AuthRequest::Challenge(nonce)) => {
                let sig = append_signature(self.identity, nonce);
                self.advance(AuthStep::Result);
                (AuthResponse::ChallengeSignature(sig), None)
            }
            (AuthStep::SignRandomNum, AuthRequest::Result { .. }) => {
                log::warn!("Device auth: RESULT before challenge, forced completion rejected");
                (AuthResponse::FlowComplete, Some(AuthOutcome::Unauthenticated))
            }
            (AuthStep::Result, AuthRequest::Result { verified }) => {
                let outcome = if *verified {
                    AuthOutcome::Authenticated
                } else {
                    AuthOutcome::Unauthenticated
                };
                log::info!("Device auth finished: {:?}", outcome);
                (AuthResponse::FlowComplete, Some(outcome))
            }
            (step, request) => {
                log::debug!("Device auth: ignoring {:?} in {:?}", request, step);
                (AuthResponse::None, None)
            }
        }
    }

    /// Serves requests from `link` until the flow ends.
    pub fn run<L: HostLink + ?Sized>(
        &mut self,
        link: &mut L,
        abort: &AbortSignal,
        timeout: Duration,
    ) -> AuthOutcome {
        loop {
            if abort.take() {
                link.clear_event();
                return AuthOutcome::Aborted;
            }
            let raw = match link.wait_request(timeout) {
                LinkEvent::Message(raw) => raw,
                LinkEvent::Abort => {
                    link.clear_event();
                    return AuthOutcome::Aborted;
                }
                LinkEvent::Timeout => {
                    log::warn!("Device auth: host unresponsive in {:?}, aborting", self.step);
                    link.clear_event();
                    return AuthOutcome::Aborted;
                }
            };
            if abort.take() {
                link.clear_event();
                return AuthOutcome::Aborted;
            }

            let request = match AuthRequest::decode(&raw) {
                Ok(request) => request,
                Err(e) if self.step == AuthStep::SignSerialNum => {
                    log::warn!("Device auth: undecodable first request ({}), aborting", e);
                    link.clear_event();
                    return AuthOutcome::Aborted;
                }
                Err(e) => {
                    log::debug!("Device auth: dropping request: {}", e);
                    link.clear_event();
                    continue;
                }
            };
            let (response, outcome) = self.handle(&request);
            let sent = response
                .encode()
                .and_then(|buf| send_response(link, &buf));
            if let Err(e) = sent {
                log::warn!("Device auth: response not delivered: {}", e);
                link.clear_event();
                return AuthOutcome::Aborted;
            }
            match outcome {
                Some(AuthOutcome::Aborted) => {
                    link.clear_event();
                    return AuthOutcome::Aborted;
                }
                Some(outcome) => return outcome,
                // ignored request
                None if response == AuthResponse::None => link.clear_event(),
                None => {}
            }
        }
    }
}
