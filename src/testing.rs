//! Deterministic doubles for the card link, the UI, the host link and the
//! entropy source.

use std::collections::VecDeque;
use std::time::Duration;

use crate::card::{CardChannel, CardError, CardNumber, CardSet, CardShare, MAX_CARDS};
use crate::entropy::{EntropyError, EntropySource};
use crate::events::AbortSignal;
use crate::host::{HostError, HostLink, LinkEvent};
use crate::storage::record::WalletId;
use crate::ui::{Notice, StepDescriptor, UserEvent, UserInterface};

/// Counter-based entropy: byte i of the stream is `start + i` (wrapping).
pub(crate) struct CountingEntropy {
    next: u8,
    pub drawn: usize,
}

impl CountingEntropy {
    pub fn new(start: u8) -> Self {
        Self { next: start, drawn: 0 }
    }
}

impl EntropySource for CountingEntropy {
    fn name(&self) -> &'static str {
        "Counting"
    }

    fn fill(&mut self, dest: &mut [u8]) -> Result<(), EntropyError> {
        for b in dest.iter_mut() {
            *b = self.next;
            self.next = self.next.wrapping_add(1);
        }
        self.drawn += dest.len();
        Ok(())
    }
}

/// Five simulated cards with scripted faults.
///
/// Each queue is consumed one entry per operation; an empty queue means the
/// operation succeeds. A tap with no scripted entry presents the lowest card
/// in the acceptable set.
#[derive(Default)]
pub(crate) struct SimCards {
    pub stored: [Option<CardShare>; MAX_CARDS],
    pub taps: VecDeque<Result<u8, CardError>>,
    pub write_faults: VecDeque<Option<CardError>>,
    pub read_faults: VecDeque<Option<CardError>>,
    /// Corrupts the ciphertext of shares read from these cards.
    pub tamper: CardSet,
    pub tap_count: usize,
    pub write_count: usize,
    pub read_count: usize,
    /// Raises the signal when the n-th tap (1-based) happens.
    pub abort_on_tap: Option<(usize, AbortSignal)>,
}

impl SimCards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.stored.iter().filter(|s| s.is_some()).count()
    }
}

impl CardChannel for SimCards {
    fn tap(&mut self, acceptable: CardSet, _timeout: Duration) -> Result<CardNumber, CardError> {
        self.tap_count += 1;
        if let Some((n, signal)) = &self.abort_on_tap {
            if *n == self.tap_count {
                signal.raise();
            }
        }
        match self.taps.pop_front() {
            Some(Ok(n)) => CardNumber::new(n).ok_or(CardError::Communication),
            Some(Err(e)) => Err(e),
            None => acceptable.iter().next().ok_or(CardError::Timeout),
        }
    }

    fn write_share(&mut self, card: CardNumber, share: &CardShare) -> Result<(), CardError> {
        self.write_count += 1;
        if let Some(Some(e)) = self.write_faults.pop_front() {
            return Err(e);
        }
        self.stored[card.index()] = Some(share.clone());
        Ok(())
    }

    fn read_share(&mut self, card: CardNumber, wallet: &WalletId) -> Result<CardShare, CardError> {
        self.read_count += 1;
        if let Some(Some(e)) = self.read_faults.pop_front() {
            return Err(e);
        }
        let mut share = match &self.stored[card.index()] {
            Some(s) if s.wallet_id == *wallet => s.clone(),
            _ => return Err(CardError::Applet(crate::card::SW_FILE_NOT_FOUND)),
        };
        if self.tamper.contains(card) {
            share.ciphertext.as_mut_bytes()[0] ^= 0x01;
        }
        Ok(share)
    }
}

/// UI answering from a queue; an exhausted queue times out.
#[derive(Default)]
pub(crate) struct ScriptedUi {
    pub events: VecDeque<UserEvent>,
    pub shown: Vec<&'static str>,
    pub notices: Vec<Notice>,
    /// Raises the signal when this step is shown.
    pub abort_on_step: Option<(&'static str, AbortSignal)>,
}

impl ScriptedUi {
    pub fn new(events: Vec<UserEvent>) -> Self {
        Self { events: events.into(), ..Self::default() }
    }
}

impl UserInterface for ScriptedUi {
    fn show(&mut self, step: &StepDescriptor, _timeout: Duration) -> UserEvent {
        self.shown.push(step.name);
        if let Some((name, signal)) = &self.abort_on_step {
            if *name == step.name {
                signal.raise();
            }
        }
        self.events.pop_front().unwrap_or(UserEvent::Timeout)
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

/// Typed text input.
pub(crate) fn text(s: &str) -> UserEvent {
    UserEvent::TextInput(zeroize::Zeroizing::new(s.to_owned()))
}

/// Host link answering from a queue; an exhausted queue times out.
pub(crate) struct ScriptedHost {
    pub requests: VecDeque<LinkEvent>,
    pub sent: Vec<Vec<u8>>,
    pub cleared: usize,
}

impl ScriptedHost {
    pub fn new(requests: Vec<LinkEvent>) -> Self {
        Self { requests: requests.into(), sent: Vec::new(), cleared: 0 }
    }
}

impl HostLink for ScriptedHost {
    fn wait_request(&mut self, _timeout: Duration) -> LinkEvent {
        self.requests.pop_front().unwrap_or(LinkEvent::Timeout)
    }

    fn send(&mut self, response: &[u8]) -> Result<(), HostError> {
        self.sent.push(response.to_vec());
        Ok(())
    }

    fn clear_event(&mut self) {
        self.cleared += 1;
    }
}
