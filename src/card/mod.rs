//! Card contract and share transport.
//!
//! Each wallet share lives on one of five physical cards reached over the
//! contactless link. This module defines what the core needs from that link
//! ([`CardChannel`]), how card faults are classified, and the per-card state
//! machine that writes, reads back and collects shares.
//!
//! # Components
//! - `retry`: the retry budget carried through each card step.
//! - `transport`: the write / read-back state machine.
//! - `collect`: reading any `threshold` cards to rebuild the secret.

pub mod collect;
pub mod retry;
pub mod transport;

pub use collect::collect_shares;
pub use retry::RetryBudget;
pub use transport::{ShareTransport, TransportMode, TransportSettings, TransportState};

use std::fmt;
use std::time::Duration;

use crate::core::secret::SecretVec;
use crate::crypto::envelope::Envelope;
use crate::storage::record::WalletId;

/// Cards per wallet.
pub const MAX_CARDS: usize = 5;

/// Applet status word: referenced file or application not found.
pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
/// Applet status word: no precise diagnosis (card pulled mid-exchange).
pub const SW_UNKNOWN: u16 = 0x6F00;

/// Physical card slot, 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CardNumber(u8);

impl CardNumber {
    pub fn new(n: u8) -> Option<Self> {
        (1..=MAX_CARDS as u8).contains(&n).then_some(Self(n))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based position, for per-card arrays.
    pub fn index(&self) -> usize {
        self.0 as usize - 1
    }

    /// All cards in order.
    pub fn all() -> impl Iterator<Item = CardNumber> {
        (1..=MAX_CARDS as u8).map(CardNumber)
    }

    pub fn next(&self) -> Option<Self> {
        Self::new(self.0 + 1)
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card {}", self.0)
    }
}

/// Bitmask of cards; bit k-1 stands for card k.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CardSet(u8);

impl CardSet {
    pub const EMPTY: CardSet = CardSet(0);
    pub const ALL: CardSet = CardSet((1 << MAX_CARDS) - 1);

    pub fn single(card: CardNumber) -> Self {
        CardSet(1 << card.index())
    }

    /// Rejects bits beyond the fifth card.
    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits & !Self::ALL.0 == 0).then_some(CardSet(bits))
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, card: CardNumber) -> bool {
        self.0 & (1 << card.index()) != 0
    }

    pub fn insert(&mut self, card: CardNumber) {
        self.0 |= 1 << card.index();
    }

    pub fn remove(&mut self, card: CardNumber) {
        self.0 &= !(1 << card.index());
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = CardNumber> + '_ {
        CardNumber::all().filter(move |c| self.contains(*c))
    }
}

impl fmt::Debug for CardSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardSet({:05b})", self.0)
    }
}

/// Card link failures, as reported by the channel or raised by the core's
/// acceptance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CardError {
    /// A card outside the acceptable set was presented.
    #[error("wrong card presented (card {presented})")]
    WrongCard { presented: u8 },
    /// Link-level glitch; the same card can be tapped again.
    #[error("card communication failure")]
    Communication,
    /// Applet rejected the command with this status word.
    #[error("card applet error {0:#06x}")]
    Applet(u16),
    /// No card answered within the inactivity timeout.
    #[error("card wait timed out")]
    Timeout,
    /// The wait was interrupted by the abort signal.
    #[error("card wait aborted")]
    Aborted,
}

/// What a [`CardError`] means for the current card step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Retry without touching the communication budget.
    WrongCard,
    /// Retry, consuming one attempt.
    Recoverable,
    /// Stop the flow.
    Fatal,
    /// Unwind on the abort signal.
    Abort,
}

impl CardError {
    pub fn classify(&self) -> FaultClass {
        match self {
            CardError::WrongCard { .. } => FaultClass::WrongCard,
            CardError::Communication => FaultClass::Recoverable,
            CardError::Applet(SW_FILE_NOT_FOUND) | CardError::Applet(SW_UNKNOWN) => FaultClass::Recoverable,
            CardError::Applet(_) | CardError::Timeout => FaultClass::Fatal,
            CardError::Aborted => FaultClass::Abort,
        }
    }
}

/// What a card stores for one wallet: the sealed share and its envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct CardShare {
    pub wallet_id: WalletId,
    pub x: u8,
    pub ciphertext: SecretVec,
    pub envelope: Envelope,
}

impl CardShare {
    pub fn wipe(&mut self) {
        self.ciphertext.wipe();
        self.envelope = Envelope::EMPTY;
    }

    pub fn is_wiped(&self) -> bool {
        self.ciphertext.is_wiped() && self.envelope.is_empty()
    }
}

impl fmt::Debug for CardShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardShare")
            .field("wallet_id", &self.wallet_id)
            .field("x", &self.x)
            .field("ciphertext", &"***SENSITIVE***")
            .finish()
    }
}

/// Message-exchange contract of the contactless link.
pub trait CardChannel {
    /// Blocks until a card is tapped and returns its identity. The channel may
    /// use `acceptable` to pre-filter; the core re-checks it either way.
    fn tap(&mut self, acceptable: CardSet, timeout: Duration) -> Result<CardNumber, CardError>;

    fn write_share(&mut self, card: CardNumber, share: &CardShare) -> Result<(), CardError>;

    fn read_share(&mut self, card: CardNumber, wallet: &WalletId) -> Result<CardShare, CardError>;
}

/// Per-step context, created when a card step starts and dropped when it
/// resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardSlot {
    pub card: CardNumber,
    pub budget: RetryBudget,
    pub last_error: Option<CardError>,
}

impl CardSlot {
    pub fn new(card: CardNumber, budget: RetryBudget) -> Self {
        Self { card, budget, last_error: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(n: u8) -> CardNumber {
        CardNumber::new(n).unwrap()
    }

    #[test]
    fn card_numbers_are_one_based() {
        assert!(CardNumber::new(0).is_none());
        assert!(CardNumber::new(6).is_none());
        assert_eq!(card(5).index(), 4);
        assert_eq!(card(5).next(), None);
        assert_eq!(CardNumber::all().count(), 5);
    }

    #[test]
    fn card_set_bits() {
        let mut set = CardSet::EMPTY;
        set.insert(card(1));
        set.insert(card(3));
        assert_eq!(set.bits(), 0b101);
        assert!(set.contains(card(3)));
        assert!(!set.contains(card(2)));
        assert_eq!(set.len(), 2);
        set.remove(card(1));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![card(3)]);
        assert_eq!(CardSet::single(card(2)).bits(), 0b10);
        assert!(CardSet::from_bits(0b100000).is_none());
        assert_eq!(CardSet::ALL.len(), 5);
    }

    #[test]
    fn fault_classification() {
        assert_eq!(CardError::WrongCard { presented: 2 }.classify(), FaultClass::WrongCard);
        assert_eq!(CardError::Communication.classify(), FaultClass::Recoverable);
        assert_eq!(CardError::Applet(SW_FILE_NOT_FOUND).classify(), FaultClass::Recoverable);
        assert_eq!(CardError::Applet(SW_UNKNOWN).classify(), FaultClass::Recoverable);
        assert_eq!(CardError::Applet(0x6985).classify(), FaultClass::Fatal);
        assert_eq!(CardError::Timeout.classify(), FaultClass::Fatal);
        assert_eq!(CardError::Aborted.classify(), FaultClass::Abort);
    }

    #[test]
    fn card_share_wipe() {
        let mut share = CardShare {
            wallet_id: WalletId([1; 16]),
            x: 1,
            ciphertext: SecretVec::from_slice(&[9; 32]),
            envelope: Envelope { nonce: [1; 16], mac: [2; 16] },
        };
        assert!(!share.is_wiped());
        share.wipe();
        assert!(share.is_wiped());
    }
}
