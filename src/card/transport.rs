//! Share transport state machine.
//!
//! Drives cards one at a time through
//! `Frontend(k) -> Write(k) -> Readback(k) -> Frontend(k+1) | Done | Failed`.
//! Read-only runs (wallet verification) skip `Write`.
//!
//! # Invariants
//! - A card's bit in `cards_written` and its envelope are stored together,
//!   and flushed before the in-memory sealed share for that card is wiped.
//! - The first successful write creates the wallet record; later cards
//!   update it.
//! - Wrong cards are charged to their own budget, never to the
//!   communication retries.
//! - The abort signal is checked before and after every blocking wait.

use std::time::Duration;

use super::{CardChannel, CardError, CardNumber, CardSet, CardShare, CardSlot, RetryBudget};
use crate::config::DeviceConfig;
use crate::crypto::envelope::EnvelopeKey;
use crate::error::FlowError;
use crate::events::AbortSignal;
use crate::mpc::Share;
use crate::storage::{RecordHandle, WalletRecord, WalletStore};
use crate::ui::{Notice, UserInterface};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub retries: u8,
    pub wrong_card_limit: u8,
    pub timeout: Duration,
}

impl From<&DeviceConfig> for TransportSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            retries: config.card_retries,
            wrong_card_limit: config.wrong_card_limit,
            timeout: config.transport_timeout,
        }
    }
}

impl TransportSettings {
    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.retries, self.wrong_card_limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Prompting for card `k`.
    Frontend(CardNumber),
    /// Writing the sealed share to card `k`.
    Write(CardNumber),
    /// Reading card `k` back and checking its envelope.
    Readback(CardNumber),
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Write,
    ReadOnly,
}

/// Collaborators for card steps.
pub struct CardIo<'a, C: CardChannel, U: UserInterface> {
    pub cards: &'a mut C,
    pub ui: &'a mut U,
    pub abort: &'a AbortSignal,
}

impl<'a, C: CardChannel, U: UserInterface> CardIo<'a, C, U> {
    pub fn new(cards: &'a mut C, ui: &'a mut U, abort: &'a AbortSignal) -> Self {
        Self { cards, ui, abort }
    }

    /// Waits for a tap and applies the acceptance check.
    pub(crate) fn present(&mut self, acceptable: CardSet, timeout: Duration) -> Result<CardNumber, CardError> {
        let presented = self.cards.tap(acceptable, timeout)?;
        if !acceptable.contains(presented) {
            return Err(CardError::WrongCard { presented: presented.get() });
        }
        Ok(presented)
    }
}

/// Share material in flight during one transport run.
///
/// `outgoing[k-1]` is the sealed share for card k until that card is
/// written; `recovered` collects shares opened during read-back.
#[derive(Debug, Default)]
pub struct ShareBuffers {
    pub outgoing: Vec<CardShare>,
    pub recovered: Vec<Share>,
}

impl ShareBuffers {
    /// Zeroizes every entry in place.
    pub fn wipe(&mut self) {
        self.outgoing.iter_mut().for_each(CardShare::wipe);
        self.recovered.iter_mut().for_each(Share::wipe);
    }

    /// Wipes and drops every entry.
    pub fn clear(&mut self) {
        self.wipe();
        self.outgoing.clear();
        self.recovered.clear();
    }

    pub fn is_wiped(&self) -> bool {
        self.outgoing.iter().all(CardShare::is_wiped) && self.recovered.iter().all(Share::is_wiped)
    }
}

/// Why a transport run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportFailure {
    pub card: CardNumber,
    pub error: FlowError,
    /// Cards durably written before the failure.
    pub cards_written: CardSet,
}

pub struct ShareTransport<'a, C: CardChannel, S: WalletStore, U: UserInterface> {
    io: CardIo<'a, C, U>,
    store: &'a mut S,
    key: &'a EnvelopeKey,
    settings: TransportSettings,
    mode: TransportMode,
    targets: CardSet,
    state: TransportState,
    card: CardNumber,
    slot: Option<CardSlot>,
    handle: Option<RecordHandle>,
}

impl<'a, C: CardChannel, S: WalletStore, U: UserInterface> ShareTransport<'a, C, S, U> {
    /// Writes and reads back all five cards. The record is created in
    /// `store` when card 1 succeeds.
    pub fn writer(
        io: CardIo<'a, C, U>,
        store: &'a mut S,
        key: &'a EnvelopeKey,
        settings: TransportSettings,
    ) -> Self {
        Self::new(io, store, key, settings, TransportMode::Write, CardSet::ALL, None)
    }

    /// Reads back every card in `record.cards_written`.
    pub fn reader(
        io: CardIo<'a, C, U>,
        store: &'a mut S,
        key: &'a EnvelopeKey,
        settings: TransportSettings,
        handle: RecordHandle,
        record: &WalletRecord,
    ) -> Self {
        Self::new(io, store, key, settings, TransportMode::ReadOnly, record.cards_written, Some(handle))
    }

    fn new(
        io: CardIo<'a, C, U>,
        store: &'a mut S,
        key: &'a EnvelopeKey,
        settings: TransportSettings,
        mode: TransportMode,
        targets: CardSet,
        handle: Option<RecordHandle>,
    ) -> Self {
        let first = targets.iter().next();
        let state = first.map_or(TransportState::Done, TransportState::Frontend);
        let card = first.unwrap_or(CardNumber(1));
        Self {
            io,
            store,
            key,
            settings,
            mode,
            targets,
            state,
            card,
            slot: None,
            handle,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Context of the card step in progress.
    pub fn slot(&self) -> Option<&CardSlot> {
        self.slot.as_ref()
    }

    pub fn handle(&self) -> Option<RecordHandle> {
        self.handle
    }

    /// Runs to `Done`, returning the record handle.
    pub fn run(
        &mut self,
        record: &mut WalletRecord,
        buffers: &mut ShareBuffers,
    ) -> Result<RecordHandle, TransportFailure> {
        loop {
            match self.step(record, buffers) {
                Ok(TransportState::Done) => {
                    return self.handle.ok_or(TransportFailure {
                        card: self.card,
                        error: FlowError::InputInvalid("no cards to transport"),
                        cards_written: record.cards_written,
                    })
                }
                Ok(_) => continue,
                Err(error) => {
                    return Err(TransportFailure {
                        card: self.card,
                        error,
                        cards_written: record.cards_written,
                    })
                }
            }
        }
    }

    /// Executes the current state once.
    pub fn step(
        &mut self,
        record: &mut WalletRecord,
        buffers: &mut ShareBuffers,
    ) -> Result<TransportState, FlowError> {
        let result = match self.state {
            TransportState::Frontend(k) => self.frontend(k),
            TransportState::Write(k) => self.write(k, record, buffers),
            TransportState::Readback(k) => self.readback(k, record, buffers),
            TransportState::Done => Ok(TransportState::Done),
            TransportState::Failed => Err(FlowError::InputInvalid("transport already failed")),
        };
        match result {
            Ok(next) => {
                if next != self.state {
                    log::info!("State transition: {:?} -> {:?}", self.state, next);
                }
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                log::error!("Card transport failed at {}: {}", self.card, e);
                self.state = TransportState::Failed;
                self.slot = None;
                Err(e)
            }
        }
    }

    fn frontend(&mut self, k: CardNumber) -> Result<TransportState, FlowError> {
        self.io.abort.check()?;
        self.card = k;
        self.slot = Some(CardSlot::new(k, self.settings.budget()));
        self.io.ui.notify(Notice::TapCard(k));
        Ok(match self.mode {
            TransportMode::Write => TransportState::Write(k),
            TransportMode::ReadOnly => TransportState::Readback(k),
        })
    }

    fn write(
        &mut self,
        k: CardNumber,
        record: &mut WalletRecord,
        buffers: &mut ShareBuffers,
    ) -> Result<TransportState, FlowError> {
        let share = buffers
            .outgoing
            .get(k.index())
            .filter(|s| !s.is_wiped() && s.x == k.get() && s.wallet_id == record.id)
            .ok_or(FlowError::InputInvalid("no sealed share for card"))?;

        self.io.abort.check()?;
        let result = self
            .io
            .present(CardSet::single(k), self.settings.timeout)
            .and_then(|card| self.io.cards.write_share(card, share));
        self.io.abort.check()?;

        match result {
            Ok(()) => {
                let mut updated = record.clone();
                updated.mark_written(k, share.envelope);
                self.persist(&updated)?;
                *record = updated;
                buffers.outgoing[k.index()].wipe();
                log::info!("Share written to {}", k);
                Ok(TransportState::Readback(k))
            }
            Err(e) => self.charge(k, e),
        }
    }

    fn readback(
        &mut self,
        k: CardNumber,
        record: &mut WalletRecord,
        buffers: &mut ShareBuffers,
    ) -> Result<TransportState, FlowError> {
        self.io.abort.check()?;
        let result = self
            .io
            .present(CardSet::single(k), self.settings.timeout)
            .and_then(|card| self.io.cards.read_share(card, &record.id));
        self.io.abort.check()?;

        match result {
            Ok(card_share) => {
                let share = open_card_share(self.key, record, k, &card_share)?;
                buffers.recovered.retain(|s| s.x != k.get());
                buffers.recovered.push(share);
                Ok(self.after(k))
            }
            Err(e) => self.charge(k, e),
        }
    }

    fn after(&self, k: CardNumber) -> TransportState {
        self.targets
            .iter()
            .find(|c| *c > k)
            .map_or(TransportState::Done, TransportState::Frontend)
    }

    /// Charges a failed attempt to the slot's budget; stays in the same state
    /// while the budget lasts.
    fn charge(&mut self, k: CardNumber, error: CardError) -> Result<TransportState, FlowError> {
        let slot = self
            .slot
            .as_mut()
            .ok_or(FlowError::InputInvalid("card step without slot"))?;
        slot.last_error = Some(error);
        slot.budget = slot.budget.charge(error)?;
        log::warn!(
            "{} attempt failed: {} (retries left {}, wrong-card left {})",
            k,
            FlowError::from(error),
            slot.budget.remaining,
            slot.budget.wrong_card_remaining
        );
        if let CardError::WrongCard { .. } = error {
            self.io.ui.notify(Notice::Failure(crate::error::UserMessage::WrongCard));
        }
        Ok(self.state)
    }

    fn persist(&mut self, record: &WalletRecord) -> Result<(), FlowError> {
        match self.handle {
            Some(handle) => self.store.update_wallet_record(handle, record)?,
            None => self.handle = Some(self.store.add_wallet_record(record)?),
        }
        Ok(())
    }
}

/// Checks a card's share against the stored record and opens it.
pub(crate) fn open_card_share(
    key: &EnvelopeKey,
    record: &WalletRecord,
    card: CardNumber,
    card_share: &CardShare,
) -> Result<Share, FlowError> {
    if card_share.wallet_id != record.id
        || card_share.x != card.get()
        || !record.cards_written.contains(card)
        || !card_share.envelope.ct_eq(record.envelope(card))
    {
        log::warn!("Envelope mismatch on {}", card);
        return Err(FlowError::CryptoVerificationFailed);
    }
    let y = key.open(&record.id.0, card.get(), card_share.ciphertext.as_bytes(), &card_share.envelope)?;
    Ok(Share::new(card.get(), y)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KdfParams;
    use crate::core::secret::Secret;
    use crate::entropy::OsEntropy;
    use crate::mpc::{SecretSharingScheme, Shamir};
    use crate::storage::record::{parse_name, WalletFlags, WalletId};
    use crate::storage::{MemoryStore, RecordStore, WalletState};
    use crate::testing::{ScriptedUi, SimCards};

    const ID: WalletId = WalletId([0x3C; 16]);

    struct Fixture {
        cards: SimCards,
        ui: ScriptedUi,
        abort: AbortSignal,
        store: RecordStore<MemoryStore>,
        key: EnvelopeKey,
        record: WalletRecord,
        buffers: ShareBuffers,
        secret: Secret,
    }

    fn fixture() -> Fixture {
        let key = EnvelopeKey::derive(None, &ID.0, &KdfParams { log_n: 4, r: 8, p: 1 }).unwrap();
        let secret = Secret::from_slice(&[0x77; 32]).unwrap();
        let shares = Shamir::default().split(secret.as_bytes(), &mut OsEntropy).unwrap();
        let outgoing = shares
            .iter()
            .map(|s| {
                let (ciphertext, envelope) = key.seal(&ID.0, s.x, s.y.as_bytes(), &mut OsEntropy).unwrap();
                CardShare { wallet_id: ID, x: s.x, ciphertext, envelope }
            })
            .collect();
        Fixture {
            cards: SimCards::new(),
            ui: ScriptedUi::default(),
            abort: AbortSignal::new(),
            store: RecordStore::new(MemoryStore::new(), 4),
            key,
            record: WalletRecord::new(ID, parse_name("w").unwrap(), WalletFlags::empty(), 24),
            buffers: ShareBuffers { outgoing, recovered: Vec::new() },
            secret,
        }
    }

    fn settings() -> TransportSettings {
        TransportSettings { retries: 5, wrong_card_limit: 10, timeout: Duration::from_millis(10) }
    }

    fn card(n: u8) -> CardNumber {
        CardNumber::new(n).unwrap()
    }

    #[test]
    fn writes_and_reads_back_all_cards() {
        let mut f = fixture();
        let handle = {
            let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
            let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
            t.run(&mut f.record, &mut f.buffers).unwrap()
        };
        assert_eq!(f.cards.written(), 5);
        assert_eq!(f.record.cards_written, CardSet::ALL);
        assert!(f.buffers.outgoing.iter().all(CardShare::is_wiped));
        assert_eq!(f.buffers.recovered.len(), 5);
        let rebuilt = Shamir::default().reconstruct(&f.buffers.recovered[..3]).unwrap();
        assert_eq!(rebuilt, f.secret);

        let stored = f.store.get_wallet_record(handle).unwrap();
        assert_eq!(stored.cards_written, CardSet::ALL);
        assert_eq!(stored.state, WalletState::Unverified);
        assert_eq!(stored.envelopes, f.record.envelopes);
    }

    #[test]
    fn four_recoverable_failures_then_success() {
        let mut f = fixture();
        f.cards.write_faults = vec![Some(CardError::Communication); 4].into();
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        assert!(t.run(&mut f.record, &mut f.buffers).is_ok());
        drop(t);
        assert_eq!(f.cards.write_count, 9);
    }

    #[test]
    fn five_recoverable_failures_are_fatal() {
        let mut f = fixture();
        f.cards.write_faults = vec![Some(CardError::Communication); 5].into();
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        let failure = t.run(&mut f.record, &mut f.buffers).unwrap_err();
        assert_eq!(t.state(), TransportState::Failed);
        assert_eq!(failure.error, FlowError::TransportFatal(CardError::Communication));
        assert_eq!(failure.card, card(1));
        assert!(failure.cards_written.is_empty());
        drop(t);
        assert_eq!(f.cards.write_count, 5);
        assert!(f.store.list().unwrap().is_empty());
    }

    #[test]
    fn wrong_card_does_not_consume_retries() {
        let mut f = fixture();
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        // card 1: frontend, write, readback
        for _ in 0..3 {
            t.step(&mut f.record, &mut f.buffers).unwrap();
        }
        assert_eq!(t.step(&mut f.record, &mut f.buffers), Ok(TransportState::Write(card(2))));

        // card 1 presented during card 2's write step
        t.io.cards.taps.push_back(Ok(1));
        assert_eq!(t.step(&mut f.record, &mut f.buffers), Ok(TransportState::Write(card(2))));
        let slot = *t.slot().unwrap();
        assert_eq!(slot.budget.remaining, 5);
        assert_eq!(slot.budget.wrong_card_remaining, 9);
        assert_eq!(slot.last_error, Some(CardError::WrongCard { presented: 1 }));

        assert_eq!(t.step(&mut f.record, &mut f.buffers), Ok(TransportState::Readback(card(2))));
        drop(t);
        // the rejected tap never reached the card
        assert_eq!(f.cards.write_count, 2);
        assert!(f.cards.stored[0].as_ref().map(|s| s.x) == Some(1));
    }

    #[test]
    fn applet_rejection_fails_without_retry() {
        let mut f = fixture();
        f.cards.write_faults = vec![None, Some(CardError::Applet(0x6985))].into();
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        let failure = t.run(&mut f.record, &mut f.buffers).unwrap_err();
        assert_eq!(failure.card, card(2));
        assert_eq!(failure.error, FlowError::TransportFatal(CardError::Applet(0x6985)));
        assert_eq!(failure.cards_written, CardSet::single(card(1)));
        drop(t);
        // card 1's record is kept
        assert_eq!(f.store.list().unwrap().len(), 1);
    }

    #[test]
    fn tampered_readback_fails_closed() {
        let mut f = fixture();
        f.cards.tamper = CardSet::single(card(3));
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        let failure = t.run(&mut f.record, &mut f.buffers).unwrap_err();
        assert_eq!(failure.card, card(3));
        assert_eq!(failure.error, FlowError::CryptoVerificationFailed);
    }

    #[test]
    fn abort_during_tap_unwinds() {
        let mut f = fixture();
        f.cards.abort_on_tap = Some((2, f.abort.clone()));
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
        let failure = t.run(&mut f.record, &mut f.buffers).unwrap_err();
        assert_eq!(failure.error, FlowError::Aborted);
    }

    #[test]
    fn reader_visits_written_cards_only() {
        let mut f = fixture();
        let handle = {
            let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
            let mut t = ShareTransport::writer(io, &mut f.store, &f.key, settings());
            t.run(&mut f.record, &mut f.buffers).unwrap()
        };
        f.buffers.clear();
        f.record.cards_written.remove(card(2));

        let reads_before = f.cards.read_count;
        let io = CardIo::new(&mut f.cards, &mut f.ui, &f.abort);
        let mut t = ShareTransport::reader(io, &mut f.store, &f.key, settings(), handle, &f.record);
        assert_eq!(t.mode(), TransportMode::ReadOnly);
        assert_eq!(t.run(&mut f.record, &mut f.buffers), Ok(handle));
        drop(t);
        assert_eq!(f.cards.read_count - reads_before, 4);
        assert!(f.buffers.recovered.iter().all(|s| s.x != 2));
    }
}
