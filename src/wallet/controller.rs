//! Wallet lifecycle controller.
//!
//! One flow runs at a time. Key wallets and data wallets share the card
//! pipeline: both split into five shares, seal one per card and check every
//! 3-card subset against the wallet id.
//!
//! One flow runs at a time. Each public operation resets the vault, walks
//! its step enum, and on the way out (success, error, cancel or abort)
//! wipes every secret buffer and shows at most one failure notice.

use std::time::Duration;

use zeroize::Zeroizing;

use super::credentials::hash_pin;
use super::flow::{
    DataWalletStep, FlowState, NewWalletStep, RestoreStep, RevealStep, SetupStep, SignStep, VerifyStep,
};
use super::mnemonic::{derive_seed, parse_word_count, secret_from_phrase};
use super::signer::{sign_digest, SignedDigest, DIGEST_LEN};
use super::vault::ShareVault;
use super::{subsets, wallet_id_for, wallet_id_of};
use crate::card::transport::CardIo;
use crate::card::{collect_shares, CardChannel, CardSet, CardShare, ShareTransport, TransportSettings, MAX_CARDS};
use crate::config::DeviceConfig;
use crate::core::secret::{Secret, SecretVec, SECRET_LEN};
use crate::crypto::constant_time_eq;
use crate::crypto::envelope::EnvelopeKey;
use crate::entropy::EntropySource;
use crate::error::{FlowError, UserMessage};
use crate::events::AbortSignal;
use crate::mpc::{SecretSharingScheme, Shamir, Share, MAX_PAYLOAD_LEN};
use crate::storage::record::parse_name;
use crate::storage::{
    RecordHandle, StorageError, WalletFlags, WalletId, WalletName, WalletRecord, WalletState, WalletStore,
};
use crate::ui::{Notice, StepDescriptor, UserEvent, UserInterface};

/// Words recorded for a freshly generated 32-byte secret.
const GENERATED_WORDS: u8 = 24;

/// A wallet created by the new-wallet, restore or data-wallet flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSummary {
    pub handle: RecordHandle,
    pub id: WalletId,
    pub name: WalletName,
    pub flags: WalletFlags,
    pub number_of_mnemonics: u8,
    pub state: WalletState,
}

/// User answer at a screen.
enum Answer {
    Yes,
    No,
    Text(Zeroizing<String>),
}

/// Where the step cursor goes after an answer.
enum Move {
    Next,
    Back,
    Stay,
}

/// Choices made in the setup prefix.
#[derive(Default)]
struct Draft {
    name: Option<WalletName>,
    flags: WalletFlags,
}

/// Steps shared by the tails of new-wallet and restore.
#[derive(Clone, Copy)]
enum Tail {
    CardTransport,
    VerifyShares,
    Success,
    Failed,
}

fn new_wallet_state(tail: Tail) -> FlowState {
    FlowState::NewWallet(match tail {
        Tail::CardTransport => NewWalletStep::CardTransport,
        Tail::VerifyShares => NewWalletStep::VerifyShares,
        Tail::Success => NewWalletStep::Success,
        Tail::Failed => NewWalletStep::Failed,
    })
}

fn restore_state(tail: Tail) -> FlowState {
    FlowState::Restore(match tail {
        Tail::CardTransport => RestoreStep::CardTransport,
        Tail::VerifyShares => RestoreStep::VerifyShares,
        Tail::Success => RestoreStep::Success,
        Tail::Failed => RestoreStep::Failed,
    })
}

fn data_wallet_state(tail: Tail) -> FlowState {
    FlowState::DataWallet(match tail {
        Tail::CardTransport => DataWalletStep::CardTransport,
        Tail::VerifyShares => DataWalletStep::VerifyShares,
        Tail::Success => DataWalletStep::Success,
        Tail::Failed => DataWalletStep::Failed,
    })
}

pub struct WalletController<U, C, S, R>
where
    U: UserInterface,
    C: CardChannel,
    S: WalletStore,
    R: EntropySource,
{
    config: DeviceConfig,
    scheme: Shamir,
    ui: U,
    cards: C,
    store: S,
    rng: R,
    abort: AbortSignal,
    flow: FlowState,
    vault: ShareVault,
    /// Overrides the generic failure notice for the running flow.
    failure_message: Option<UserMessage>,
}

impl<U, C, S, R> WalletController<U, C, S, R>
where
    U: UserInterface,
    C: CardChannel,
    S: WalletStore,
    R: EntropySource,
{
    pub fn new(config: DeviceConfig, ui: U, cards: C, store: S, rng: R, abort: AbortSignal) -> Result<Self, FlowError> {
        if usize::from(config.share_count) != MAX_CARDS {
            return Err(FlowError::InputInvalid("share count must match the card set"));
        }
        let scheme = Shamir::new(config.share_count, config.threshold)?;
        Ok(Self {
            config,
            scheme,
            ui,
            cards,
            store,
            rng,
            abort,
            flow: FlowState::Idle,
            vault: ShareVault::new(),
            failure_message: None,
        })
    }

    pub fn flow(&self) -> FlowState {
        self.flow
    }

    /// Scratch buffers of the last flow. All-zero once a flow has returned.
    pub fn vault(&self) -> &ShareVault {
        &self.vault
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handle for the event-polling side.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Generates a wallet, writes its shares to all five cards and checks
    /// them back.
    pub fn new_wallet(&mut self) -> Result<WalletSummary, FlowError> {
        self.begin("new wallet");
        let result = self.run_new_wallet();
        self.finish(result)
    }

    /// Recreates a wallet from its BIP-39 mnemonic onto a fresh card set.
    pub fn restore_wallet(&mut self) -> Result<WalletSummary, FlowError> {
        self.begin("restore wallet");
        let result = self.run_restore();
        self.finish(result)
    }

    /// Splits a typed payload across all five cards instead of a wallet
    /// secret. The record carries `HAS_ARBITRARY_DATA` and no mnemonic.
    pub fn new_data_wallet(&mut self) -> Result<WalletSummary, FlowError> {
        self.begin("data wallet");
        let result = self.run_data_wallet();
        self.finish(result)
    }

    /// Rebuilds the payload of data wallet `name` from any three cards.
    pub fn reveal_data(&mut self, name: &str) -> Result<SecretVec, FlowError> {
        self.begin("reveal data");
        let result = self.run_reveal(name);
        self.finish(result)
    }

    /// Reads every card of `name` and checks each 3-card subset. Updates
    /// and returns the record state.
    pub fn verify_wallet(&mut self, name: &str) -> Result<WalletState, FlowError> {
        self.begin("verify wallet");
        let result = self.run_verify(name);
        self.finish(result)
    }

    /// Unlocks `name` with any three of its cards and signs `digest`.
    pub fn sign_digest(&mut self, name: &str, digest: &[u8; DIGEST_LEN]) -> Result<SignedDigest, FlowError> {
        self.begin("sign digest");
        let result = self.run_sign(name, digest);
        self.finish(result)
    }

    fn run_new_wallet(&mut self) -> Result<WalletSummary, FlowError> {
        self.ensure_capacity()?;
        let mut draft = Draft::default();
        self.run_setup(&mut draft, SetupStep::NameInput, |s| {
            FlowState::NewWallet(NewWalletStep::Setup(s))
        })?;

        self.enter(FlowState::NewWallet(NewWalletStep::Generate));
        self.abort.check()?;
        let mut entropy = Zeroizing::new([0u8; SECRET_LEN]);
        self.rng
            .fill(&mut *entropy)
            .map_err(|_| FlowError::InputInvalid("entropy unavailable"))?;
        self.vault.secret = Secret::take(&mut entropy);

        let (record, key) = self.prepare_shares(&draft, GENERATED_WORDS)?;
        self.write_and_verify(record, &key, new_wallet_state)
    }

    fn run_restore(&mut self) -> Result<WalletSummary, FlowError> {
        self.ensure_capacity()?;
        let mut draft = Draft::default();
        let mut from = SetupStep::NameInput;
        let words = loop {
            self.run_setup(&mut draft, from, |s| FlowState::Restore(RestoreStep::Setup(s)))?;
            match self.run_mnemonic_input(draft.flags)? {
                Some(words) => break words,
                None => from = SetupStep::PassphraseChoice,
            }
        };

        self.enter(FlowState::Restore(RestoreStep::Derive));
        self.abort.check()?;
        let (record, key) = self.prepare_shares(&draft, words)?;
        self.write_and_verify(record, &key, restore_state)
    }

    fn run_data_wallet(&mut self) -> Result<WalletSummary, FlowError> {
        self.ensure_capacity()?;
        let mut draft = Draft { name: None, flags: WalletFlags::HAS_ARBITRARY_DATA };
        let mut from = SetupStep::NameInput;
        while !self.run_data_input(&mut draft, from)? {
            from = SetupStep::reentry(draft.flags);
        }

        self.enter(FlowState::DataWallet(DataWalletStep::Split));
        self.abort.check()?;
        let (record, key) = self.prepare_shares(&draft, 0)?;
        self.write_and_verify(record, &key, data_wallet_state)
    }

    /// Setup from `from`, then payload entry. `false` when the user backs
    /// out of the payload screen.
    fn run_data_input(&mut self, draft: &mut Draft, from: SetupStep) -> Result<bool, FlowError> {
        self.run_setup(draft, from, |s| FlowState::DataWallet(DataWalletStep::Setup(s)))?;
        let step = DataWalletStep::DataInput;
        self.enter(FlowState::DataWallet(step));
        let descriptor = step.descriptor().ok_or(FlowError::InputInvalid("no payload screen"))?;
        loop {
            match self.ask(&descriptor, self.config.timeouts.text_input)? {
                Answer::Text(text) if text.is_empty() || text.len() > MAX_PAYLOAD_LEN => {
                    self.reject(&descriptor, FlowError::InputInvalid("payload length"));
                }
                Answer::Text(text) => {
                    self.vault.data = SecretVec::from_slice(text.as_bytes());
                    return Ok(true);
                }
                Answer::No => return Ok(false),
                Answer::Yes => {
                    self.reject(&descriptor, FlowError::InputInvalid("expected text"));
                }
            }
        }
    }

    /// Word count and mnemonic entry. `None` when the user backs out of
    /// the word count.
    fn run_mnemonic_input(&mut self, flags: WalletFlags) -> Result<Option<u8>, FlowError> {
        let mut step = RestoreStep::WordCount;
        let mut words = 0u8;
        loop {
            self.enter(FlowState::Restore(step));
            let descriptor = match step.descriptor() {
                Some(d) => d,
                None => return Ok(Some(words)),
            };
            let moved = match (step, self.ask(&descriptor, self.config.timeouts.text_input)?) {
                (RestoreStep::WordCount, Answer::Text(text)) => match parse_word_count(&text) {
                    Ok(w) => {
                        words = w;
                        Move::Next
                    }
                    Err(e) => self.reject(&descriptor, e),
                },
                (RestoreStep::MnemonicInput, Answer::Text(text)) => match secret_from_phrase(&text, words) {
                    Ok(secret) => {
                        self.vault.secret = secret;
                        Move::Next
                    }
                    Err(e) => self.reject(&descriptor, e),
                },
                (_, Answer::No) => Move::Back,
                _ => self.reject(&descriptor, FlowError::InputInvalid("expected text")),
            };
            step = match moved {
                Move::Next => step.next(flags).ok_or(FlowError::InputInvalid("restore ended early"))?,
                Move::Back => match step.back(flags) {
                    Some(RestoreStep::Setup(_)) | None => return Ok(None),
                    Some(prev) => prev,
                },
                Move::Stay => step,
            };
        }
    }

    /// Runs the name, PIN and passphrase steps from `from` onwards.
    fn run_setup(
        &mut self,
        draft: &mut Draft,
        from: SetupStep,
        at: fn(SetupStep) -> FlowState,
    ) -> Result<(), FlowError> {
        let mut step = from;
        loop {
            self.enter(at(step));
            let descriptor = step.descriptor();
            let moved = match (step, self.ask(&descriptor, step.timeout(&self.config.timeouts))?) {
                (SetupStep::NameInput, Answer::Text(text)) => match self.check_name(&text) {
                    Ok(name) => {
                        draft.name = Some(name);
                        Move::Next
                    }
                    Err(e) => self.reject(&descriptor, e),
                },
                (SetupStep::NameConfirm, Answer::Yes) => Move::Next,
                (SetupStep::PinChoice, Answer::Yes) => {
                    draft.flags.insert(WalletFlags::HAS_PIN);
                    Move::Next
                }
                (SetupStep::PinChoice, Answer::No) => {
                    draft.flags.remove(WalletFlags::HAS_PIN);
                    self.vault.pin.wipe();
                    self.vault.pin_entry.wipe();
                    Move::Next
                }
                (SetupStep::PinInput, Answer::Text(text)) => match hash_pin(&text) {
                    Ok(hash) => {
                        self.vault.pin_entry = hash;
                        Move::Next
                    }
                    Err(e) => self.reject(&descriptor, e),
                },
                (SetupStep::PinConfirm, Answer::Text(text)) => match hash_pin(&text) {
                    Ok(hash) if constant_time_eq(hash.as_bytes(), self.vault.pin_entry.as_bytes()) => {
                        self.vault.pin = hash;
                        self.vault.pin_entry.wipe();
                        Move::Next
                    }
                    _ => {
                        log::warn!("PIN confirmation mismatch");
                        self.ui.notify(Notice::Failure(UserMessage::IncorrectPin));
                        Move::Back
                    }
                },
                (SetupStep::PassphraseChoice, Answer::Yes) => {
                    draft.flags.insert(WalletFlags::HAS_PASSPHRASE);
                    Move::Next
                }
                (SetupStep::PassphraseChoice, Answer::No) => {
                    draft.flags.remove(WalletFlags::HAS_PASSPHRASE);
                    Move::Next
                }
                (_, Answer::No) => Move::Back,
                _ => self.reject(&descriptor, FlowError::InputInvalid("unexpected input")),
            };
            step = match moved {
                Move::Next => match step.next(draft.flags) {
                    Some(next) => next,
                    None => break,
                },
                Move::Back => {
                    if matches!(step, SetupStep::PinInput | SetupStep::PinConfirm) {
                        self.vault.pin.wipe();
                        self.vault.pin_entry.wipe();
                    }
                    step.back(draft.flags).ok_or(FlowError::Cancelled)?
                }
                Move::Stay => step,
            };
        }
        if draft.name.is_none() {
            return Err(FlowError::InputInvalid("no wallet name"));
        }
        Ok(())
    }

    fn run_verify(&mut self, name: &str) -> Result<WalletState, FlowError> {
        let (handle, mut record) = self.store.get_wallet_record_by_name(name)?;
        if record.cards_written != CardSet::ALL {
            return Err(FlowError::InputInvalid("wallet has unwritten cards"));
        }

        let mut step = VerifyStep::first(record.flags);
        if let Some(descriptor) = step.descriptor() {
            self.enter(FlowState::Verify(step));
            self.prompt_pin(&descriptor)?;
            step = VerifyStep::CardReadback;
        }

        self.enter(FlowState::Verify(step));
        let key = self.envelope_key(&record)?;
        let settings = TransportSettings::from(&self.config);
        let read = {
            let io = CardIo::new(&mut self.cards, &mut self.ui, &self.abort);
            ShareTransport::reader(io, &mut self.store, &key, settings, handle, &record)
                .run(&mut record, &mut self.vault.cards)
        };
        if let Err(failure) = read {
            return Err(self.credential_failure(&record, failure.error));
        }

        self.enter(FlowState::Verify(VerifyStep::Reconstruct));
        let verified = self.verify_subsets(&record.id);
        record.state = if verified.is_ok() { WalletState::Valid } else { WalletState::Invalid };
        self.store.update_wallet_record(handle, &record)?;
        verified?;

        self.enter(FlowState::Verify(VerifyStep::Success));
        self.ui.notify(Notice::Success("wallet verified"));
        Ok(record.state)
    }

    fn run_sign(&mut self, name: &str, digest: &[u8; DIGEST_LEN]) -> Result<SignedDigest, FlowError> {
        let (_, record) = self.store.get_wallet_record_by_name(name)?;
        if record.has_arbitrary_data() {
            return Err(FlowError::InputInvalid("data wallets hold no signing key"));
        }
        let flags = record.flags;

        let mut step = SignStep::first(flags);
        while let Some(descriptor) = step.descriptor() {
            self.enter(FlowState::Sign(step));
            let moved = match (step, self.ask(&descriptor, self.config.timeouts.text_input)?) {
                (SignStep::PinInput, Answer::Text(text)) => match hash_pin(&text) {
                    Ok(hash) => {
                        self.vault.pin = hash;
                        Move::Next
                    }
                    Err(e) => self.reject(&descriptor, e),
                },
                (SignStep::PassphraseInput, Answer::Text(text)) => match self.vault.passphrase.set(&text) {
                    Ok(()) => Move::Next,
                    Err(e) => self.reject(&descriptor, e),
                },
                (_, Answer::No) => Move::Back,
                _ => self.reject(&descriptor, FlowError::InputInvalid("expected text")),
            };
            step = match moved {
                Move::Next => step.next(flags).ok_or(FlowError::InputInvalid("sign ended early"))?,
                Move::Back => {
                    self.vault.pin.wipe();
                    self.vault.passphrase.wipe();
                    step.back(flags).ok_or(FlowError::Cancelled)?
                }
                Move::Stay => step,
            };
        }

        self.enter(FlowState::Sign(SignStep::Collect));
        self.collect_threshold(&record)?;

        self.enter(FlowState::Sign(SignStep::Derive));
        self.vault.secret = self.scheme.reconstruct(&self.vault.cards.recovered)?;
        self.vault.cards.wipe();
        if !constant_time_eq(wallet_id_for(&self.vault.secret).as_bytes(), record.id.as_bytes()) {
            log::error!("Reconstructed secret does not match wallet {:?}", record.id);
            return Err(FlowError::CryptoVerificationFailed);
        }
        self.vault.seed = derive_seed(
            &self.vault.secret,
            record.number_of_mnemonics,
            self.vault.passphrase.as_str(),
        )?;
        self.vault.secret.wipe();
        self.vault.passphrase.wipe();

        self.enter(FlowState::Sign(SignStep::Sign));
        let signed = sign_digest(&self.vault.seed, digest);
        self.vault.seed.wipe();

        self.enter(FlowState::Sign(SignStep::Done));
        Ok(signed)
    }

    fn run_reveal(&mut self, name: &str) -> Result<SecretVec, FlowError> {
        let (_, record) = self.store.get_wallet_record_by_name(name)?;
        if !record.has_arbitrary_data() {
            return Err(FlowError::InputInvalid("not a data wallet"));
        }

        let step = RevealStep::first(record.flags);
        if let Some(descriptor) = step.descriptor() {
            self.enter(FlowState::Reveal(step));
            self.prompt_pin(&descriptor)?;
        }

        self.enter(FlowState::Reveal(RevealStep::Collect));
        self.collect_threshold(&record)?;

        self.enter(FlowState::Reveal(RevealStep::Reconstruct));
        self.vault.data = self.scheme.reconstruct_payload(&self.vault.cards.recovered)?;
        self.vault.cards.wipe();
        if !constant_time_eq(wallet_id_of(self.vault.data.as_bytes()).as_bytes(), record.id.as_bytes()) {
            log::error!("Reconstructed payload does not match wallet {:?}", record.id);
            return Err(FlowError::CryptoVerificationFailed);
        }
        let payload = std::mem::take(&mut self.vault.data);

        self.enter(FlowState::Reveal(RevealStep::Done));
        log::info!("Revealed {} byte payload of wallet {:?}", payload.len(), record.id);
        Ok(payload)
    }

    /// Reads any threshold-many written cards of `record` into the vault.
    fn collect_threshold(&mut self, record: &WalletRecord) -> Result<(), FlowError> {
        let key = self.envelope_key(record)?;
        let settings = TransportSettings::from(&self.config);
        let collected = {
            let mut io = CardIo::new(&mut self.cards, &mut self.ui, &self.abort);
            collect_shares(
                &mut io,
                &key,
                record,
                self.scheme.threshold(),
                &settings,
                &mut self.vault.cards.recovered,
            )
        };
        collected.map_err(|e| self.credential_failure(record, e))
    }

    /// Splits the vault secret, or the payload of a data wallet, and seals
    /// one share per card. The split input and the plaintext shares are
    /// wiped before returning.
    fn prepare_shares(&mut self, draft: &Draft, words: u8) -> Result<(WalletRecord, EnvelopeKey), FlowError> {
        let name = draft.name.clone().ok_or(FlowError::InputInvalid("no wallet name"))?;
        let data = draft.flags.contains(WalletFlags::HAS_ARBITRARY_DATA);
        let id = if data {
            wallet_id_of(self.vault.data.as_bytes())
        } else {
            wallet_id_for(&self.vault.secret)
        };
        if self.store.list()?.iter().any(|(_, r)| r.id == id) {
            return Err(FlowError::InputInvalid("wallet already exists"));
        }

        let pin = draft.flags.contains(WalletFlags::HAS_PIN).then(|| self.vault.pin.as_bytes());
        let key = EnvelopeKey::derive(pin, &id.0, &self.config.pin_kdf)?;

        self.vault.shares = if data {
            self.scheme.split_payload(self.vault.data.as_bytes(), &mut self.rng)?
        } else {
            self.scheme.split(self.vault.secret.as_bytes(), &mut self.rng)?
        };
        self.vault.secret.wipe();
        self.vault.data.wipe();

        for share in &self.vault.shares {
            let (ciphertext, envelope) = key.seal(&id.0, share.x, share.y.as_bytes(), &mut self.rng)?;
            self.vault.cards.outgoing.push(CardShare { wallet_id: id, x: share.x, ciphertext, envelope });
        }
        self.vault.shares.iter_mut().for_each(Share::wipe);
        log::info!("Prepared {} sealed shares for wallet {:?}", self.vault.cards.outgoing.len(), id);

        Ok((WalletRecord::new(id, name, draft.flags, words), key))
    }

    /// Card transport and the 3-subset check shared by every creation flow.
    fn write_and_verify(
        &mut self,
        mut record: WalletRecord,
        key: &EnvelopeKey,
        at: fn(Tail) -> FlowState,
    ) -> Result<WalletSummary, FlowError> {
        let prepared = &self.vault.cards.outgoing;
        if prepared.len() != MAX_CARDS
            || prepared.iter().any(CardShare::is_wiped)
            || !self.vault.secret.is_wiped()
            || !self.vault.data.is_wiped()
        {
            return Err(FlowError::InputInvalid("shares not prepared"));
        }

        self.enter(at(Tail::CardTransport));
        let settings = TransportSettings::from(&self.config);
        let written = {
            let io = CardIo::new(&mut self.cards, &mut self.ui, &self.abort);
            ShareTransport::writer(io, &mut self.store, key, settings).run(&mut record, &mut self.vault.cards)
        };
        let handle = match written {
            Ok(handle) => handle,
            Err(failure) => {
                if !failure.cards_written.is_empty() {
                    log::error!(
                        "Wallet creation failed at {} with {} card(s) written",
                        failure.card,
                        failure.cards_written.len()
                    );
                    self.failure_message = Some(UserMessage::CreationFailed);
                    self.enter(at(Tail::Failed));
                }
                return Err(failure.error);
            }
        };

        self.enter(at(Tail::VerifyShares));
        let verified = self.verify_subsets(&record.id);
        record.state = if verified.is_ok() { WalletState::Valid } else { WalletState::Invalid };
        self.store.update_wallet_record(handle, &record)?;
        if let Err(e) = verified {
            self.failure_message = Some(UserMessage::CreationFailed);
            self.enter(at(Tail::Failed));
            return Err(e);
        }

        self.enter(at(Tail::Success));
        self.ui.notify(Notice::Success("wallet created"));
        Ok(WalletSummary {
            handle,
            id: record.id,
            name: record.name,
            flags: record.flags,
            number_of_mnemonics: record.number_of_mnemonics,
            state: record.state,
        })
    }

    /// Reconstructs from every threshold-sized subset of the recovered
    /// shares; each must reproduce `id`. Works on the raw share bytes, so
    /// key and data wallets take the same path.
    fn verify_subsets(&self, id: &WalletId) -> Result<(), FlowError> {
        let shares = &self.vault.cards.recovered;
        if shares.len() != usize::from(self.scheme.share_count()) {
            return Err(FlowError::ResourceExhausted);
        }
        for subset in subsets(shares.len(), usize::from(self.scheme.threshold())) {
            let picked: Vec<Share> = subset.iter().map(|&i| shares[i].clone()).collect();
            let rebuilt = self.scheme.reconstruct_payload(&picked)?;
            if !constant_time_eq(wallet_id_of(rebuilt.as_bytes()).as_bytes(), id.as_bytes()) {
                log::error!("Share subset {:?} does not reproduce wallet {:?}", subset, id);
                return Err(FlowError::CryptoVerificationFailed);
            }
        }
        log::info!("All share subsets reproduce wallet {:?}", id);
        Ok(())
    }

    fn envelope_key(&self, record: &WalletRecord) -> Result<EnvelopeKey, FlowError> {
        let pin = record.has_pin().then(|| self.vault.pin.as_bytes());
        Ok(EnvelopeKey::derive(pin, &record.id.0, &self.config.pin_kdf)?)
    }

    /// A PIN wallet's envelopes fail to open under a wrong PIN.
    fn credential_failure(&mut self, record: &WalletRecord, error: FlowError) -> FlowError {
        if error == FlowError::CryptoVerificationFailed && record.has_pin() {
            self.failure_message = Some(UserMessage::IncorrectPin);
        }
        error
    }

    fn check_name(&self, raw: &str) -> Result<WalletName, FlowError> {
        let name = parse_name(raw).map_err(|_| FlowError::InputInvalid("wallet name"))?;
        match self.store.get_wallet_record_by_name(&name) {
            Ok(_) => Err(FlowError::Storage(StorageError::DuplicateName)),
            Err(StorageError::NotFound) => Ok(name),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_capacity(&self) -> Result<(), FlowError> {
        if self.store.list()?.len() >= self.config.max_wallets {
            return Err(FlowError::Storage(StorageError::Full));
        }
        Ok(())
    }

    /// PIN entry as the first step of a flow; Cancel ends the flow.
    fn prompt_pin(&mut self, descriptor: &StepDescriptor) -> Result<(), FlowError> {
        loop {
            match self.ask(descriptor, self.config.timeouts.text_input)? {
                Answer::Text(text) => match hash_pin(&text) {
                    Ok(hash) => {
                        self.vault.pin = hash;
                        return Ok(());
                    }
                    Err(e) => {
                        self.reject(descriptor, e);
                    }
                },
                Answer::No => return Err(FlowError::Cancelled),
                Answer::Yes => {
                    self.reject(descriptor, FlowError::InputInvalid("expected PIN"));
                }
            }
        }
    }

    /// Shows a step and waits, checking the abort signal either side.
    fn ask(&mut self, step: &StepDescriptor, timeout: Duration) -> Result<Answer, FlowError> {
        self.abort.check()?;
        let event = self.ui.show(step, timeout);
        self.abort.check()?;
        match event {
            UserEvent::Confirm => Ok(Answer::Yes),
            UserEvent::Cancel => Ok(Answer::No),
            UserEvent::TextInput(text) => Ok(Answer::Text(text)),
            UserEvent::Timeout => {
                log::warn!("No input at {} within {:?}", step.name, timeout);
                Err(FlowError::InputTimeout)
            }
        }
    }

    fn reject(&mut self, step: &StepDescriptor, error: FlowError) -> Move {
        log::warn!("Rejected input at {}: {}", step.name, error);
        self.ui.notify(Notice::Failure(error.user_message()));
        Move::Stay
    }

    fn enter(&mut self, next: FlowState) {
        if next != self.flow {
            log::info!("State transition: {:?} -> {:?}", self.flow, next);
        }
        self.flow = next;
    }

    fn begin(&mut self, name: &str) {
        log::info!("Starting {} flow", name);
        self.vault.reset();
        self.failure_message = None;
        self.flow = FlowState::Idle;
    }

    /// Common exit: wipe, then report.
    fn finish<T>(&mut self, result: Result<T, FlowError>) -> Result<T, FlowError> {
        self.vault.wipe();
        let message = self.failure_message.take();
        if let Err(e) = &result {
            if e.is_silent() {
                log::info!("Flow ended: {}", e);
                if !self.flow.is_terminal() {
                    self.enter(FlowState::Cancelled);
                }
            } else {
                log::error!("Flow failed in {:?}: {}", self.flow, e);
                self.ui.notify(Notice::Failure(message.unwrap_or_else(|| e.user_message())));
                let failed = self.flow.failed();
                self.enter(failed);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::{CardError, CardNumber};
    use crate::crypto::verify_signature;
    use crate::storage::{MemoryStore, RecordStore};
    use crate::testing::{text, CountingEntropy, ScriptedUi, SimCards};
    use crate::wallet::mnemonic;
    use crate::wallet::signer;

    type Controller = WalletController<ScriptedUi, SimCards, RecordStore<MemoryStore>, CountingEntropy>;

    const ABANDON_12: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn controller() -> Controller {
        WalletController::new(
            DeviceConfig::fast(),
            ScriptedUi::default(),
            SimCards::new(),
            RecordStore::new(MemoryStore::new(), 4),
            CountingEntropy::new(1),
            AbortSignal::new(),
        )
        .unwrap()
    }

    fn script(c: &mut Controller, events: Vec<UserEvent>) {
        c.ui.events = events.into();
    }

    fn setup_events(name: &str, pin: Option<&str>, passphrase: bool) -> Vec<UserEvent> {
        let mut events = vec![text(name), UserEvent::Confirm];
        match pin {
            Some(p) => events.extend([UserEvent::Confirm, text(p), text(p)]),
            None => events.push(UserEvent::Cancel),
        }
        events.push(if passphrase { UserEvent::Confirm } else { UserEvent::Cancel });
        events
    }

    fn create(c: &mut Controller, name: &str, pin: Option<&str>, passphrase: bool) -> WalletSummary {
        script(c, setup_events(name, pin, passphrase));
        c.new_wallet().unwrap()
    }

    fn data_events(name: &str, pin: Option<&str>, payload: &str) -> Vec<UserEvent> {
        let mut events = vec![text(name), UserEvent::Confirm];
        match pin {
            Some(p) => events.extend([UserEvent::Confirm, text(p), text(p)]),
            None => events.push(UserEvent::Cancel),
        }
        events.push(text(payload));
        events
    }

    fn failures(c: &Controller) -> Vec<UserMessage> {
        c.ui.notices
            .iter()
            .filter_map(|n| match n {
                Notice::Failure(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn new_wallet_writes_and_verifies_all_cards() {
        let mut c = controller();
        let summary = create(&mut c, "main", None, false);

        assert_eq!(summary.state, WalletState::Valid);
        assert_eq!(summary.number_of_mnemonics, 24);
        assert_eq!(summary.name.as_str(), "main");
        assert_eq!(c.cards.written(), 5);
        assert_eq!(c.flow(), FlowState::NewWallet(NewWalletStep::Success));

        let (_, record) = c.store().get_wallet_record_by_name("main").unwrap();
        assert_eq!(record.cards_written, CardSet::ALL);
        assert_eq!(record.state, WalletState::Valid);
        assert!(c.vault().is_wiped());
        assert!(failures(&c).is_empty());
        assert!(c.ui.notices.contains(&Notice::Success("wallet created")));
        // generated secret is counter bytes 1..=32
        assert_eq!(summary.id, wallet_id_for(&Secret::from_slice(&(1..=32).collect::<Vec<u8>>()).unwrap()));
    }

    #[test]
    fn pin_steps_are_skipped_without_pin() {
        let mut c = controller();
        create(&mut c, "nopin", None, false);
        assert!(!c.ui.shown.contains(&"setup.pin_input"));

        let mut c = controller();
        let summary = create(&mut c, "pinned", Some("1234"), false);
        assert!(summary.flags.contains(WalletFlags::HAS_PIN));
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "setup.pin_input").count(), 1);
    }

    #[test]
    fn pin_mismatch_returns_to_pin_entry() {
        let mut c = controller();
        script(
            &mut c,
            vec![
                text("w"),
                UserEvent::Confirm,
                UserEvent::Confirm,
                text("1234"),
                text("4321"),
                text("1234"),
                text("1234"),
                UserEvent::Cancel,
            ],
        );
        c.new_wallet().unwrap();
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "setup.pin_input").count(), 2);
        assert_eq!(failures(&c), vec![UserMessage::IncorrectPin]);
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn cancel_on_first_step_ends_quietly() {
        let mut c = controller();
        script(&mut c, vec![UserEvent::Cancel]);
        assert_eq!(c.new_wallet(), Err(FlowError::Cancelled));
        assert_eq!(c.flow(), FlowState::Cancelled);
        assert!(c.ui.notices.is_empty());
        assert!(c.store().list().unwrap().is_empty());
    }

    #[test]
    fn cancel_steps_back_one_screen() {
        let mut c = controller();
        script(
            &mut c,
            vec![
                text("first"),
                UserEvent::Cancel,
                text("second"),
                UserEvent::Confirm,
                UserEvent::Cancel,
                UserEvent::Cancel,
            ],
        );
        let summary = c.new_wallet().unwrap();
        assert_eq!(summary.name.as_str(), "second");
        assert_eq!(c.ui.shown[..3], ["setup.name_input", "setup.name_confirm", "setup.name_input"]);
    }

    #[test]
    fn backing_out_of_pin_entry_wipes_it() {
        let mut c = controller();
        script(
            &mut c,
            vec![
                text("w"),
                UserEvent::Confirm,
                UserEvent::Confirm,
                text("1234"),
                UserEvent::Cancel,
            ],
        );
        // pin_confirm -> pin_input -> timeout
        assert_eq!(c.new_wallet(), Err(FlowError::InputTimeout));
        assert!(c.vault().is_wiped());
        assert_eq!(c.flow(), FlowState::NewWallet(NewWalletStep::Failed));
        assert_eq!(failures(&c), vec![UserMessage::SomethingWentWrong]);
    }

    #[test]
    fn duplicate_name_is_reprompted() {
        let mut c = controller();
        create(&mut c, "main", None, false);
        script(
            &mut c,
            vec![text("main"), text("spare"), UserEvent::Confirm, UserEvent::Cancel, UserEvent::Cancel],
        );
        let summary = c.new_wallet().unwrap();
        assert_eq!(summary.name.as_str(), "spare");
        assert_eq!(c.store().list().unwrap().len(), 2);
    }

    #[test]
    fn full_storage_refuses_new_wallet() {
        let mut c = controller();
        c.config.max_wallets = 1;
        create(&mut c, "only", None, false);
        script(&mut c, setup_events("more", None, false));
        assert_eq!(c.new_wallet(), Err(FlowError::Storage(StorageError::Full)));
    }

    #[test]
    fn aborted_new_wallet_leaves_zeroed_buffers() {
        let mut c = controller();
        script(&mut c, setup_events("w", Some("1234"), true));
        // third tap is card 2's write
        c.cards.abort_on_tap = Some((3, c.abort_signal()));

        assert_eq!(c.new_wallet(), Err(FlowError::Aborted));
        assert!(c.vault().is_wiped());
        // the buffers are still there to inspect
        assert_eq!(c.vault().shares().len(), 5);
        assert_eq!(c.vault().share_buffers().outgoing.len(), 5);
        assert!(c.vault().share_buffers().recovered.iter().all(Share::is_wiped));

        assert_eq!(c.flow(), FlowState::NewWallet(NewWalletStep::Failed));
        assert!(failures(&c).is_empty());
        let (_, record) = c.store().get_wallet_record_by_name("w").unwrap();
        assert_eq!(record.cards_written, CardSet::single(CardNumber::new(1).unwrap()));
        assert_eq!(record.state, WalletState::Unverified);
    }

    #[test]
    fn abort_before_any_card_cancels() {
        let mut c = controller();
        script(&mut c, setup_events("w", None, false));
        c.ui.abort_on_step = Some(("setup.name_confirm", c.abort_signal()));
        assert_eq!(c.new_wallet(), Err(FlowError::Aborted));
        assert_eq!(c.flow(), FlowState::Cancelled);
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn card_failure_after_first_write_reports_creation_failed() {
        let mut c = controller();
        script(&mut c, setup_events("w", None, false));
        c.cards.write_faults = vec![None, Some(CardError::Applet(0x6985))].into();

        assert_eq!(c.new_wallet(), Err(FlowError::TransportFatal(CardError::Applet(0x6985))));
        assert_eq!(failures(&c), vec![UserMessage::CreationFailed]);
        assert_eq!(c.flow(), FlowState::NewWallet(NewWalletStep::Failed));
        assert!(c.vault().is_wiped());
        assert_eq!(c.store().list().unwrap().len(), 1);
    }

    #[test]
    fn card_failure_before_any_write_is_generic() {
        let mut c = controller();
        script(&mut c, setup_events("w", None, false));
        c.cards.write_faults = vec![Some(CardError::Applet(0x6985))].into();
        assert!(c.new_wallet().is_err());
        assert_eq!(failures(&c), vec![UserMessage::SomethingWentWrong]);
        assert!(c.store().list().unwrap().is_empty());
    }

    #[test]
    fn verify_with_pin() {
        let mut c = controller();
        create(&mut c, "w", Some("2468"), false);

        script(&mut c, vec![text("2468")]);
        assert_eq!(c.verify_wallet("w"), Ok(WalletState::Valid));
        assert_eq!(c.flow(), FlowState::Verify(VerifyStep::Success));
        assert!(c.vault().is_wiped());

        script(&mut c, vec![text("1357")]);
        assert_eq!(c.verify_wallet("w"), Err(FlowError::CryptoVerificationFailed));
        assert_eq!(failures(&c), vec![UserMessage::IncorrectPin]);
        assert_eq!(c.flow(), FlowState::Verify(VerifyStep::Failed));
        // a wrong PIN says nothing about the cards
        let (_, record) = c.store().get_wallet_record_by_name("w").unwrap();
        assert_eq!(record.state, WalletState::Valid);
    }

    #[test]
    fn verify_unknown_wallet() {
        let mut c = controller();
        assert_eq!(
            c.verify_wallet("ghost"),
            Err(FlowError::Storage(StorageError::NotFound))
        );
    }

    #[test]
    fn inconsistent_shares_fail_subset_check() {
        let mut c = controller();
        let secret = Secret::from_slice(&[0x42; 32]).unwrap();
        let id = wallet_id_for(&secret);
        c.vault.cards.recovered = Shamir::default().split(secret.as_bytes(), &mut c.rng).unwrap();
        assert_eq!(c.verify_subsets(&id), Ok(()));

        c.vault.cards.recovered[4].y.as_mut_bytes()[0] ^= 1;
        assert_eq!(c.verify_subsets(&id), Err(FlowError::CryptoVerificationFailed));
        c.vault.cards.recovered.pop();
        assert_eq!(c.verify_subsets(&id), Err(FlowError::ResourceExhausted));
    }

    #[test]
    fn restore_then_sign() {
        let mut c = controller();
        let mut events = setup_events("restored", None, false);
        events.extend([text("12"), text(ABANDON_12)]);
        script(&mut c, events);
        let summary = c.restore_wallet().unwrap();
        assert_eq!(summary.number_of_mnemonics, 12);
        assert_eq!(summary.id, wallet_id_for(&Secret::zeroed()));
        assert_eq!(c.flow(), FlowState::Restore(RestoreStep::Success));

        let digest = [0x5A; 32];
        let signed = c.sign_digest("restored", &digest).unwrap();
        let seed = mnemonic::derive_seed(&Secret::zeroed(), 12, "").unwrap();
        assert_eq!(signed, signer::sign_digest(&seed, &digest));
        assert!(verify_signature(&signed.public_key, &digest, &signed.signature).is_ok());
        assert_eq!(c.flow(), FlowState::Sign(SignStep::Done));
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn restore_back_from_word_count_returns_to_setup() {
        let mut c = controller();
        let mut events = setup_events("r", None, false);
        events.extend([UserEvent::Cancel, UserEvent::Cancel, text("15"), text("12"), text(ABANDON_12)]);
        script(&mut c, events);
        c.restore_wallet().unwrap();
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "setup.passphrase_choice").count(), 2);
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "restore.word_count").count(), 3);
    }

    #[test]
    fn restore_rejects_bad_mnemonic() {
        let mut c = controller();
        let mut events = setup_events("r", None, false);
        events.extend([text("12"), text("abandon abandon abandon")]);
        script(&mut c, events);
        // rejected, then the queue runs dry
        assert_eq!(c.restore_wallet(), Err(FlowError::InputTimeout));
        assert_eq!(c.cards.written(), 0);
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn sign_with_pin_and_passphrase() {
        let mut c = controller();
        create(&mut c, "w", Some("1234"), true);

        script(&mut c, vec![text("1234"), text("alpha")]);
        let first = c.sign_digest("w", &[1; 32]).unwrap();
        script(&mut c, vec![text("1234"), text("beta")]);
        let second = c.sign_digest("w", &[1; 32]).unwrap();
        // a different passphrase is a different wallet
        assert_ne!(first.public_key, second.public_key);

        script(&mut c, vec![text("1234"), text("alpha")]);
        assert_eq!(c.sign_digest("w", &[1; 32]).unwrap(), first);
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn sign_with_wrong_pin() {
        let mut c = controller();
        create(&mut c, "w", Some("1234"), false);
        script(&mut c, vec![text("0000")]);
        assert_eq!(c.sign_digest("w", &[0; 32]), Err(FlowError::CryptoVerificationFailed));
        assert_eq!(failures(&c), vec![UserMessage::IncorrectPin]);
        assert_eq!(c.flow(), FlowState::Sign(SignStep::Failed));
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn passphrase_cancel_goes_back_to_pin() {
        let mut c = controller();
        create(&mut c, "w", Some("1234"), true);
        script(&mut c, vec![text("1234"), UserEvent::Cancel, text("1234"), text("p")]);
        assert!(c.sign_digest("w", &[0; 32]).is_ok());
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "sign.pin_input").count(), 2);
    }

    #[test]
    fn sign_needs_three_written_cards() {
        let mut c = controller();
        let mut record = WalletRecord::new(
            WalletId([7; 16]),
            parse_name("thin").unwrap(),
            WalletFlags::empty(),
            24,
        );
        record.cards_written = CardSet::single(CardNumber::new(1).unwrap());
        c.store.add_wallet_record(&record).unwrap();
        assert_eq!(c.sign_digest("thin", &[0; 32]), Err(FlowError::ResourceExhausted));
    }

    #[test]
    fn data_wallet_round_trip() {
        let mut c = controller();
        script(&mut c, data_events("notes", None, "meet at the old mill"));
        let summary = c.new_data_wallet().unwrap();

        assert!(summary.flags.contains(WalletFlags::HAS_ARBITRARY_DATA));
        assert!(!summary.flags.contains(WalletFlags::HAS_PASSPHRASE));
        assert_eq!(summary.number_of_mnemonics, 0);
        assert_eq!(summary.state, WalletState::Valid);
        assert_eq!(summary.id, wallet_id_of(b"meet at the old mill"));
        assert_eq!(c.flow(), FlowState::DataWallet(DataWalletStep::Success));
        assert_eq!(c.cards.written(), 5);
        assert!(!c.ui.shown.contains(&"setup.passphrase_choice"));
        assert!(c.vault().is_wiped());
        let stored = c.cards.stored[0].as_ref().unwrap();
        assert_eq!(stored.ciphertext.len(), "meet at the old mill".len());

        assert_eq!(c.verify_wallet("notes"), Ok(WalletState::Valid));
        assert!(c.vault().is_wiped());

        let payload = c.reveal_data("notes").unwrap();
        assert_eq!(payload.as_bytes(), b"meet at the old mill");
        assert_eq!(c.flow(), FlowState::Reveal(RevealStep::Done));
        assert!(c.vault().is_wiped());
        assert!(failures(&c).is_empty());
    }

    /// The device keeps each card's envelope; the sealed share stays on
    /// the card.
    fn assert_record_holds_envelopes_only(c: &Controller, name: &str) {
        let (_, record) = c.store().get_wallet_record_by_name(name).unwrap();
        let encoded = record.encode();
        for card in CardNumber::all() {
            let share = c.cards.stored[card.index()].as_ref().unwrap();
            assert_eq!(share.wallet_id, record.id);
            assert_eq!(record.envelope(card), &share.envelope);
            let ciphertext = share.ciphertext.as_bytes();
            assert!(!encoded.windows(ciphertext.len()).any(|w| w == ciphertext));
        }
    }

    #[test]
    fn record_holds_no_share_material() {
        let mut c = controller();
        script(&mut c, data_events("notes", None, "a payload long enough to search for"));
        c.new_data_wallet().unwrap();
        assert_record_holds_envelopes_only(&c, "notes");

        // the next wallet reuses the same five cards
        create(&mut c, "keys", None, false);
        assert_record_holds_envelopes_only(&c, "keys");
    }

    #[test]
    fn data_wallet_with_pin_reveals_only_with_pin() {
        let mut c = controller();
        script(&mut c, data_events("vault", Some("8642"), "x"));
        assert!(c.new_data_wallet().unwrap().flags.contains(WalletFlags::HAS_PIN));

        script(&mut c, vec![text("0000")]);
        assert_eq!(c.reveal_data("vault"), Err(FlowError::CryptoVerificationFailed));
        assert_eq!(failures(&c), vec![UserMessage::IncorrectPin]);
        assert_eq!(c.flow(), FlowState::Reveal(RevealStep::Failed));
        assert!(c.vault().is_wiped());

        script(&mut c, vec![text("8642")]);
        assert_eq!(c.reveal_data("vault").unwrap().as_bytes(), b"x");
    }

    #[test]
    fn data_and_key_wallets_keep_their_own_flows() {
        let mut c = controller();
        script(&mut c, data_events("notes", None, "payload"));
        c.new_data_wallet().unwrap();
        create(&mut c, "keys", None, false);
        let reads = c.cards.read_count;

        assert_eq!(
            c.sign_digest("notes", &[0; 32]),
            Err(FlowError::InputInvalid("data wallets hold no signing key"))
        );
        assert_eq!(c.reveal_data("keys"), Err(FlowError::InputInvalid("not a data wallet")));
        assert_eq!(c.cards.read_count, reads);
        assert!(c.vault().is_wiped());
    }

    #[test]
    fn data_input_back_returns_to_pin_choice() {
        let mut c = controller();
        let mut events = data_events("notes", None, "");
        events.pop();
        events.extend([UserEvent::Cancel, UserEvent::Confirm, text("1234"), text("1234"), text("ok")]);
        script(&mut c, events);

        let summary = c.new_data_wallet().unwrap();
        assert!(summary.flags.contains(WalletFlags::HAS_PIN));
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "setup.pin_choice").count(), 2);
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "data.input").count(), 2);
    }

    #[test]
    fn oversized_payload_is_reprompted() {
        let mut c = controller();
        let mut events = data_events("notes", None, &"a".repeat(MAX_PAYLOAD_LEN + 1));
        events.push(text(""));
        events.push(text(&"b".repeat(MAX_PAYLOAD_LEN)));
        script(&mut c, events);

        let summary = c.new_data_wallet().unwrap();
        assert_eq!(summary.id, wallet_id_of("b".repeat(MAX_PAYLOAD_LEN).as_bytes()));
        assert_eq!(c.ui.shown.iter().filter(|s| **s == "data.input").count(), 3);
        assert_eq!(failures(&c), vec![UserMessage::SomethingWentWrong; 2]);
    }

    #[test]
    fn rejects_mismatched_share_count() {
        let config = DeviceConfig { share_count: 4, ..DeviceConfig::fast() };
        let built = WalletController::new(
            config,
            ScriptedUi::default(),
            SimCards::new(),
            RecordStore::new(MemoryStore::new(), 4),
            CountingEntropy::new(0),
            AbortSignal::new(),
        );
        assert!(built.is_err());
    }
}
