//! Wallet flow steps.
//!
//! Each flow is an ordered step enum. `next` is the forward transition,
//! `back` mirrors it for a Cancel at a text or confirm screen, and `None`
//! from `back` means the user backed out of the flow's first step. Choice
//! screens read Cancel as "no", so they never go back.
//!
//! New-wallet, restore and data-wallet share the name, PIN and passphrase
//! prefix ([`SetupStep`]); the PIN sub-steps are skipped unless `HAS_PIN` is
//! set, and a data wallet (`HAS_ARBITRARY_DATA`) has no passphrase step.

use std::time::Duration;

use super::credentials::{MAX_PASSPHRASE_LEN, MAX_PIN_LEN};
use crate::config::InputTimeouts;
use crate::mpc::MAX_PAYLOAD_LEN;
use crate::storage::record::MAX_NAME_LEN;
use crate::storage::WalletFlags;
use crate::ui::StepDescriptor;

/// Longest accepted mnemonic, in characters.
pub const MAX_MNEMONIC_LEN: usize = 24 * 9;

/// Name, PIN and passphrase selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SetupStep {
    /// 1. Type the wallet name.
    NameInput,
    /// 2. Confirm the name.
    NameConfirm,
    /// 3. Set a PIN?
    PinChoice,
    /// 4. Type the PIN.
    PinInput,
    /// 5. Re-type the PIN.
    PinConfirm,
    /// 6. Use a passphrase?
    PassphraseChoice,
}

impl SetupStep {
    /// `None` after the last setup step.
    pub fn next(&self, flags: WalletFlags) -> Option<Self> {
        let data = flags.contains(WalletFlags::HAS_ARBITRARY_DATA);
        match self {
            Self::NameInput => Some(Self::NameConfirm),
            Self::NameConfirm => Some(Self::PinChoice),
            Self::PinChoice if flags.contains(WalletFlags::HAS_PIN) => Some(Self::PinInput),
            Self::PinChoice | Self::PinConfirm if data => None,
            Self::PinChoice => Some(Self::PassphraseChoice),
            Self::PinInput => Some(Self::PinConfirm),
            Self::PinConfirm => Some(Self::PassphraseChoice),
            Self::PassphraseChoice => None,
        }
    }

    pub fn back(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::NameInput => None,
            Self::NameConfirm => Some(Self::NameInput),
            Self::PinChoice => Some(Self::NameConfirm),
            Self::PinInput => Some(Self::PinChoice),
            Self::PinConfirm => Some(Self::PinInput),
            Self::PassphraseChoice if flags.contains(WalletFlags::HAS_PIN) => Some(Self::PinConfirm),
            Self::PassphraseChoice => Some(Self::PinChoice),
        }
    }

    /// Where a flow re-enters setup when the user backs out of the step
    /// after it. A confirmed PIN is not kept, so a PIN wallet without a
    /// passphrase step asks for it again.
    pub fn reentry(flags: WalletFlags) -> Self {
        if !flags.contains(WalletFlags::HAS_ARBITRARY_DATA) {
            Self::PassphraseChoice
        } else if flags.contains(WalletFlags::HAS_PIN) {
            Self::PinInput
        } else {
            Self::PinChoice
        }
    }

    pub fn descriptor(&self) -> StepDescriptor {
        match self {
            Self::NameInput => StepDescriptor::text("setup.name_input", MAX_NAME_LEN, false),
            Self::NameConfirm => StepDescriptor::message("setup.name_confirm"),
            Self::PinChoice => StepDescriptor::choice("setup.pin_choice"),
            Self::PinInput => StepDescriptor::text("setup.pin_input", MAX_PIN_LEN, true),
            Self::PinConfirm => StepDescriptor::text("setup.pin_confirm", MAX_PIN_LEN, true),
            Self::PassphraseChoice => StepDescriptor::choice("setup.passphrase_choice"),
        }
    }

    pub fn timeout(&self, timeouts: &InputTimeouts) -> Duration {
        match self {
            Self::NameInput | Self::PinInput | Self::PinConfirm => timeouts.text_input,
            Self::NameConfirm => timeouts.message,
            Self::PinChoice | Self::PassphraseChoice => timeouts.confirm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NewWalletStep {
    Setup(SetupStep),
    /// Draw entropy, split and seal.
    Generate,
    /// Write and read back every card.
    CardTransport,
    /// Reconstruct from every 3-card subset.
    VerifyShares,
    Success,
    /// Creation failed after at least one card was written.
    Failed,
}

impl NewWalletStep {
    pub const FIRST: Self = Self::Setup(SetupStep::NameInput);

    pub fn next(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => Some(s.next(flags).map_or(Self::Generate, Self::Setup)),
            Self::Generate => Some(Self::CardTransport),
            Self::CardTransport => Some(Self::VerifyShares),
            Self::VerifyShares => Some(Self::Success),
            Self::Success | Self::Failed => None,
        }
    }

    /// Only setup steps can be backed out of.
    pub fn back(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => s.back(flags).map(Self::Setup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreStep {
    Setup(SetupStep),
    /// 12, 18 or 24.
    WordCount,
    MnemonicInput,
    /// Decode the mnemonic, split and seal.
    Derive,
    CardTransport,
    VerifyShares,
    Success,
    Failed,
}

impl RestoreStep {
    pub const FIRST: Self = Self::Setup(SetupStep::NameInput);

    pub fn next(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => Some(s.next(flags).map_or(Self::WordCount, Self::Setup)),
            Self::WordCount => Some(Self::MnemonicInput),
            Self::MnemonicInput => Some(Self::Derive),
            Self::Derive => Some(Self::CardTransport),
            Self::CardTransport => Some(Self::VerifyShares),
            Self::VerifyShares => Some(Self::Success),
            Self::Success | Self::Failed => None,
        }
    }

    pub fn back(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => s.back(flags).map(Self::Setup),
            Self::WordCount => Some(Self::Setup(SetupStep::reentry(flags))),
            Self::MnemonicInput => Some(Self::WordCount),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> Option<StepDescriptor> {
        match self {
            Self::Setup(s) => Some(s.descriptor()),
            Self::WordCount => Some(StepDescriptor::text("restore.word_count", 2, false)),
            Self::MnemonicInput => Some(StepDescriptor::text("restore.mnemonic_input", MAX_MNEMONIC_LEN, true)),
            _ => None,
        }
    }
}

/// Creation of a wallet that carries a user payload instead of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataWalletStep {
    Setup(SetupStep),
    /// Type the payload.
    DataInput,
    /// Split the payload and seal.
    Split,
    CardTransport,
    VerifyShares,
    Success,
    Failed,
}

impl DataWalletStep {
    pub const FIRST: Self = Self::Setup(SetupStep::NameInput);

    pub fn next(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => Some(s.next(flags).map_or(Self::DataInput, Self::Setup)),
            Self::DataInput => Some(Self::Split),
            Self::Split => Some(Self::CardTransport),
            Self::CardTransport => Some(Self::VerifyShares),
            Self::VerifyShares => Some(Self::Success),
            Self::Success | Self::Failed => None,
        }
    }

    pub fn back(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::Setup(s) => s.back(flags).map(Self::Setup),
            Self::DataInput => Some(Self::Setup(SetupStep::reentry(flags))),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> Option<StepDescriptor> {
        match self {
            Self::Setup(s) => Some(s.descriptor()),
            Self::DataInput => Some(StepDescriptor::text("data.input", MAX_PAYLOAD_LEN, true)),
            _ => None,
        }
    }
}

/// Card check of an existing wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyStep {
    /// Only for PIN wallets.
    PinInput,
    CardReadback,
    Reconstruct,
    Success,
    Failed,
}

impl VerifyStep {
    pub fn first(flags: WalletFlags) -> Self {
        if flags.contains(WalletFlags::HAS_PIN) {
            Self::PinInput
        } else {
            Self::CardReadback
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::PinInput => Some(Self::CardReadback),
            Self::CardReadback => Some(Self::Reconstruct),
            Self::Reconstruct => Some(Self::Success),
            Self::Success | Self::Failed => None,
        }
    }

    pub fn descriptor(&self) -> Option<StepDescriptor> {
        match self {
            Self::PinInput => Some(StepDescriptor::text("verify.pin_input", MAX_PIN_LEN, true)),
            _ => None,
        }
    }
}

/// Unlock the wallet and sign a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SignStep {
    PinInput,
    PassphraseInput,
    /// Any three written cards.
    Collect,
    /// Reconstruct and derive the BIP-39 seed.
    Derive,
    Sign,
    Done,
    Failed,
}

impl SignStep {
    pub fn first(flags: WalletFlags) -> Self {
        if flags.contains(WalletFlags::HAS_PIN) {
            Self::PinInput
        } else if flags.contains(WalletFlags::HAS_PASSPHRASE) {
            Self::PassphraseInput
        } else {
            Self::Collect
        }
    }

    pub fn next(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::PinInput if flags.contains(WalletFlags::HAS_PASSPHRASE) => Some(Self::PassphraseInput),
            Self::PinInput | Self::PassphraseInput => Some(Self::Collect),
            Self::Collect => Some(Self::Derive),
            Self::Derive => Some(Self::Sign),
            Self::Sign => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn back(&self, flags: WalletFlags) -> Option<Self> {
        match self {
            Self::PassphraseInput if flags.contains(WalletFlags::HAS_PIN) => Some(Self::PinInput),
            _ => None,
        }
    }

    pub fn descriptor(&self) -> Option<StepDescriptor> {
        match self {
            Self::PinInput => Some(StepDescriptor::text("sign.pin_input", MAX_PIN_LEN, true)),
            Self::PassphraseInput => Some(StepDescriptor::text("sign.passphrase_input", MAX_PASSPHRASE_LEN, true)),
            _ => None,
        }
    }
}

/// Read a data wallet's payload back from any three cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RevealStep {
    PinInput,
    Collect,
    Reconstruct,
    Done,
    Failed,
}

impl RevealStep {
    pub fn first(flags: WalletFlags) -> Self {
        if flags.contains(WalletFlags::HAS_PIN) {
            Self::PinInput
        } else {
            Self::Collect
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::PinInput => Some(Self::Collect),
            Self::Collect => Some(Self::Reconstruct),
            Self::Reconstruct => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    pub fn descriptor(&self) -> Option<StepDescriptor> {
        match self {
            Self::PinInput => Some(StepDescriptor::text("reveal.pin_input", MAX_PIN_LEN, true)),
            _ => None,
        }
    }
}

/// Which flow the controller is in, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    NewWallet(NewWalletStep),
    Restore(RestoreStep),
    DataWallet(DataWalletStep),
    Verify(VerifyStep),
    Reveal(RevealStep),
    Sign(SignStep),
    /// The last flow was cancelled or aborted.
    Cancelled,
}

impl FlowState {
    /// The failure step of the flow this state belongs to.
    pub fn failed(&self) -> Self {
        match self {
            FlowState::NewWallet(_) => FlowState::NewWallet(NewWalletStep::Failed),
            FlowState::Restore(_) => FlowState::Restore(RestoreStep::Failed),
            FlowState::DataWallet(_) => FlowState::DataWallet(DataWalletStep::Failed),
            FlowState::Verify(_) => FlowState::Verify(VerifyStep::Failed),
            FlowState::Reveal(_) => FlowState::Reveal(RevealStep::Failed),
            FlowState::Sign(_) => FlowState::Sign(SignStep::Failed),
            other => *other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Idle
                | FlowState::Cancelled
                | FlowState::NewWallet(NewWalletStep::Success | NewWalletStep::Failed)
                | FlowState::Restore(RestoreStep::Success | RestoreStep::Failed)
                | FlowState::DataWallet(DataWalletStep::Success | DataWalletStep::Failed)
                | FlowState::Verify(VerifyStep::Success | VerifyStep::Failed)
                | FlowState::Reveal(RevealStep::Done | RevealStep::Failed)
                | FlowState::Sign(SignStep::Done | SignStep::Failed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(flags: WalletFlags) -> Vec<NewWalletStep> {
        let mut steps = vec![NewWalletStep::FIRST];
        while let Some(next) = steps[steps.len() - 1].next(flags) {
            steps.push(next);
        }
        steps
    }

    #[test]
    fn pin_steps_are_gated() {
        let with_pin = walk(WalletFlags::HAS_PIN);
        let without = walk(WalletFlags::empty());
        assert!(with_pin.contains(&NewWalletStep::Setup(SetupStep::PinConfirm)));
        assert!(!without.contains(&NewWalletStep::Setup(SetupStep::PinInput)));
        assert_eq!(without.len() + 2, with_pin.len());
        assert_eq!(without.last(), Some(&NewWalletStep::Success));
    }

    #[test]
    fn back_mirrors_next() {
        for flags in [WalletFlags::empty(), WalletFlags::HAS_PIN] {
            let mut step = SetupStep::NameInput;
            while let Some(next) = step.next(flags) {
                assert_eq!(next.back(flags), Some(step), "{:?}", next);
                step = next;
            }
        }
        assert_eq!(SetupStep::NameInput.back(WalletFlags::empty()), None);
        assert_eq!(NewWalletStep::CardTransport.back(WalletFlags::empty()), None);
    }

    #[test]
    fn restore_inserts_mnemonic_steps() {
        let end = RestoreStep::Setup(SetupStep::PassphraseChoice);
        assert_eq!(end.next(WalletFlags::empty()), Some(RestoreStep::WordCount));
        assert_eq!(RestoreStep::MnemonicInput.next(WalletFlags::empty()), Some(RestoreStep::Derive));
        assert_eq!(RestoreStep::WordCount.back(WalletFlags::empty()), Some(end));
    }

    #[test]
    fn data_wallet_skips_passphrase() {
        let pinned = WalletFlags::HAS_ARBITRARY_DATA | WalletFlags::HAS_PIN;
        let mut steps = vec![DataWalletStep::FIRST];
        while let Some(next) = steps[steps.len() - 1].next(pinned) {
            steps.push(next);
        }
        assert!(!steps.contains(&DataWalletStep::Setup(SetupStep::PassphraseChoice)));
        assert_eq!(steps[5], DataWalletStep::DataInput);
        assert_eq!(steps.last(), Some(&DataWalletStep::Success));

        let plain = WalletFlags::HAS_ARBITRARY_DATA;
        assert_eq!(
            DataWalletStep::Setup(SetupStep::PinChoice).next(plain),
            Some(DataWalletStep::DataInput)
        );
        assert_eq!(
            DataWalletStep::DataInput.back(plain),
            Some(DataWalletStep::Setup(SetupStep::PinChoice))
        );
        assert_eq!(
            DataWalletStep::DataInput.back(pinned),
            Some(DataWalletStep::Setup(SetupStep::PinInput))
        );
        assert_eq!(SetupStep::reentry(WalletFlags::HAS_PIN), SetupStep::PassphraseChoice);
    }

    #[test]
    fn reveal_entry_depends_on_pin() {
        assert_eq!(RevealStep::first(WalletFlags::HAS_ARBITRARY_DATA), RevealStep::Collect);
        let pinned = WalletFlags::HAS_ARBITRARY_DATA | WalletFlags::HAS_PIN;
        assert_eq!(RevealStep::first(pinned), RevealStep::PinInput);
        assert!(RevealStep::PinInput.descriptor().is_some());
        assert_eq!(RevealStep::Reconstruct.next(), Some(RevealStep::Done));
    }

    #[test]
    fn sign_entry_depends_on_flags() {
        assert_eq!(SignStep::first(WalletFlags::empty()), SignStep::Collect);
        assert_eq!(SignStep::first(WalletFlags::HAS_PASSPHRASE), SignStep::PassphraseInput);
        let both = WalletFlags::HAS_PIN | WalletFlags::HAS_PASSPHRASE;
        assert_eq!(SignStep::PinInput.next(both), Some(SignStep::PassphraseInput));
        assert_eq!(SignStep::PassphraseInput.back(both), Some(SignStep::PinInput));
        assert_eq!(SignStep::PassphraseInput.back(WalletFlags::HAS_PASSPHRASE), None);
        assert_eq!(VerifyStep::first(WalletFlags::empty()), VerifyStep::CardReadback);
    }

    #[test]
    fn terminal_states() {
        assert!(FlowState::NewWallet(NewWalletStep::Failed).is_terminal());
        assert!(!FlowState::NewWallet(NewWalletStep::Generate).is_terminal());
        assert!(FlowState::Cancelled.is_terminal());
        assert!(FlowState::Reveal(RevealStep::Done).is_terminal());
        assert!(!FlowState::DataWallet(DataWalletStep::Split).is_terminal());
        assert_eq!(
            FlowState::DataWallet(DataWalletStep::CardTransport).failed(),
            FlowState::DataWallet(DataWalletStep::Failed)
        );
        assert_eq!(
            FlowState::Sign(SignStep::Collect).failed(),
            FlowState::Sign(SignStep::Failed)
        );
    }
}
