//! Threshold card collection.
//!
//! Unlocking a wallet needs any `threshold` of its written cards, in any
//! order. The acceptable set starts as the record's written cards and
//! shrinks as each card is read, so tapping the same card twice counts as a
//! wrong card.

use super::transport::{open_card_share, CardIo, TransportSettings};
use super::{CardChannel, CardSet, CardSlot};
use crate::crypto::envelope::EnvelopeKey;
use crate::error::FlowError;
use crate::mpc::Share;
use crate::storage::WalletRecord;
use crate::ui::{Notice, UserInterface};

/// Reads cards until `threshold` shares are in `out`.
pub fn collect_shares<C: CardChannel, U: UserInterface>(
    io: &mut CardIo<'_, C, U>,
    key: &EnvelopeKey,
    record: &WalletRecord,
    threshold: u8,
    settings: &TransportSettings,
    out: &mut Vec<Share>,
) -> Result<(), FlowError> {
    let threshold = threshold as usize;
    let mut acceptable = record.cards_written;
    for share in out.iter() {
        if let Some(card) = super::CardNumber::new(share.x) {
            acceptable.remove(card);
        }
    }

    while out.len() < threshold {
        if out.len() + acceptable.len() < threshold {
            log::warn!("Wallet {:?} has too few written cards to unlock", record.id);
            return Err(FlowError::ResourceExhausted);
        }
        io.ui.notify(Notice::TapAnyCard { remaining: threshold - out.len() });
        let share = read_any(io, key, record, acceptable, settings)?;
        if let Some(card) = super::CardNumber::new(share.x) {
            acceptable.remove(card);
        }
        log::info!("Collected share {} of {}", out.len() + 1, threshold);
        out.push(share);
    }
    Ok(())
}

/// One card step over a set of acceptable cards.
fn read_any<C: CardChannel, U: UserInterface>(
    io: &mut CardIo<'_, C, U>,
    key: &EnvelopeKey,
    record: &WalletRecord,
    acceptable: CardSet,
    settings: &TransportSettings,
) -> Result<Share, FlowError> {
    let first = acceptable.iter().next().ok_or(FlowError::ResourceExhausted)?;
    let mut slot = CardSlot::new(first, settings.budget());
    loop {
        io.abort.check()?;
        let result = io.present(acceptable, settings.timeout).and_then(|card| {
            slot.card = card;
            io.cards.read_share(card, &record.id)
        });
        io.abort.check()?;

        match result {
            Ok(card_share) => return open_card_share(key, record, slot.card, &card_share),
            Err(e) => {
                slot.last_error = Some(e);
                slot.budget = slot.budget.charge(e)?;
                log::warn!("Card read failed: {} (retries left {})", e, slot.budget.remaining);
            }
        }
    }
}
