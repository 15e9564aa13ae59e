//! Retry budget for a single card step.
//!
//! The budget is a value: each attempt takes the current budget and hands
//! back the charged one, so the remaining attempts are part of the step's
//! inputs and outputs rather than a counter mutated from inside a loop.

use super::{CardError, FaultClass};
use crate::error::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Attempts left for communication and recoverable applet faults.
    pub remaining: u8,
    /// Wrong-card presentations left. Never charged for link faults, and
    /// wrong cards never charge `remaining`.
    pub wrong_card_remaining: u8,
}

impl RetryBudget {
    pub fn new(retries: u8, wrong_card_limit: u8) -> Self {
        Self {
            remaining: retries,
            wrong_card_remaining: wrong_card_limit,
        }
    }

    /// Charges one failed attempt. Returns the budget for the next attempt,
    /// or the flow error once the fault is fatal or a counter runs out.
    pub fn charge(self, error: CardError) -> Result<RetryBudget, FlowError> {
        match error.classify() {
            FaultClass::WrongCard => {
                let left = self.wrong_card_remaining.saturating_sub(1);
                if left == 0 {
                    return Err(FlowError::TransportFatal(error));
                }
                Ok(Self { wrong_card_remaining: left, ..self })
            }
            FaultClass::Recoverable => {
                let left = self.remaining.saturating_sub(1);
                if left == 0 {
                    return Err(FlowError::TransportFatal(error));
                }
                Ok(Self { remaining: left, ..self })
            }
            FaultClass::Fatal => Err(FlowError::TransportFatal(error)),
            FaultClass::Abort => Err(FlowError::Aborted),
        }
    }
}
