//! Priority-zero abort signal.
//!
//! Raised by the event-polling side (host cancel, device reset, card removal
//! storms) and checked by the foreground flow at every blocking wait. A raised
//! signal unwinds the current step; the flow wipes its secrets and ends in
//! its cancel state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::FlowError;

/// Shared abort flag. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    raised: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        log::warn!("p0 abort raised");
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Consumes the signal, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// `Err(FlowError::Aborted)` if raised, consuming it.
    pub fn check(&self) -> Result<(), FlowError> {
        if self.take() {
            return Err(FlowError::Aborted);
        }
        Ok(())
    }
}
