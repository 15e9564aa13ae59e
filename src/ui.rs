//! Display and input capability.
//!
//! The core never draws anything. Each flow step hands the UI a
//! [`StepDescriptor`] and gets back a [`UserEvent`]; progress and failure
//! screens go out as [`Notice`]s.

use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::card::CardNumber;
use crate::error::UserMessage;

/// What kind of input a step collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Free text; `secret` inputs must be masked on screen.
    Text { max_len: usize, secret: bool },
    /// Yes / no.
    Choice,
    /// Informational screen acknowledged with confirm.
    Message,
}

/// A single screen the flow asks the UI to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    /// Stable step name, e.g. `"new_wallet.pin_input"`.
    pub name: &'static str,
    pub prompt: Prompt,
}

impl StepDescriptor {
    pub const fn text(name: &'static str, max_len: usize, secret: bool) -> Self {
        Self { name, prompt: Prompt::Text { max_len, secret } }
    }

    pub const fn choice(name: &'static str) -> Self {
        Self { name, prompt: Prompt::Choice }
    }

    pub const fn message(name: &'static str) -> Self {
        Self { name, prompt: Prompt::Message }
    }
}

/// User intent returned from a screen.
#[derive(Clone, PartialEq, Eq)]
pub enum UserEvent {
    Confirm,
    Cancel,
    TextInput(Zeroizing<String>),
    Timeout,
}

impl fmt::Debug for UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserEvent::Confirm => f.write_str("Confirm"),
            UserEvent::Cancel => f.write_str("Cancel"),
            UserEvent::TextInput(_) => f.write_str("TextInput(***SENSITIVE***)"),
            UserEvent::Timeout => f.write_str("Timeout"),
        }
    }
}

/// Output-only screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Ask the user to tap the given card.
    TapCard(CardNumber),
    /// Ask for any of the wallet's remaining cards.
    TapAnyCard { remaining: usize },
    Failure(UserMessage),
    Success(&'static str),
}

pub trait UserInterface {
    /// Shows `step` and blocks until the user acts or `timeout` elapses.
    fn show(&mut self, step: &StepDescriptor, timeout: Duration) -> UserEvent;

    fn notify(&mut self, notice: Notice);
}
