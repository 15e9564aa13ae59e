//! Shard wallet firmware core.
//!
//! Splits a wallet's master entropy into five card shares (any three recover
//! it), coordinates writing and reading those shares over the contactless card
//! link, and runs the two host-facing protocols: the session handshake and the
//! device authentication flow.
//!
//! Everything outside the core (screens, the NFC/USB byte pump, flash access,
//! chain-specific transaction encoding) is consumed through the traits in
//! [`ui`], [`card`], [`host`] and [`storage`].

pub mod config;
pub mod error;
pub mod events;

pub mod core;
pub mod entropy;
pub mod crypto;
pub mod mpc;

pub mod card;
pub mod storage;
pub mod ui;
pub mod host;

pub mod session;
pub mod auth;
pub mod wallet;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DeviceConfig;
pub use error::FlowError;
