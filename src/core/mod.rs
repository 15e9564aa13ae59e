//! Low-level building blocks shared by the sharing engine and the flows.

pub mod gf256;
pub mod secret;
