//! atmux-core: Core traits, types, and error definitions for atmux.
//!
//! This crate defines the device-agnostic abstractions the AT transaction
//! engine is built on. Platform adaptors and applications depend on these
//! types without pulling in the engine or any concrete transport.
//!
//! # Key types
//!
//! - [`Device`] -- byte-level communication channel to a modem
//! - [`Notification`] -- tagged response/unsolicited notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod device;
pub mod error;
pub mod notify;

// Re-export key types at crate root for ergonomic `use atmux_core::*`.
pub use device::Device;
pub use error::{Error, Result};
pub use notify::Notification;
