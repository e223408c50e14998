//! `nusb`-backed USB transport for the CC debug dongle family.
//!
//! This crate is the only place in the workspace that links a USB
//! backend: `cc-core` depends only on the [`cc_core::transport::Transport`]
//! and [`cc_core::programmer::DeviceOpener`] traits, and this crate
//! supplies their sole implementation, [`UsbTransport`] and
//! [`UsbOpener`].

#![warn(missing_docs)]

mod device;
mod error;

pub use device::{UsbOpener, UsbTransport};
pub use error::UsbError;
