//! USB-layer error type, folded into [`cc_core::error::Error`] at the
//! boundary so the rest of the core never matches on `nusb` errors
//! directly (mirrors `rflasher-dediprog`'s `DediprogError::Core`/`From`
//! pair, just in the other direction).

use thiserror::Error;

/// Errors this crate can produce on top of [`cc_core::error::Error`].
#[derive(Debug, Error)]
pub enum UsbError {
    /// No dongle in [`cc_core::transport::DEVICE_TABLE`] is attached.
    #[error("no CC debug dongle found")]
    DeviceNotFound,
    /// A dongle was requested at a specific bus/address but isn't there.
    #[error("no CC debug dongle at bus {bus} address {address}")]
    DeviceNotFoundAtAddress {
        /// Requested USB bus number.
        bus: u8,
        /// Requested USB device address.
        address: u8,
    },
    /// Enumerating or opening the device failed.
    #[error("failed to open USB device: {0}")]
    Open(String),
    /// Claiming the device's interface failed.
    #[error("failed to claim USB interface: {0}")]
    Claim(String),
    /// A control or bulk transfer failed or was short.
    #[error("USB transfer failed: {0}")]
    Transfer(String),
    /// The requested bulk endpoint wasn't present on the claimed interface.
    #[error("no such endpoint 0x{0:02X}")]
    NoSuchEndpoint(u8),
}

impl From<nusb::Error> for UsbError {
    fn from(e: nusb::Error) -> Self {
        UsbError::Transfer(e.to_string())
    }
}

impl From<UsbError> for cc_core::error::Error {
    fn from(e: UsbError) -> Self {
        cc_core::error::Error::Transport(e.to_string())
    }
}
