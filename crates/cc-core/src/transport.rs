//! The USB transport interface the core consumes.
//!
//! `cc-core` never talks to libusb/nusb/etc. directly; it is handed an
//! implementation of [`Transport`] by the caller (normally `cc-usb`'s
//! `UsbTransport`). This keeps device enumeration, descriptor parsing,
//! and the actual bulk/control transfer mechanics out of the core, per
//! its stated scope.

use crate::error::Result;

/// Protocol variant spoken by the matched dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Texas Instruments CC Debugger / SmartRF firmware.
    Ti,
    /// Chipcon-branded SmartRF04 clone, swapped endpoints.
    Chipcon,
}

/// One entry of the fixed USB device table.
#[derive(Debug, Clone, Copy)]
pub struct UsbDeviceId {
    /// USB vendor id.
    pub vendor_id: u16,
    /// USB product id.
    pub product_id: u16,
    /// Bulk-in endpoint address.
    pub endpoint_in: u8,
    /// Bulk-out endpoint address.
    pub endpoint_out: u8,
    /// Human-readable description.
    pub description: &'static str,
    /// Protocol variant this device speaks.
    pub protocol: Protocol,
}

/// The four supported dongles, in match order.
pub const DEVICE_TABLE: [UsbDeviceId; 4] = [
    UsbDeviceId {
        vendor_id: 0x0451,
        product_id: 0x16A2,
        endpoint_in: 0x84,
        endpoint_out: 0x04,
        description: "CC Debugger",
        protocol: Protocol::Ti,
    },
    UsbDeviceId {
        vendor_id: 0x11A0,
        product_id: 0xDB20,
        endpoint_in: 0x84,
        endpoint_out: 0x04,
        description: "SmartRF04 Evaluation Board",
        protocol: Protocol::Ti,
    },
    UsbDeviceId {
        vendor_id: 0x11A0,
        product_id: 0xEB20,
        endpoint_in: 0x82,
        endpoint_out: 0x02,
        description: "SmartRF04 Evaluation Board (Chinese)",
        protocol: Protocol::Chipcon,
    },
    UsbDeviceId {
        vendor_id: 0x0451,
        product_id: 0x16A0,
        endpoint_in: 0x84,
        endpoint_out: 0x04,
        description: "SmartRF05 Evaluation Board",
        protocol: Protocol::Ti,
    },
];

/// Default per-transfer timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 3000;
/// Upper bound on polling for full-chip erase completion, in milliseconds.
pub const MAX_ERASE_TIME_MS: u32 = 8000;

/// `bmRequestType` for a vendor, device-directed, host-to-device control
/// write.
pub const REQTYPE_VENDOR_OUT: u8 = 0x40;
/// `bmRequestType` for a vendor, device-directed, device-to-host control
/// read.
pub const REQTYPE_VENDOR_IN: u8 = 0xC0;

/// `GET_STATE` vendor request: reads 8 bytes (chip id, fw version, fw
/// revision, reserved).
pub const VENDOR_GET_STATE: u8 = 0xC0;
/// `PREPARE_DEBUG` vendor request: no data.
pub const VENDOR_PREPARE_DEBUG: u8 = 0xC5;
/// `PREPARE_READ` vendor request: reads 1 byte.
pub const VENDOR_PREPARE_READ: u8 = 0xC6;
/// `SET_CHIP_INFO` vendor request: writes 0x20 or 0x30 bytes, `wValue = 1`.
pub const VENDOR_SET_CHIP_INFO: u8 = 0xC8;
/// `RESET` vendor request: no data; `wIndex` selects halted (1) vs.
/// running (0).
pub const VENDOR_RESET: u8 = 0xC9;
/// `SET_DEBUG_INTERFACE_SPEED` vendor request: no data; `wValue` 0 = fast,
/// 1 = slow.
pub const VENDOR_SET_DEBUG_INTERFACE_SPEED: u8 = 0xCF;

/// USB transport primitives the core requires of its caller.
///
/// Implementations are blocking: every method either completes within
/// its timeout or returns an error. There is no cancellation mechanism
/// other than that timeout.
pub trait Transport {
    /// Set the timeout applied to subsequent bulk/control transfers.
    fn set_transfer_timeout(&mut self, timeout_ms: u32);

    /// Issue a USB device reset. Used before claiming the interface on
    /// Chipcon-protocol devices.
    fn reset_device(&mut self) -> Result<()>;

    /// Select the device's active configuration.
    fn set_configuration(&mut self, configuration: u8) -> Result<()>;

    /// Claim the given interface for exclusive use.
    fn claim_interface(&mut self, interface: u8) -> Result<()>;

    /// Release a previously claimed interface.
    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Read the USB string descriptor at `index` as ASCII.
    fn string_descriptor_ascii(&mut self, index: u8) -> Result<String>;

    /// The device's `bcdDevice` field, used as the debugger id.
    fn bcd_device(&self) -> u16;

    /// Clear a halt condition on `endpoint`.
    fn clear_halt(&mut self, endpoint: u8) -> Result<()>;

    /// Blocking bulk read from `endpoint` into `buf`; returns the number
    /// of bytes actually read.
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize>;

    /// Blocking bulk write of `data` to `endpoint`.
    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize>;

    /// Vendor control-in transfer, reading into `buf`.
    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize>;

    /// Vendor control-out transfer, writing `data`.
    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()>;

    /// Release every acquired resource. Called on every exit path from
    /// the programmer façade, including failure paths.
    fn close(&mut self);
}
