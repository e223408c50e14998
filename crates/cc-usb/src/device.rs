//! [`UsbTransport`]/[`UsbOpener`]: the `nusb`-backed implementations of
//! `cc-core`'s [`Transport`]/[`DeviceOpener`] traits.
//!
//! Grounded on `rflasher-dediprog`'s `Dediprog::try_open_device` and its
//! control/bulk transfer wrappers: blocking `nusb` calls via `.wait()`,
//! one claimed [`Interface`] per open session, endpoints looked up by
//! address on each transfer rather than cached as typed handles.
//!
//! Unlike the Dediprog, a CC dongle's interface isn't claimed at open
//! time: [`cc_core::programmer::Programmer::open`] resets
//! Chipcon-protocol clones *before* claiming, so [`UsbTransport::open`]
//! only opens the device handle and [`Transport::claim_interface`]
//! claims it once the caller decides the order.

use std::time::Duration;

use cc_core::error::Result;
use cc_core::programmer::DeviceOpener;
use cc_core::transport::{Transport, UsbDeviceId, DEVICE_TABLE};
use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{Device, Interface, MaybeFuture};

use crate::error::UsbError;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// An open session against one of the four dongles in
/// [`cc_core::transport::DEVICE_TABLE`].
pub struct UsbTransport {
    device: Device,
    interface: Option<Interface>,
    timeout: Duration,
    bcd_device: u16,
}

impl UsbTransport {
    fn open(device_info: &nusb::DeviceInfo) -> Result<(Self, u16)> {
        let device = device_info
            .open()
            .wait()
            .map_err(|e| UsbError::Open(e.to_string()))?;
        let bcd_device = device_info.device_version();
        let transport = UsbTransport {
            device,
            interface: None,
            timeout: Duration::from_millis(cc_core::transport::DEFAULT_TIMEOUT_MS as u64),
            bcd_device,
        };
        Ok((transport, bcd_device))
    }

    fn iface(&mut self) -> Result<&mut Interface> {
        self.interface
            .as_mut()
            .ok_or_else(|| UsbError::Claim("interface not claimed".to_string()).into())
    }
}

impl Transport for UsbTransport {
    fn set_transfer_timeout(&mut self, timeout_ms: u32) {
        self.timeout = Duration::from_millis(timeout_ms as u64);
    }

    fn reset_device(&mut self) -> Result<()> {
        self.device
            .reset()
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()).into())
    }

    fn set_configuration(&mut self, configuration: u8) -> Result<()> {
        self.device
            .set_configuration(configuration)
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()).into())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<()> {
        self.interface = Some(
            self.device
                .claim_interface(interface)
                .wait()
                .map_err(|e| UsbError::Claim(e.to_string()))?,
        );
        Ok(())
    }

    fn release_interface(&mut self, _interface: u8) -> Result<()> {
        self.interface = None;
        Ok(())
    }

    fn string_descriptor_ascii(&mut self, index: u8) -> Result<String> {
        if index == 0 {
            return Ok(String::new());
        }
        let data = self
            .iface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Standard,
                    recipient: Recipient::Device,
                    request: 0x06, // GET_DESCRIPTOR
                    value: (0x03u16 << 8) | index as u16,
                    index: 0x0409, // US English
                    length: 255,
                },
                CONTROL_TIMEOUT,
            )
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;
        if data.len() < 2 {
            return Ok(String::new());
        }
        let utf16: Vec<u16> = data[2..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&utf16))
    }

    fn bcd_device(&self) -> u16 {
        self.bcd_device
    }

    fn clear_halt(&mut self, endpoint: u8) -> Result<()> {
        self.iface()?
            .clear_halt(endpoint)
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()).into())
    }

    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.timeout;
        let mut ep: nusb::Endpoint<Bulk, In> = self
            .iface()?
            .endpoint(endpoint)
            .map_err(|_| UsbError::NoSuchEndpoint(endpoint))?;
        let max_packet_size = ep.max_packet_size().max(1);
        let request_len = buf.len().max(1).div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);
        let completion = ep.transfer_blocking(in_buf, timeout);
        let data = completion
            .into_result()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn bulk_write(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        let timeout = self.timeout;
        let mut ep: nusb::Endpoint<Bulk, Out> = self
            .iface()?
            .endpoint(endpoint)
            .map_err(|_| UsbError::NoSuchEndpoint(endpoint))?;
        let mut out_buf = Buffer::new(data.len());
        out_buf.extend_from_slice(data);
        let completion = ep.transfer_blocking(out_buf, timeout);
        completion
            .into_result()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;
        Ok(data.len())
    }

    fn control_read(&mut self, request: u8, value: u16, index: u16, buf: &mut [u8]) -> Result<usize> {
        let timeout = self.timeout;
        let data = self
            .iface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length: buf.len() as u16,
                },
                timeout,
            )
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn control_write(&mut self, request: u8, value: u16, index: u16, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        self.iface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                timeout,
            )
            .wait()
            .map_err(|e| UsbError::Transfer(e.to_string()))?;
        Ok(())
    }

    fn close(&mut self) {
        self.interface = None;
    }
}

/// Enumerates and opens dongles by matching
/// [`cc_core::transport::DEVICE_TABLE`] against `nusb::list_devices`.
#[derive(Default)]
pub struct UsbOpener;

impl UsbOpener {
    /// A fresh opener. Enumeration happens lazily on `open`/`open_by_address`.
    pub fn new() -> Self {
        UsbOpener
    }

    fn matching_devices() -> Result<Vec<(nusb::DeviceInfo, UsbDeviceId)>> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::Open(e.to_string()))?
            .collect();
        let mut matched = Vec::new();
        for info in devices {
            if let Some(&entry) = DEVICE_TABLE
                .iter()
                .find(|e| e.vendor_id == info.vendor_id() && e.product_id == info.product_id())
            {
                matched.push((info, entry));
            }
        }
        Ok(matched)
    }
}

impl DeviceOpener for UsbOpener {
    fn open(&mut self) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)> {
        let matched = Self::matching_devices()?;
        let (info, entry) = matched.into_iter().next().ok_or(UsbError::DeviceNotFound)?;
        let (transport, bcd_device) = UsbTransport::open(&info)?;
        log::info!(
            "opened {} at bus {} address {}",
            entry.description,
            info.busnum(),
            info.device_address()
        );
        Ok((Box::new(transport), entry, bcd_device))
    }

    fn open_by_address(&mut self, bus: u8, address: u8) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)> {
        let matched = Self::matching_devices()?;
        let (info, entry) = matched
            .into_iter()
            .find(|(info, _)| info.busnum() == bus && info.device_address() == address)
            .ok_or(UsbError::DeviceNotFoundAtAddress { bus, address })?;
        let (transport, bcd_device) = UsbTransport::open(&info)?;
        Ok((Box::new(transport), entry, bcd_device))
    }
}
