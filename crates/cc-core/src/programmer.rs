//! The programmer façade: owns the USB transport, the list of
//! per-family drivers, and the session state between `open`/`connect`
//! and `close`.
//!
//! This mirrors `CC_Programmer` in the original implementation: a thin
//! owner that composes [`crate::debug::DebugEngine`] with whichever
//! [`crate::drivers::Driver`] matched the connected target's chip id,
//! and exposes the handful of session-level operations (`open`,
//! `unit_connect`, `unit_status`, `close`) that don't belong to either.

use crate::debug::DebugEngine;
use crate::drivers::{Cc243xDriver, Cc251x111xDriver, Cc253x254xDriver, Driver};
use crate::error::{Error, Result};
use crate::transport::{
    Protocol, Transport, UsbDeviceId, VENDOR_GET_STATE, VENDOR_SET_DEBUG_INTERFACE_SPEED,
};
use crate::unit::UnitInfo;

/// `CPU_HALTED` must be set after a debug-mode reset, per §4.5.
const STATUS_CPU_HALTED: u8 = crate::debug::STATUS_CPU_HALTED;
const STATUS_DEBUG_LOCKED: u8 = crate::debug::STATUS_DEBUG_LOCKED;

/// Debug-config bits written by [`Programmer::unit_connect`]: suspend
/// the target's timers and hold it in its lowest power mode while
/// halted, so flash operations aren't disturbed by firmware timers.
const CFG_TIMER_SUSPEND: u8 = 0x20;
const CFG_SOFT_POWER_MODE: u8 = 0x04;

/// Identity and capability information read from the dongle itself
/// (not the target chip).
#[derive(Debug, Clone)]
pub struct ProgrammerInfo {
    /// The matched device table entry's human-readable description.
    pub name: String,
    /// 4-hex-digit debugger id, derived from the device's `bcdDevice`.
    pub debugger_id: String,
    /// Dongle firmware version (from `GET_STATE`).
    pub firmware_version: u16,
    /// Dongle firmware revision (from `GET_STATE`).
    pub firmware_revision: u16,
    /// The matched entry from [`crate::transport::DEVICE_TABLE`].
    pub usb_device: UsbDeviceId,
}

/// Opens and matches a physical dongle against
/// [`crate::transport::DEVICE_TABLE`].
///
/// Implemented by `cc-usb`'s `UsbOpener` against `nusb`; kept as a trait
/// here so `cc-core` never links a USB backend directly (§1, §6).
pub trait DeviceOpener {
    /// Open the first dongle matching any entry in the device table.
    fn open(&mut self) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)>;

    /// Open a specific dongle by USB bus/address.
    fn open_by_address(
        &mut self,
        bus: u8,
        address: u8,
    ) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)>;
}

/// The programmer façade: one USB session, one matched family driver
/// (once a chip id is recognized), and the currently known target
/// identity.
pub struct Programmer {
    transport: Option<Box<dyn Transport>>,
    device_id: Option<UsbDeviceId>,
    programmer_info: Option<ProgrammerInfo>,
    drivers: Vec<Box<dyn Driver>>,
    driver_index: Option<usize>,
    unit_info: Option<UnitInfo>,
    target_locked: bool,
}

impl Default for Programmer {
    fn default() -> Self {
        Self::new()
    }
}

impl Programmer {
    /// A closed façade with the default driver set (CC253x/254x,
    /// CC251x/111x, CC243x).
    pub fn new() -> Self {
        Programmer {
            transport: None,
            device_id: None,
            programmer_info: None,
            drivers: vec![
                Box::new(Cc253x254xDriver::new()),
                Box::new(Cc251x111xDriver::new()),
                Box::new(Cc243xDriver::new()),
            ],
            driver_index: None,
            unit_info: None,
            target_locked: false,
        }
    }

    /// `true` once [`Programmer::open`] has succeeded and
    /// [`Programmer::close`] has not yet been called.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the first matching dongle, claim its interface, and read
    /// `GET_STATE` to select a family driver.
    pub fn open(&mut self, opener: &mut dyn DeviceOpener) -> Result<()> {
        let (mut transport, device_id, bcd_device) = opener.open()?;
        self.init_device(&mut transport, &device_id)?;
        let debugger_id = format!("{:04X}", bcd_device);
        self.request_device_info(&mut *transport, device_id, debugger_id)?;
        self.transport = Some(transport);
        self.device_id = Some(device_id);
        Ok(())
    }

    /// Open a dongle at a specific USB bus/address, e.g. when more than
    /// one is attached.
    pub fn open_by_address(&mut self, opener: &mut dyn DeviceOpener, bus: u8, address: u8) -> Result<()> {
        let (mut transport, device_id, bcd_device) = opener.open_by_address(bus, address)?;
        self.init_device(&mut transport, &device_id)?;
        let debugger_id = format!("{:04X}", bcd_device);
        self.request_device_info(&mut *transport, device_id, debugger_id)?;
        self.transport = Some(transport);
        self.device_id = Some(device_id);
        Ok(())
    }

    fn init_device(&self, transport: &mut Box<dyn Transport>, device_id: &UsbDeviceId) -> Result<()> {
        if device_id.protocol == Protocol::Chipcon {
            transport.reset_device()?;
        }
        transport.set_configuration(1)?;
        transport.claim_interface(0)?;
        Ok(())
    }

    fn request_device_info(
        &mut self,
        transport: &mut dyn Transport,
        device_id: UsbDeviceId,
        debugger_id: String,
    ) -> Result<()> {
        let mut buf = [0u8; 8];
        transport.control_read(VENDOR_GET_STATE, 0, 0, &mut buf)?;
        let chip_id = u16::from_le_bytes([buf[0], buf[1]]);
        let fw_version = u16::from_le_bytes([buf[2], buf[3]]);
        let fw_revision = u16::from_le_bytes([buf[4], buf[5]]);

        self.driver_index = self
            .drivers
            .iter()
            .position(|d| d.supported_units().iter().any(|&(id, _)| id == chip_id));

        let name = match self.driver_index {
            Some(idx) => self.drivers[idx]
                .supported_units()
                .iter()
                .find(|&&(id, _)| id == chip_id)
                .map(|&(_, name)| name.to_string())
                .unwrap_or_else(|| UnitInfo::unrecognized(chip_id).name),
            None => UnitInfo::unrecognized(chip_id).name,
        };

        let mut unit = UnitInfo::unrecognized(chip_id);
        unit.name = name;
        self.unit_info = Some(unit);

        self.programmer_info = Some(ProgrammerInfo {
            name: device_id.description.to_string(),
            debugger_id,
            firmware_version: fw_version,
            firmware_revision: fw_revision,
            usb_device: device_id,
        });
        log::info!(
            "connected to {} (chip id 0x{:04X}, fw {}.{})",
            device_id.description,
            chip_id,
            fw_version,
            fw_revision
        );
        Ok(())
    }

    /// Dongle identity, available once [`Programmer::open`] succeeds.
    pub fn programmer_info(&self) -> Option<&ProgrammerInfo> {
        self.programmer_info.as_ref()
    }

    /// `(name, supported)` for the last-seen chip id, answerable even
    /// when no driver matched — so a caller can report "chip not
    /// recognized" instead of erroring (original's `unit_status`).
    pub fn unit_status(&self) -> (String, bool) {
        match &self.unit_info {
            Some(unit) => (unit.name.clone(), self.driver_index.is_some()),
            None => (String::new(), false),
        }
    }

    /// Bracket every target interaction in a `DebugEngine` bound to the
    /// open transport's endpoints.
    fn with_debug<R>(&mut self, f: impl FnOnce(&mut DebugEngine<'_>) -> Result<R>) -> Result<R> {
        let device_id = self.device_id.ok_or_else(|| Error::invariant("not open"))?;
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| Error::invariant("not open"))?;
        let mut engine = DebugEngine::new(transport, device_id.endpoint_in, device_id.endpoint_out);
        f(&mut engine)
    }

    /// Select the dongle's debug-interface transfer speed (`--fast`/
    /// `--slow`), issued once per session independent of any one task
    /// (the original's `set_debug_interface_speed`).
    pub fn set_debug_interface_speed(&mut self, fast: bool) -> Result<()> {
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| Error::invariant("not open"))?;
        let value = if fast { 0 } else { 1 };
        transport.control_write(VENDOR_SET_DEBUG_INTERFACE_SPEED, value, 0, &[])
    }

    /// Enter debug mode, reset into halt, verify the target halted,
    /// and populate [`UnitInfo`] via the matched driver.
    pub fn unit_connect(&mut self) -> Result<UnitInfo> {
        self.driver_index.ok_or(Error::NoDriver)?;
        let debugger_id_hex = self
            .programmer_info
            .as_ref()
            .map(|p| p.debugger_id.clone())
            .unwrap_or_default();
        let debugger_id = u16::from_str_radix(&debugger_id_hex, 16).unwrap_or(0);
        let protocol = self
            .device_id
            .map(|d| d.protocol)
            .unwrap_or(Protocol::Ti);
        let chip_name = self
            .unit_info
            .as_ref()
            .map(|u| u.name.clone())
            .unwrap_or_default();

        let mut unit = self.unit_info.clone().ok_or(Error::NoDriver)?;

        self.with_debug(|debug| {
            debug.enter_debug_mode(&chip_name, debugger_id, protocol)?;
            debug.reset(true)?;
            let status = debug.read_status()?;
            if status & STATUS_CPU_HALTED == 0 {
                return Err(Error::HaltFailed);
            }
            debug.write_config(CFG_TIMER_SUSPEND | CFG_SOFT_POWER_MODE)?;
            Ok(())
        })?;

        let locked = self.with_debug(|debug| {
            let status = debug.read_status()?;
            Ok(status & STATUS_DEBUG_LOCKED != 0)
        })?;
        self.target_locked = locked;

        self.with_driver_and_debug(|driver, debug| driver.find_unit_info(debug, &mut unit))?;

        self.unit_info = Some(unit.clone());
        Ok(unit)
    }

    /// `true` once [`Programmer::unit_connect`] has read the debug
    /// status register and found `DEBUG_LOCKED` set.
    pub fn target_locked(&self) -> bool {
        self.target_locked
    }

    /// Re-read the debug status register and refresh
    /// [`Programmer::target_locked`], e.g. after an erase that may have
    /// cleared the lock.
    pub fn refresh_target_locked(&mut self) -> Result<bool> {
        let locked = self.with_debug(|debug| {
            let status = debug.read_status()?;
            Ok(status & STATUS_DEBUG_LOCKED != 0)
        })?;
        self.target_locked = locked;
        Ok(locked)
    }

    /// Reset the target back into halted debug mode, verifying
    /// `CPU_HALTED` is set afterward (the orchestrator's `RESET` task).
    pub fn unit_reset(&mut self) -> Result<()> {
        self.with_debug(|debug| {
            debug.reset(true)?;
            let status = debug.read_status()?;
            if status & STATUS_CPU_HALTED == 0 {
                return Err(Error::HaltFailed);
            }
            Ok(())
        })
    }

    /// The matched driver, if any, once connected.
    pub fn driver(&self) -> Option<&dyn Driver> {
        self.driver_index.map(|i| self.drivers[i].as_ref())
    }

    /// A mutable accessor used by the orchestrator to drive target
    /// operations through the matched driver and this session's debug
    /// engine in one call.
    pub fn with_driver_and_debug<R>(
        &mut self,
        f: impl FnOnce(&mut dyn Driver, &mut DebugEngine<'_>) -> Result<R>,
    ) -> Result<R> {
        let driver_index = self.driver_index.ok_or(Error::NoDriver)?;
        let device_id = self.device_id.ok_or_else(|| Error::invariant("not open"))?;
        let transport = self
            .transport
            .as_deref_mut()
            .ok_or_else(|| Error::invariant("not open"))?;
        let mut engine = DebugEngine::new(transport, device_id.endpoint_in, device_id.endpoint_out);
        let driver = self.drivers[driver_index].as_mut();
        f(driver, &mut engine)
    }

    /// The most recently populated target identity.
    pub fn unit_info(&self) -> Option<&UnitInfo> {
        self.unit_info.as_ref()
    }

    /// Release the USB interface, on every exit path (§5).
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.device_id = None;
        self.driver_index = None;
        self.target_locked = false;
    }
}

impl Drop for Programmer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CcResult;

    struct FakeTransport {
        status: u8,
        get_state: [u8; 8],
    }

    impl Transport for FakeTransport {
        fn set_transfer_timeout(&mut self, _timeout_ms: u32) {}
        fn reset_device(&mut self) -> CcResult<()> {
            Ok(())
        }
        fn set_configuration(&mut self, _configuration: u8) -> CcResult<()> {
            Ok(())
        }
        fn claim_interface(&mut self, _interface: u8) -> CcResult<()> {
            Ok(())
        }
        fn release_interface(&mut self, _interface: u8) -> CcResult<()> {
            Ok(())
        }
        fn string_descriptor_ascii(&mut self, _index: u8) -> CcResult<String> {
            Ok(String::new())
        }
        fn bcd_device(&self) -> u16 {
            0x0100
        }
        fn clear_halt(&mut self, _endpoint: u8) -> CcResult<()> {
            Ok(())
        }
        fn bulk_read(&mut self, _endpoint: u8, buf: &mut [u8]) -> CcResult<usize> {
            buf[0] = self.status;
            Ok(1)
        }
        fn bulk_write(&mut self, _endpoint: u8, data: &[u8]) -> CcResult<usize> {
            Ok(data.len())
        }
        fn control_read(&mut self, _request: u8, _value: u16, _index: u16, buf: &mut [u8]) -> CcResult<usize> {
            let n = buf.len().min(self.get_state.len());
            buf[..n].copy_from_slice(&self.get_state[..n]);
            Ok(n)
        }
        fn control_write(&mut self, _request: u8, _value: u16, _index: u16, _data: &[u8]) -> CcResult<()> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    struct FakeOpener {
        device_id: UsbDeviceId,
        status: u8,
        get_state: [u8; 8],
    }

    impl DeviceOpener for FakeOpener {
        fn open(&mut self) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)> {
            Ok((
                Box::new(FakeTransport {
                    status: self.status,
                    get_state: self.get_state,
                }),
                self.device_id,
                0x0100,
            ))
        }
        fn open_by_address(&mut self, _bus: u8, _address: u8) -> Result<(Box<dyn Transport>, UsbDeviceId, u16)> {
            self.open()
        }
    }

    #[test]
    fn unit_status_reports_unrecognized_chip_without_erroring() {
        let mut programmer = Programmer::new();
        let mut opener = FakeOpener {
            device_id: crate::transport::DEVICE_TABLE[0],
            status: STATUS_CPU_HALTED,
            get_state: [0xFF, 0xFF, 1, 0, 0, 0, 0, 0],
        };
        programmer.open(&mut opener).unwrap();
        let (name, supported) = programmer.unit_status();
        assert_eq!(name, "CCFFFF");
        assert!(!supported);
    }

    #[test]
    fn unit_status_reports_recognized_chip() {
        let mut programmer = Programmer::new();
        let mut opener = FakeOpener {
            device_id: crate::transport::DEVICE_TABLE[0],
            status: STATUS_CPU_HALTED,
            get_state: [0x30, 0x85, 1, 0, 0, 0, 0, 0],
        };
        programmer.open(&mut opener).unwrap();
        let (name, supported) = programmer.unit_status();
        assert_eq!(name, "CC2530");
        assert!(supported);
    }
}
