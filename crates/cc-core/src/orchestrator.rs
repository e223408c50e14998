//! The task orchestrator (§4.6): validates the caller's requested option
//! combination against the connected target's capabilities, then
//! sequences erase -> read -> write -> verify -> residual config-write
//! in the fixed order the flash engine requires.
//!
//! This is the only layer above [`crate::programmer::Programmer`] that
//! `cc-core` provides; argument parsing and progress-bar rendering stay
//! one layer up, in the CLI binary.

use bitflags::bitflags;

use crate::drivers::Driver;
use crate::error::{Error, Result};
use crate::programmer::Programmer;
use crate::progress::ProgressObserver;
use crate::section::DataSectionStore;
use crate::unit::{UnitFlags, UnitInfo, FLASH_EMPTY_BYTE};

bitflags! {
    /// The bitmask of tasks a caller may request in one orchestrator run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Tasks: u32 {
        /// Reset the target back into halted debug mode.
        const RESET = 1 << 0;
        /// Full-chip erase.
        const ERASE = 1 << 1;
        /// Write `flash_image` to the target.
        const WRITE = 1 << 2;
        /// Read the whole flash image back from the target.
        const READ = 1 << 3;
        /// Verify the just-written image (requires [`Tasks::WRITE`]).
        const VERIFY = 1 << 4;
        /// Write lock data, embedded in the image if the family
        /// supports it, else via a residual `config_write`.
        const LOCK = 1 << 5;
        /// Read back the target's primary MAC address.
        const READ_MAC = 1 << 6;
        /// Write `mac_address` into the image or via `config_write`.
        const WRITE_MAC = 1 << 7;
        /// Read the secondary MAC address and promote it to
        /// [`Tasks::WRITE_MAC`] before the image is written.
        const PRESERVE_MAC = 1 << 8;
        /// Read the family's info page, if it has one.
        const READ_INFO_PAGE = 1 << 9;
        /// Connectivity smoke test: connect, read status, read config,
        /// disconnect. May not be combined with any other task.
        const TEST = 1 << 10;
    }
}

/// Which strategy verifies a just-written image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMethod {
    /// Hardware CRC-16 over DMA-streamed bytes, compared against a
    /// host-computed CRC-16 over the same range.
    ByCrc,
    /// Byte-for-byte read-back comparison.
    ByRead,
}

/// A single orchestrator run's parameters.
#[derive(Debug, Clone, Default)]
pub struct TaskParams {
    /// The requested task bitmask.
    pub tasks: Tasks,
    /// Raw MAC address bytes for [`Tasks::WRITE_MAC`]. Ignored (and
    /// overwritten) when [`Tasks::PRESERVE_MAC`] is also set.
    pub mac_address: Option<Vec<u8>>,
    /// Lock qualifier string (e.g. `"debug;pages:0,2-3"`) or a literal
    /// hex byte string, for [`Tasks::LOCK`]. Resolved by
    /// [`resolve_lock_data`] per §4.6 step 1.
    pub lock_spec: Option<String>,
    /// Strategy used when [`Tasks::VERIFY`] is requested.
    pub verify_method: VerifyMethod,
    /// Caller-supplied flash-size override, in KB. Validated against
    /// the target's candidate size set only when the target itself
    /// reports an unknown (zero) flash size.
    pub flash_size_override_kb: Option<u32>,
}

impl Default for VerifyMethod {
    fn default() -> Self {
        VerifyMethod::ByCrc
    }
}

/// Results accumulated from a run's read-oriented tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    /// Populated by [`Tasks::RESET`]/connect: the target identity as
    /// read during this run.
    pub unit: Option<UnitInfo>,
    /// `(mac_index, bytes)` pairs read by [`Tasks::READ_MAC`] or
    /// [`Tasks::PRESERVE_MAC`].
    pub mac_reads: Vec<(u32, Vec<u8>)>,
    /// Info-page bytes read by [`Tasks::READ_INFO_PAGE`].
    pub info_page: Option<Vec<u8>>,
    /// The full flash image read back by [`Tasks::READ`].
    pub read_image: Option<DataSectionStore>,
    /// Debug status/config bytes read by [`Tasks::TEST`].
    pub test_status_config: Option<(u8, u8)>,
}

/// Parse `qualifiers_or_hex` as hex bytes if it is all hex digits of
/// even, nonzero length; otherwise pass it through
/// `driver.convert_lock_data`. Enforces the family's expected lock size
/// either way (§4.6 step 1).
pub fn resolve_lock_data(qualifiers_or_hex: &str, driver: &dyn Driver, expected_size: usize) -> Result<Vec<u8>> {
    let data = if is_hex_bytes(qualifiers_or_hex) {
        parse_hex_bytes(qualifiers_or_hex)
    } else {
        driver.convert_lock_data(qualifiers_or_hex)?
    };
    if data.len() != expected_size {
        return Err(Error::BadLockDataSize {
            expected: expected_size,
            actual: data.len(),
        });
    }
    Ok(data)
}

fn is_hex_bytes(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_hex_bytes(s: &str) -> Vec<u8> {
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap() as u8;
            let lo = (pair[1] as char).to_digit(16).unwrap() as u8;
            (hi << 4) | lo
        })
        .collect()
}

/// Run one orchestrator pass: validate `params` against the connected
/// target's capabilities, then execute the requested tasks in the
/// fixed order of §4.6 step 6.
///
/// `programmer` must already be open (see
/// [`crate::programmer::Programmer::open`]); this function performs the
/// `unit_connect` handshake itself, since every task (including `TEST`)
/// needs the target identity to validate against.
pub fn run(
    programmer: &mut Programmer,
    params: &TaskParams,
    flash_image: Option<&DataSectionStore>,
    progress: &mut dyn ProgressObserver,
) -> Result<TaskOutcome> {
    let tasks = params.tasks;

    if tasks.contains(Tasks::TEST) {
        if tasks != Tasks::TEST {
            return Err(Error::IncompatibleOptions(
                "TEST may not be combined with any other task".into(),
            ));
        }
        return run_test(programmer);
    }

    let unit = programmer.unit_connect()?;
    let mut outcome = TaskOutcome {
        unit: Some(unit.clone()),
        ..Default::default()
    };

    // --- Step 1: resolve lock data ---
    let lock_data = if tasks.contains(Tasks::LOCK) {
        let spec = params
            .lock_spec
            .as_ref()
            .ok_or_else(|| Error::invariant("LOCK requested with no lock_spec"))?;
        let lock_size = programmer
            .with_driver_and_debug(|driver, _debug| Ok(driver.core_info().lock_size))?;
        let driver_ref = programmer.driver().ok_or(Error::NoDriver)?;
        Some(resolve_lock_data(spec, driver_ref, lock_size)?)
    } else {
        None
    };

    // --- Step 2: locked-target refusal ---
    if programmer.target_locked() && !tasks.contains(Tasks::ERASE) {
        return Err(Error::TargetLocked);
    }

    // --- "refusal paths" (§8 item 8): write needs erase, verify needs write ---
    if tasks.contains(Tasks::WRITE) && !tasks.contains(Tasks::ERASE) {
        return Err(Error::IncompatibleOptions(
            "WRITE requires ERASE in the same run".into(),
        ));
    }
    if tasks.contains(Tasks::VERIFY) && !tasks.contains(Tasks::WRITE) {
        return Err(Error::IncompatibleOptions(
            "VERIFY requires WRITE in the same run".into(),
        ));
    }

    // --- Step 3: flash-size override ---
    if let Some(kb) = params.flash_size_override_kb {
        if unit.flash_size_kb == 0 && !unit.flash_sizes_kb.contains(&kb) {
            return Err(Error::BadFlashSize(kb));
        }
    }

    // --- Step 4: MAC option validation ---
    if tasks.contains(Tasks::WRITE_MAC) && tasks.contains(Tasks::PRESERVE_MAC) {
        return Err(Error::IncompatibleOptions(
            "WRITE_MAC and PRESERVE_MAC are mutually exclusive".into(),
        ));
    }
    let wants_mac = tasks.intersects(Tasks::READ_MAC | Tasks::WRITE_MAC | Tasks::PRESERVE_MAC);
    if wants_mac && !unit.flags.contains(UnitFlags::HAS_MAC_ADDRESS) {
        return Err(Error::invariant("this family has no MAC address"));
    }
    if let Some(mac) = &params.mac_address {
        if tasks.contains(Tasks::WRITE_MAC) && mac.len() != unit.mac_address_size {
            return Err(Error::BadMacLength {
                expected: unit.mac_address_size,
                actual: mac.len(),
            });
        }
    }

    // --- Step 5: preserve-mac promotion ---
    let mut write_mac: Option<Vec<u8>> = if tasks.contains(Tasks::WRITE_MAC) {
        params.mac_address.clone()
    } else {
        None
    };
    let mut tasks = tasks;
    if tasks.contains(Tasks::PRESERVE_MAC) {
        let mac = programmer.with_driver_and_debug(|driver, debug| driver.mac_address_read(debug, &unit, 1))?;
        outcome.mac_reads.push((1, mac.clone()));
        write_mac = Some(mac);
        tasks |= Tasks::WRITE_MAC;
    }

    // --- Step 6: execute in fixed order ---
    if tasks.contains(Tasks::READ_MAC) {
        let mac = programmer.with_driver_and_debug(|driver, debug| driver.mac_address_read(debug, &unit, 0))?;
        outcome.mac_reads.push((0, mac));
    }

    if tasks.contains(Tasks::READ_INFO_PAGE) {
        let page = programmer.with_driver_and_debug(|driver, debug| driver.read_info_page(debug, &unit))?;
        outcome.info_page = Some(page);
    }

    if tasks.contains(Tasks::RESET) {
        programmer.unit_reset()?;
    }

    if tasks.contains(Tasks::READ) {
        let total = unit.actual_flash_size_bytes() as u32;
        let mut store = DataSectionStore::new();
        let data = read_whole_flash(programmer, &unit, total, &mut *progress)?;
        store.add_section(crate::section::DataSection::new(0, data))?;
        outcome.read_image = Some(store);
    }

    if tasks.contains(Tasks::ERASE) {
        programmer.with_driver_and_debug(|driver, debug| driver.erase(debug))?;
        if programmer.refresh_target_locked()? {
            return Err(Error::TargetLocked);
        }
    }

    let mut embedded_lock = false;
    let mut embedded_mac = false;

    if tasks.contains(Tasks::WRITE) {
        let base = flash_image.ok_or_else(|| Error::invariant("WRITE requested with no flash_image"))?;
        let mut working = base.clone();

        if let Some(lock) = &lock_data {
            embedded_lock =
                programmer.with_driver_and_debug(|driver, _debug| Ok(driver.flash_image_embed_lock_data(&mut working, &unit, lock)))?;
        }
        if let Some(mac) = &write_mac {
            embedded_mac =
                programmer.with_driver_and_debug(|driver, _debug| Ok(driver.flash_image_embed_mac_address(&mut working, &unit, mac)))?;
        }

        let image = working.create_image(FLASH_EMPTY_BYTE);
        let flash_len = unit.actual_flash_size_bytes();
        if image.len() > flash_len {
            return Err(Error::ImageExceedsFlash {
                image_len: image.len(),
                flash_len,
            });
        }

        programmer.with_driver_and_debug(|driver, debug| driver.flash_write(debug, &unit, &image, &mut *progress))?;

        if tasks.contains(Tasks::VERIFY) {
            match params.verify_method {
                VerifyMethod::ByRead => {
                    programmer.with_driver_and_debug(|driver, debug| {
                        crate::flash::verify_by_read(debug, &working, |d, addr, len| {
                            driver.flash_read_block(d, &unit, addr, len)
                        })
                    })?;
                }
                VerifyMethod::ByCrc => {
                    let info = programmer.with_driver_and_debug(|driver, _debug| Ok(driver.core_info()))?;
                    programmer.with_driver_and_debug(|driver, debug| {
                        crate::flash::verify_by_crc(debug, &info, &working, |d, addr| driver.crc_source_address(d, &info, addr))
                    })?;
                }
            }
        }
    }

    // --- Residual config-write for lock/MAC that couldn't be embedded ---
    let residual_lock = if tasks.contains(Tasks::LOCK) && !embedded_lock { lock_data.as_deref() } else { None };
    let residual_mac = if tasks.contains(Tasks::WRITE_MAC) && !embedded_mac { write_mac.as_deref() } else { None };
    if residual_lock.is_some() || residual_mac.is_some() {
        programmer.with_driver_and_debug(|driver, debug| driver.config_write(debug, &unit, residual_mac, residual_lock))?;
    }

    Ok(outcome)
}

fn read_whole_flash(
    programmer: &mut Programmer,
    unit: &UnitInfo,
    total: u32,
    progress: &mut dyn ProgressObserver,
) -> Result<Vec<u8>> {
    const CHUNK: u32 = 4096;
    let mut data = Vec::with_capacity(total as usize);
    let mut offset = 0u32;
    while offset < total {
        let len = (total - offset).min(CHUNK);
        let chunk = programmer.with_driver_and_debug(|driver, debug| driver.flash_read_block(debug, unit, offset, len))?;
        data.extend_from_slice(&chunk);
        offset += len;
        progress.on_read_progress(offset as u64, total as u64);
    }
    Ok(data)
}

fn run_test(programmer: &mut Programmer) -> Result<TaskOutcome> {
    let unit = programmer.unit_connect()?;
    let (status, config) = programmer.with_driver_and_debug(|_driver, debug| {
        let status = debug.read_status()?;
        let config = debug.read_config()?;
        Ok((status, config))
    })?;
    programmer.close();
    Ok(TaskOutcome {
        unit: Some(unit),
        test_status_config: Some((status, config)),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_lock_spec_parses_as_bytes() {
        assert!(is_hex_bytes("FF00"));
        assert_eq!(parse_hex_bytes("FF00"), vec![0xFF, 0x00]);
        assert!(!is_hex_bytes("debug"));
        assert!(!is_hex_bytes("F0F")); // odd length
    }

    #[test]
    fn tasks_bitmask_combines() {
        let t = Tasks::ERASE | Tasks::WRITE | Tasks::VERIFY;
        assert!(t.contains(Tasks::WRITE));
        assert!(!t.contains(Tasks::LOCK));
    }
}
