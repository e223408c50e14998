//! CC2510/CC2511 and CC1110/CC1111: the "near" family, whose flash is
//! entirely XDATA-mapped with no banking, a one-byte lock, and no MAC
//! address.
//!
//! `XDATA_SFR_OFFSET = 0xDF00` (from `cc_251x_111x.cpp`): the chip-id,
//! revision, and internal-id SFRs all live in that page, same layout as
//! CC243x but a different candidate flash-size table.

use crate::debug::DebugEngine;
use crate::drivers::{convert_lock_data_standard, Driver};
use crate::error::Result;
use crate::flash;
use crate::progress::ProgressObserver;
use crate::unit::{UnitCoreInfo, UnitFlags, UnitInfo};

const SUPPORTED: &[(u16, &str)] = &[
    (0x8510, "CC2510"),
    (0x8511, "CC2511"),
    (0x8110, "CC1110"),
    (0x8111, "CC1111"),
];

const SFR_FLASH_SIZE: u16 = 0xDF36;
const SFR_REVISION: u16 = 0xDF38;
const SFR_INTERNAL_ID: u16 = 0xDF39;

/// Candidate flash sizes, in KB, also used as the `flash:SIZE` index
/// table for the one-byte lock's bits 1-3.
const FLASH_SIZES_KB: &[u32] = &[0, 1, 2, 4, 8, 16, 24, 32];

/// Debug-config bit selecting info-page memory for flash writes.
const SEL_FLASH_INFO_PAGE: u8 = 0x08;

fn core_info() -> UnitCoreInfo {
    UnitCoreInfo {
        lock_size: 1,
        flash_word_size: 2,
        verify_block_size: 1024,
        write_block_size: 1024,
        xbank_offset: 0,
        dma0_cfg_offset: 0x0800,
        dma_data_offset: 0x0800,
        memctr: 0,
        fmap: 0xDF9F,
        rndl: 0xDFBD,
        rndh: 0xDFBE,
        fctl: 0xDF70,
        fwdata: 0xDF73,
        faddrl: 0xDF71,
        faddrh: 0xDF72,
        dma0_cfgl: 0xDFD2,
        dma0_cfgh: 0xDFD3,
        dma1_cfgl: 0xDFD4,
        dma1_cfgh: 0xDFD5,
        dma_arm: 0xDFD6,
        dma_req: 0xDFD7,
        dma_irq: 0xDFD1,
        fctl_write: 0x06,
        fctl_erase: 0x01,
        chip_erase_busy_bit: 0x80,
    }
}

/// Driver for CC2510/CC2511/CC1110/CC1111.
#[derive(Default)]
pub struct Cc251x111xDriver;

impl Cc251x111xDriver {
    /// A fresh driver instance.
    pub fn new() -> Self {
        Cc251x111xDriver
    }
}

impl Driver for Cc251x111xDriver {
    fn supported_units(&self) -> &'static [(u16, &'static str)] {
        SUPPORTED
    }

    fn core_info(&self) -> UnitCoreInfo {
        core_info()
    }

    fn find_unit_info(&mut self, debug: &mut DebugEngine<'_>, unit: &mut UnitInfo) -> Result<()> {
        let byte = debug.read_xdata(SFR_FLASH_SIZE, 1)?[0];
        let code = (byte & 0x70) >> 4;
        unit.flash_size_kb = match code {
            1 => 8,
            2 => 16,
            3 => 32,
            _ => 0,
        };
        unit.max_flash_size_kb = 32;
        unit.flash_sizes_kb = vec![8, 16, 32];
        unit.flash_page_size_kb = 1;
        unit.ram_size_kb = 8;
        unit.mac_address_count = 0;
        unit.mac_address_size = 0;
        unit.flags = UnitFlags::HAS_INFO_PAGE;

        unit.revision = debug.read_xdata(SFR_REVISION, 1)?[0];
        unit.internal_id = debug.read_xdata(SFR_INTERNAL_ID, 1)?[0];
        Ok(())
    }

    fn config_write(
        &self,
        debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        mac_address: Option<&[u8]>,
        lock_data: Option<&[u8]>,
    ) -> Result<()> {
        if mac_address.is_some() {
            return Err(crate::error::Error::invariant(
                "CC251x/111x has no MAC address",
            ));
        }
        if let Some(lock) = lock_data {
            let current_config = debug.read_config()?;
            flash::write_info_page_lock(
                debug,
                &self.core_info(),
                current_config,
                SEL_FLASH_INFO_PAGE,
                lock[0],
            )?;
        }
        Ok(())
    }

    fn flash_write(
        &self,
        debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        image: &[u8],
        progress: &mut dyn ProgressObserver,
    ) -> Result<()> {
        flash::slow_write(debug, &self.core_info(), image, progress)
    }

    fn flash_read_block(
        &self,
        debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>> {
        flash::flash_read_block_near(debug, offset, size)
    }

    fn erase_check_completed(&self, debug: &mut DebugEngine<'_>, _unit: &UnitInfo) -> Result<bool> {
        let status = debug.read_status()?;
        Ok(status & self.core_info().chip_erase_busy_bit == 0)
    }

    fn convert_lock_data(&self, qualifiers: &str) -> Result<Vec<u8>> {
        convert_lock_data_standard(qualifiers, FLASH_SIZES_KB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_qualifier_set_applies() {
        let driver = Cc251x111xDriver::new();
        let data = driver.convert_lock_data("debug;boot").unwrap();
        assert_eq!(data, vec![0xEE]);
    }

    #[test]
    fn unknown_qualifier_rejected() {
        let driver = Cc251x111xDriver::new();
        assert!(driver.convert_lock_data("nonsense").is_err());
    }
}
